//! 에러 타입: 도메인별 에러 정의
//!
//! 모든 크레이트의 에러는 최종적으로 [`IronlogError`]로 수렴합니다.
//! 분류 기준:
//! - 설정 에러 ([`ConfigError`]): configure 단계에서 치명적, 스테이지는 시작되지 않음
//! - 스택 에러 ([`StackError`]): 플러그인 등록/생명주기 위반
//! - 키 에러 ([`KeyError`]): 슬롯 타입 불일치 등 스테이지 구현 결함
//! - 파싱 에러 ([`ParseError`]): 소스가 잘린/잘못된 입력을 받은 경우
//! - 스토리지 에러 ([`StorageError`]): 싱크의 연결/쿼리 실패 (일시적)

/// Ironlog 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum IronlogError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 스택 구성/생명주기 에러
    #[error("stack error: {0}")]
    Stack(#[from] StackError),

    /// 키 슬롯 에러
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    /// 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// 필수 입력 키를 출력하는 상위 스테이지가 없음
    #[error("stage '{stage}': no upstream stage provides required key '{key}'")]
    UnresolvedKey { stage: String, key: String },

    /// 입력 키 타입과 상위 출력 키 타입이 다름
    #[error("stage '{stage}': key '{key}' expects {expected} but upstream provides {actual}")]
    KeyTypeMismatch {
        stage: String,
        key: String,
        expected: String,
        actual: String,
    },
}

/// 스택 구성 및 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    /// 같은 이름의 플러그인 정의가 이미 등록됨
    #[error("plugin already registered: {name}")]
    AlreadyRegistered { name: String },

    /// 레지스트리에 없는 플러그인
    #[error("plugin not found: {name}")]
    UnknownPlugin { name: String },

    /// 플러그인 정의 자체가 잘못됨
    #[error("invalid plugin definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    /// 잘못된 상태에서 생명주기 연산 호출
    #[error("stage '{stage}' is in state '{current}', expected '{expected}'")]
    InvalidState {
        stage: String,
        current: String,
        expected: String,
    },

    /// 스택 내 인덱스 범위 초과
    #[error("stage index {index} out of range (stack has {len} stages)")]
    IndexOutOfRange { index: usize, len: usize },

    /// 여러 스테이지 정지 실패 (메시지 결합)
    #[error("stop failed: {0}")]
    StopFailed(String),

    /// 여러 스테이지 재시작 실패 (메시지 결합)
    #[error("reload failed: {0}")]
    ReloadFailed(String),
}

/// 키 슬롯 에러
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// 슬롯 타입과 다른 값을 기록하려 함
    #[error("key '{key}': cannot write {actual} into {expected} slot")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// 존재하지 않는 슬롯 인덱스
    #[error("slot index {index} out of range ({len} slots)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// 파싱 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// 입력이 필요한 길이보다 짧음
    #[error("truncated input: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// 파싱 실패
    #[error("parse failed at offset {offset}: {reason}")]
    Failed { offset: usize, reason: String },
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 연결 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// 쿼리 실패
    #[error("query failed: {0}")]
    Query(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_key_names_stage_and_key() {
        let err = ConfigError::UnresolvedKey {
            stage: "db1".to_owned(),
            key: "ip.saddr".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("db1"));
        assert!(msg.contains("ip.saddr"));
    }

    #[test]
    fn config_error_converts_to_ironlog_error() {
        let err: IronlogError = ConfigError::ParseFailed {
            reason: "bad".to_owned(),
        }
        .into();
        assert!(matches!(err, IronlogError::Config(_)));
    }

    #[test]
    fn stack_error_display() {
        let err = StackError::AlreadyRegistered {
            name: "ULOG".to_owned(),
        };
        assert_eq!(err.to_string(), "plugin already registered: ULOG");
    }

    #[test]
    fn truncated_display() {
        let err = ParseError::Truncated {
            needed: 165,
            available: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("165"));
        assert!(msg.contains("12"));
    }
}

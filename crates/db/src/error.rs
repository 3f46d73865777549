//! DB 싱크 에러 타입
//!
//! [`DbError`]는 드라이버/설정/구문 생성 중 발생하는 에러를 표현합니다.
//! `From<DbError> for IronlogError` 변환이 구현되어 있어
//! 스테이지 훅에서 `?` 연산자로 전파할 수 있습니다.

use ironlog_core::error::{ConfigError, IronlogError, StorageError};

/// DB 싱크 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// 잘못된 스테이지 옵션
    #[error("config error: {field}: {reason}")]
    Config {
        /// 옵션 이름
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 연결 실패 (open)
    #[error("connection failed: {0}")]
    Connection(String),

    /// 구문 실행/커밋 실패
    #[error("execute failed: {0}")]
    Execute(String),

    /// 드라이버가 지원하지 않는 연산
    #[error("driver '{driver}' does not support {operation}")]
    Unsupported {
        driver: String,
        operation: &'static str,
    },

    /// 구문 버퍼 에러
    #[error(transparent)]
    Statement(#[from] StatementError),
}

/// 구문 버퍼 에러
#[derive(Debug, thiserror::Error)]
pub enum StatementError {
    /// 미리 계산한 용량을 넘어서 쓰려고 함
    #[error("statement buffer overflow: capacity {capacity}, needed {needed}")]
    Overflow { capacity: usize, needed: usize },
}

impl From<DbError> for IronlogError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Config { field, reason } => {
                IronlogError::Config(ConfigError::InvalidValue { field, reason })
            }
            DbError::Connection(msg) => IronlogError::Storage(StorageError::Connection(msg)),
            other => IronlogError::Storage(StorageError::Query(other.to_string())),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::Execute(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_display() {
        let err = StatementError::Overflow {
            capacity: 64,
            needed: 70,
        };
        let msg = err.to_string();
        assert!(msg.contains("64"));
        assert!(msg.contains("70"));
    }

    #[test]
    fn config_error_becomes_core_config_error() {
        let err: IronlogError = DbError::Config {
            field: "table".to_owned(),
            reason: "must not be empty".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            IronlogError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn connection_error_becomes_storage_error() {
        let err: IronlogError = DbError::Connection("refused".to_owned()).into();
        assert!(matches!(
            err,
            IronlogError::Storage(StorageError::Connection(_))
        ));
    }

    #[test]
    fn unsupported_display() {
        let err = DbError::Unsupported {
            driver: "mock".to_owned(),
            operation: "execute_row",
        };
        assert_eq!(err.to_string(), "driver 'mock' does not support execute_row");
    }
}

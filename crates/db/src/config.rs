//! DB 싱크 스테이지 설정
//!
//! 스택 설정의 `options` 테이블이 [`DbSinkConfig`]로 역직렬화됩니다.
//!
//! ```toml
//! [[stack.stage]]
//! plugin = "SQLITE3"
//! options = { db = "/var/log/ulog.db", table = "flows", reconnect_secs = 30 }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DbError;

/// 기본 최대 백로그 행 수
pub const DEFAULT_MAX_BACKLOG: usize = 1024 * 1024;

/// 한 번의 커밋에서 처리하는 최소 행 수 상한
pub const MIN_COMMIT_BATCH: usize = 1024;

/// DB 싱크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbSinkConfig {
    /// 데이터베이스 위치 (SQLite 파일 경로)
    pub db: String,
    /// 대상 테이블
    pub table: String,
    /// 스키마 (테이블 앞에 `schema.`로 붙음)
    pub schema: Option<String>,
    /// 최대 백로그 행 수
    pub max_backlog: usize,
    /// 이 행 수 이상이 쌓이면 커밋 시도
    pub flush_threshold: usize,
    /// 재연결 간격 (초, 0이면 첫 실패 시 영구 비활성화)
    pub reconnect_secs: u64,
    /// IPv4 주소를 점 표기 문자열로 기록 (false면 부호 없는 정수)
    pub ip_as_string: bool,
    /// 드라이버가 지원하면 준비된 구문 사용
    pub prepared: bool,
}

impl Default for DbSinkConfig {
    fn default() -> Self {
        Self {
            db: String::new(),
            table: String::new(),
            schema: None,
            max_backlog: DEFAULT_MAX_BACKLOG,
            flush_threshold: 1,
            reconnect_secs: 0,
            ip_as_string: false,
            prepared: true,
        }
    }
}

impl DbSinkConfig {
    /// 재연결 간격 (`None`이면 재연결하지 않음)
    pub fn reconnect_interval(&self) -> Option<Duration> {
        (self.reconnect_secs > 0).then(|| Duration::from_secs(self.reconnect_secs))
    }

    /// 한 번의 커밋에서 처리할 최대 행 수
    pub fn max_commit(&self) -> usize {
        (3 * self.flush_threshold).max(MIN_COMMIT_BATCH)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.db.is_empty() {
            return Err(DbError::Config {
                field: "db".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        validate_identifier("table", &self.table)?;
        if let Some(schema) = &self.schema {
            validate_identifier("schema", schema)?;
        }

        if self.max_backlog == 0 {
            return Err(DbError::Config {
                field: "max_backlog".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.flush_threshold == 0 || self.flush_threshold > self.max_backlog {
            return Err(DbError::Config {
                field: "flush_threshold".to_owned(),
                reason: format!("must be 1-{}", self.max_backlog),
            });
        }

        Ok(())
    }
}

/// 테이블/스키마 이름은 구문에 그대로 들어가므로 식별자 문자만 허용
fn validate_identifier(field: &str, value: &str) -> Result<(), DbError> {
    if value.is_empty() {
        return Err(DbError::Config {
            field: field.to_owned(),
            reason: "must not be empty".to_owned(),
        });
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
        || value.starts_with(|c: char| c.is_ascii_digit())
    {
        return Err(DbError::Config {
            field: field.to_owned(),
            reason: format!("'{value}' is not a valid identifier"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> DbSinkConfig {
        DbSinkConfig {
            db: "/tmp/ulog.db".to_owned(),
            table: "flows".to_owned(),
            ..DbSinkConfig::default()
        }
    }

    #[test]
    fn default_values() {
        let config = DbSinkConfig::default();
        assert_eq!(config.max_backlog, 1024 * 1024);
        assert_eq!(config.flush_threshold, 1);
        assert!(config.reconnect_interval().is_none());
        assert!(!config.ip_as_string);
    }

    #[test]
    fn valid_config_passes() {
        valid().validate().unwrap();
    }

    #[test]
    fn max_commit_has_floor() {
        let mut config = valid();
        assert_eq!(config.max_commit(), 1024);
        config.flush_threshold = 1000;
        assert_eq!(config.max_commit(), 3000);
    }

    #[test]
    fn reconnect_interval_from_secs() {
        let mut config = valid();
        config.reconnect_secs = 30;
        assert_eq!(config.reconnect_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn rejects_injected_table_name() {
        let mut config = valid();
        config.table = "flows; drop table x".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("table"));
    }

    #[test]
    fn rejects_bad_schema() {
        let mut config = valid();
        config.schema = Some("1abc".to_owned());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_threshold_above_backlog() {
        let mut config = valid();
        config.max_backlog = 10;
        config.flush_threshold = 11;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("flush_threshold"));
    }

    #[test]
    fn rejects_zero_backlog() {
        let mut config = valid();
        config.max_backlog = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_db() {
        let mut config = valid();
        config.db.clear();
        assert!(config.validate().is_err());
    }
}

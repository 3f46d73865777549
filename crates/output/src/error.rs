//! 출력 스테이지 에러 타입

use ironlog_core::error::{ConfigError, IronlogError, StorageError};

/// 출력 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// 설정 에러 (알 수 없는 facility/level 등)
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 출력 채널이 열려 있지 않음
    #[error("writer is not open")]
    NotOpen,

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<OutputError> for IronlogError {
    fn from(err: OutputError) -> Self {
        match err {
            OutputError::Config { field, reason } => {
                IronlogError::Config(ConfigError::InvalidValue { field, reason })
            }
            OutputError::NotOpen => {
                IronlogError::Storage(StorageError::Connection("writer is not open".to_owned()))
            }
            OutputError::Io(e) => IronlogError::Io(e),
        }
    }
}

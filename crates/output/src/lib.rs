//! Ironlog 출력 스테이지
//!
//! - [`astaro`]: prefix별 이벤트 종류와 `name="value"` 쌍으로 이루어진 방화벽 라인 포매터
//! - [`syslog`]: facility/level 해석, RFC 3164 라인, [`LineWriter`] 출력 채널

pub mod astaro;
pub mod error;
pub mod syslog;

pub use astaro::{AstaroSink, LogType, format_event, log_type};
pub use error::OutputError;
pub use syslog::{Facility, Level, LineWriter, SyslogSinkConfig, UdpLineWriter, format_rfc3164};

//! Syslog 전송: facility/level 이름 해석, RFC 3164 라인, UDP 라인 writer
//!
//! # RFC 3164 메시지 형식
//! ```text
//! <PRI>Mmm dd hh:mm:ss HOSTNAME TAG[PID]: MSG
//! ```
//! PRI = facility * 8 + severity

use std::net::UdpSocket;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::OutputError;

// =============================================================================
// Facility / Level
// =============================================================================

/// syslog facility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    Kern,
    User,
    Daemon,
    Local(u8),
}

impl Facility {
    /// facility 코드 (RFC 3164 4.1.1)
    pub fn code(self) -> u8 {
        match self {
            Self::Kern => 0,
            Self::User => 1,
            Self::Daemon => 3,
            Self::Local(n) => 16 + n,
        }
    }

    /// `LOG_KERN` 같은 이름을 해석합니다. 빈 문자열은 `LOG_KERN`입니다.
    pub fn from_name(name: &str) -> Result<Self, OutputError> {
        let facility = match name {
            "" | "LOG_KERN" => Self::Kern,
            "LOG_USER" => Self::User,
            "LOG_DAEMON" => Self::Daemon,
            "LOG_LOCAL0" => Self::Local(0),
            "LOG_LOCAL1" => Self::Local(1),
            "LOG_LOCAL2" => Self::Local(2),
            "LOG_LOCAL3" => Self::Local(3),
            "LOG_LOCAL4" => Self::Local(4),
            "LOG_LOCAL5" => Self::Local(5),
            "LOG_LOCAL6" => Self::Local(6),
            "LOG_LOCAL7" => Self::Local(7),
            other => {
                return Err(OutputError::Config {
                    field: "facility".to_owned(),
                    reason: format!("unknown facility '{other}'"),
                });
            }
        };
        Ok(facility)
    }
}

/// syslog severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Emerg = 0,
    Alert = 1,
    Crit = 2,
    Err = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Level {
    /// `LOG_NOTICE` 같은 이름을 해석합니다. 빈 문자열은 `LOG_NOTICE`입니다.
    pub fn from_name(name: &str) -> Result<Self, OutputError> {
        let level = match name {
            "LOG_EMERG" => Self::Emerg,
            "LOG_ALERT" => Self::Alert,
            "LOG_CRIT" => Self::Crit,
            "LOG_ERR" => Self::Err,
            "LOG_WARNING" => Self::Warning,
            "" | "LOG_NOTICE" => Self::Notice,
            "LOG_INFO" => Self::Info,
            "LOG_DEBUG" => Self::Debug,
            other => {
                return Err(OutputError::Config {
                    field: "level".to_owned(),
                    reason: format!("unknown level '{other}'"),
                });
            }
        };
        Ok(level)
    }
}

/// PRI 값
pub fn priority(facility: Facility, level: Level) -> u8 {
    facility.code() * 8 + level as u8
}

/// RFC 3164 라인을 만듭니다.
pub fn format_rfc3164(
    pri: u8,
    timestamp: DateTime<Local>,
    hostname: &str,
    tag: &str,
    pid: u32,
    msg: &str,
) -> String {
    format!(
        "<{pri}>{} {hostname} {tag}[{pid}]: {msg}",
        timestamp.format("%b %e %H:%M:%S")
    )
}

// =============================================================================
// 설정
// =============================================================================

/// syslog 출력 스테이지 설정
///
/// ```toml
/// [[stack.stage]]
/// plugin = "ASTARO"
/// options = { facility = "LOG_LOCAL0", level = "LOG_INFO", target = "127.0.0.1:514" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyslogSinkConfig {
    /// facility 이름 (비어 있으면 `LOG_KERN`)
    pub facility: String,
    /// level 이름 (비어 있으면 `LOG_NOTICE`)
    pub level: String,
    /// syslog 수신 주소
    pub target: String,
    /// 라인에 기록할 호스트 이름
    pub hostname: String,
    /// 라인에 기록할 태그
    pub tag: String,
}

impl Default for SyslogSinkConfig {
    fn default() -> Self {
        Self {
            facility: String::new(),
            level: String::new(),
            target: "127.0.0.1:514".to_owned(),
            hostname: "localhost".to_owned(),
            tag: "ironlog".to_owned(),
        }
    }
}

impl SyslogSinkConfig {
    /// facility/level 이름과 대상 주소를 검증하고 PRI 값을 반환합니다.
    pub fn validate(&self) -> Result<u8, OutputError> {
        let facility = Facility::from_name(&self.facility)?;
        let level = Level::from_name(&self.level)?;

        if self.target.parse::<std::net::SocketAddr>().is_err() {
            return Err(OutputError::Config {
                field: "target".to_owned(),
                reason: format!("'{}' is not a socket address", self.target),
            });
        }
        if self.tag.is_empty() || self.tag.contains(char::is_whitespace) {
            return Err(OutputError::Config {
                field: "tag".to_owned(),
                reason: "must be a non-empty word".to_owned(),
            });
        }

        Ok(priority(facility, level))
    }
}

// =============================================================================
// LineWriter
// =============================================================================

/// 완성된 라인 하나를 내보내는 출력 채널
pub trait LineWriter: Send {
    /// 채널을 엽니다.
    fn open(&mut self) -> Result<(), OutputError>;

    /// 채널을 닫습니다.
    fn close(&mut self);

    /// 라인 하나를 기록합니다.
    fn write_line(&mut self, line: &str) -> Result<(), OutputError>;
}

/// UDP 데이터그램 하나에 라인 하나를 보내는 writer
#[derive(Debug)]
pub struct UdpLineWriter {
    target: String,
    socket: Option<UdpSocket>,
}

impl UdpLineWriter {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            socket: None,
        }
    }
}

impl LineWriter for UdpLineWriter {
    fn open(&mut self) -> Result<(), OutputError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(self.target.as_str())?;
        self.socket = Some(socket);
        Ok(())
    }

    fn close(&mut self) {
        self.socket = None;
    }

    fn write_line(&mut self, line: &str) -> Result<(), OutputError> {
        let socket = self.socket.as_ref().ok_or(OutputError::NotOpen)?;
        socket.send(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_priority_is_kern_notice() {
        let pri = SyslogSinkConfig::default().validate().unwrap();
        assert_eq!(pri, 5);
    }

    #[test]
    fn local_facilities_map_to_16_through_23() {
        assert_eq!(Facility::from_name("LOG_LOCAL0").unwrap().code(), 16);
        assert_eq!(Facility::from_name("LOG_LOCAL7").unwrap().code(), 23);
        assert_eq!(
            priority(Facility::Local(0), Level::from_name("LOG_INFO").unwrap()),
            134
        );
    }

    #[test]
    fn unknown_names_are_config_errors() {
        let err = Facility::from_name("LOG_FTP").unwrap_err();
        assert!(err.to_string().contains("LOG_FTP"));
        let err = Level::from_name("notice").unwrap_err();
        assert!(matches!(err, OutputError::Config { ref field, .. } if field == "level"));
    }

    #[test]
    fn invalid_target_is_rejected() {
        let config = SyslogSinkConfig {
            target: "syslog.local".to_owned(),
            ..SyslogSinkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rfc3164_line_layout() {
        let ts = Local.with_ymd_and_hms(2024, 1, 5, 9, 3, 7).unwrap();
        let line = format_rfc3164(4, ts, "fw01", "ironlog", 42, "hello");
        assert_eq!(line, "<4>Jan  5 09:03:07 fw01 ironlog[42]: hello");
    }

    #[test]
    fn write_before_open_fails() {
        let mut writer = UdpLineWriter::new("127.0.0.1:514");
        assert!(matches!(writer.write_line("x"), Err(OutputError::NotOpen)));
    }

    #[test]
    fn udp_writer_delivers_one_datagram_per_line() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut writer = UdpLineWriter::new(receiver.local_addr().unwrap().to_string());
        writer.open().unwrap();
        writer.write_line("<5>test line").unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"<5>test line");
    }
}

//! 설정 관리: ironlog.toml 파싱 및 런타임 설정
//!
//! [`IronlogConfig`]는 데몬 전체 설정을 담는 최상위 구조체입니다.
//! 스택은 `[[stack]]` 배열로, 각 스택의 스테이지는 `[[stack.stage]]` 배열로 선언합니다.
//! 스테이지 `options` 테이블은 해석하지 않고 플러그인 팩토리에 그대로 전달됩니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`IRONLOG_SOURCE_BIND=0.0.0.0:5140` 형식)
//! 3. 설정 파일 (`ironlog.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), ironlog_core::error::IronlogError> {
//! use ironlog_core::config::IronlogConfig;
//!
//! let config = IronlogConfig::load("ironlog.toml").await?;
//! for stack in &config.stacks {
//!     println!("{}: {} stages", stack.name, stack.stages.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, IronlogError};

/// Ironlog 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IronlogConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 패킷 소스 소켓 설정
    #[serde(default)]
    pub source: SourceConfig,
    /// 파이프라인 스택 목록
    #[serde(default, rename = "stack")]
    pub stacks: Vec<StackConfig>,
}

impl IronlogConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IronlogError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, IronlogError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IronlogError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                IronlogError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, IronlogError> {
        toml::from_str(toml_str).map_err(|e| {
            IronlogError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `IRONLOG_{SECTION}_{FIELD}`
    /// 스택 정의는 구조가 중첩되어 있으므로 오버라이드 대상이 아닙니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "IRONLOG_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "IRONLOG_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "IRONLOG_GENERAL_PID_FILE");

        // Source
        override_string(&mut self.source.bind, "IRONLOG_SOURCE_BIND");
        override_usize(
            &mut self.source.recv_buffer_size,
            "IRONLOG_SOURCE_RECV_BUFFER_SIZE",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IronlogError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.source.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "source.bind".to_owned(),
                reason: format!("'{}' is not a socket address", self.source.bind),
            }
            .into());
        }

        if self.source.recv_buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "source.recv_buffer_size".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        let mut stack_names = HashSet::new();
        for stack in &self.stacks {
            stack.validate()?;
            if !stack_names.insert(stack.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "stack.name".to_owned(),
                    reason: format!("duplicate stack name '{}'", stack.name),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 기록하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// 패킷 소스 소켓 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// UDP 바인드 주소
    pub bind: String,
    /// 수신 버퍼 크기 (바이트, 데이터그램 하나의 최대 크기)
    pub recv_buffer_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5140".to_owned(),
            recv_buffer_size: 150_000,
        }
    }
}

/// 파이프라인 스택 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// 스택 이름 (로그/메트릭 레이블)
    pub name: String,
    /// 순서가 있는 스테이지 목록
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageConfig>,
}

impl StackConfig {
    fn validate(&self) -> Result<(), IronlogError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "stack.name".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        if self.stages.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("stack.{}.stage", self.name),
                reason: "stack must contain at least one stage".to_owned(),
            }
            .into());
        }

        let mut ids = HashSet::new();
        for stage in &self.stages {
            if stage.plugin.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("stack.{}.stage.plugin", self.name),
                    reason: "must not be empty".to_owned(),
                }
                .into());
            }
            if !ids.insert(stage.instance_id()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("stack.{}.stage.id", self.name),
                    reason: format!("duplicate stage id '{}'", stage.instance_id()),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// 스테이지 인스턴스 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageConfig {
    /// 플러그인 정의 이름 (예: `ULOG`, `BASE`, `SQLITE3`)
    pub plugin: String,
    /// 스택 내 인스턴스 ID (생략 시 플러그인 이름)
    #[serde(default)]
    pub id: Option<String>,
    /// 플러그인 전용 옵션
    #[serde(default)]
    pub options: toml::Table,
}

impl StageConfig {
    /// 플러그인 이름과 빈 옵션으로 설정을 생성합니다.
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            id: None,
            options: toml::Table::new(),
        }
    }

    /// 인스턴스 ID를 지정합니다.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// 옵션 하나를 추가합니다.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// 실효 인스턴스 ID
    pub fn instance_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.plugin)
    }

    /// 옵션 테이블을 플러그인 전용 설정 구조체로 역직렬화합니다.
    pub fn parse_options<T: DeserializeOwned>(&self) -> Result<T, IronlogError> {
        toml::Value::Table(self.options.clone())
            .try_into()
            .map_err(|e: toml::de::Error| {
                IronlogError::Config(ConfigError::InvalidValue {
                    field: format!("{}.options", self.instance_id()),
                    reason: e.to_string(),
                })
            })
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const FULL: &str = r#"
[general]
log_level = "debug"
log_format = "pretty"

[source]
bind = "0.0.0.0:6000"

[[stack]]
name = "fw"

[[stack.stage]]
plugin = "ULOG"

[[stack.stage]]
plugin = "BASE"

[[stack.stage]]
plugin = "SQLITE3"
id = "db1"
options = { db = "/tmp/ulog.db", table = "flows", flush_threshold = 10 }
"#;

    #[derive(Debug, Deserialize)]
    struct DemoOptions {
        db: String,
        table: String,
        #[serde(default)]
        flush_threshold: usize,
    }

    #[test]
    fn default_config_has_sane_values() {
        let config = IronlogConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.source.recv_buffer_size, 150_000);
        assert!(config.stacks.is_empty());
    }

    #[test]
    fn default_config_passes_validation() {
        IronlogConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let config = IronlogConfig::parse("").unwrap();
        assert_eq!(config.source.bind, "127.0.0.1:5140");
        config.validate().unwrap();
    }

    #[test]
    fn parse_full_toml() {
        let config = IronlogConfig::parse(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.source.bind, "0.0.0.0:6000");
        assert_eq!(config.stacks.len(), 1);

        let stack = &config.stacks[0];
        assert_eq!(stack.name, "fw");
        let ids: Vec<_> = stack.stages.iter().map(StageConfig::instance_id).collect();
        assert_eq!(ids, vec!["ULOG", "BASE", "db1"]);
    }

    #[test]
    fn stage_options_deserialize_into_plugin_config() {
        let config = IronlogConfig::parse(FULL).unwrap();
        let db = &config.stacks[0].stages[2];
        let options: DemoOptions = db.parse_options().unwrap();
        assert_eq!(options.db, "/tmp/ulog.db");
        assert_eq!(options.table, "flows");
        assert_eq!(options.flush_threshold, 10);
    }

    #[test]
    fn stage_options_type_error_names_stage() {
        let stage = StageConfig::new("SQLITE3")
            .with_id("db9")
            .with_option("db", 42);
        let err = stage.parse_options::<DemoOptions>().unwrap_err();
        assert!(err.to_string().contains("db9.options"));
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let err = IronlogConfig::parse("[[stack]\nname=").unwrap_err();
        assert!(matches!(
            err,
            IronlogError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = IronlogConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("general.log_level"));
    }

    #[test]
    fn validate_rejects_bad_bind_address() {
        let mut config = IronlogConfig::default();
        config.source.bind = "not-an-addr".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("source.bind"));
    }

    #[test]
    fn validate_rejects_empty_stack() {
        let config = IronlogConfig::parse("[[stack]]\nname = \"empty\"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at least one stage"));
    }

    #[test]
    fn validate_rejects_duplicate_stage_ids() {
        let toml = r#"
[[stack]]
name = "fw"
[[stack.stage]]
plugin = "ULOG"
[[stack.stage]]
plugin = "ULOG"
"#;
        let err = IronlogConfig::parse(toml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("duplicate stage id 'ULOG'"));
    }

    #[test]
    fn validate_rejects_duplicate_stack_names() {
        let toml = r#"
[[stack]]
name = "fw"
[[stack.stage]]
plugin = "ULOG"
[[stack]]
name = "fw"
[[stack.stage]]
plugin = "ULOG"
"#;
        let err = IronlogConfig::parse(toml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("duplicate stack name"));
    }

    #[test]
    #[serial]
    fn env_override_source_bind() {
        let mut config = IronlogConfig::default();
        // SAFETY: #[serial] 로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
        unsafe { std::env::set_var("IRONLOG_SOURCE_BIND", "0.0.0.0:9999") };
        config.apply_env_overrides();
        unsafe { std::env::remove_var("IRONLOG_SOURCE_BIND") };
        assert_eq!(config.source.bind, "0.0.0.0:9999");
    }

    #[test]
    #[serial]
    fn env_override_invalid_usize_keeps_original() {
        let mut val = 7usize;
        // SAFETY: #[serial] 로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
        unsafe { std::env::set_var("TEST_IRONLOG_USIZE_BAD", "seven") };
        override_usize(&mut val, "TEST_IRONLOG_USIZE_BAD");
        unsafe { std::env::remove_var("TEST_IRONLOG_USIZE_BAD") };
        assert_eq!(val, 7);
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = "original".to_owned();
        override_string(&mut val, "TEST_IRONLOG_NONEXISTENT_12345");
        assert_eq!(val, "original");
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = IronlogConfig::parse(FULL).unwrap();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = IronlogConfig::parse(&toml_str).unwrap();
        assert_eq!(parsed.stacks[0].stages.len(), 3);
        assert_eq!(parsed.stacks[0].stages[2].instance_id(), "db1");
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = IronlogConfig::from_file("/nonexistent/path/ironlog.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IronlogError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}

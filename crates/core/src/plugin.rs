//! 플러그인 시스템: 스테이지 정의, 생명주기, 명시적 레지스트리
//!
//! [`PluginDefinition`]은 스테이지 템플릿(이름, 키 스키마, 팩토리)이며,
//! [`PluginRegistry`]는 시작 시점에 한 번 구성되어 스택 빌드 코드에 참조로 전달됩니다.
//! 등록은 명시적인 [`PluginRegistry::register`] 호출로만 이루어집니다.
//!
//! # 생명주기
//! ```text
//! Created → configure() → Configured → start() → Started → stop() → Stopped → Destroyed
//!                                          ▲                      │
//!                                          └──────── start() ─────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::StageConfig;
use crate::error::{IronlogError, StackError};
use crate::key::KeyDescriptor;
use crate::stack::{Inputs, Outputs};

// ─── StageKind ───────────────────────────────────────────────────────

/// 스테이지 유형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// 외부 이벤트를 받아 전파 사이클을 시작
    Source,
    /// 입력 키를 읽어 출력 키를 기록
    Filter,
    /// 최종 소비자 (포매터, 데이터베이스)
    Sink,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Filter => write!(f, "filter"),
            Self::Sink => write!(f, "sink"),
        }
    }
}

// ─── LifecycleState ──────────────────────────────────────────────────

/// 스테이지 인스턴스 생명주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// 생성됨 (configure 전)
    Created,
    /// 설정 및 바인딩 완료
    Configured,
    /// 실행 중 (interpret 호출 대상)
    Started,
    /// 정지됨 (재시작 가능)
    Stopped,
    /// 해제됨
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Configured => write!(f, "configured"),
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

// ─── Stage Trait ─────────────────────────────────────────────────────

/// 생명주기 훅에 전달되는 스테이지 컨텍스트
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// 스택 내 인스턴스 ID
    pub id: &'a str,
    /// 현재 입력 키 목록 (configure가 교체했다면 교체된 목록)
    pub inputs: &'a [KeyDescriptor],
    /// 출력 키 목록
    pub outputs: &'a [KeyDescriptor],
}

/// 모든 스테이지 구현이 따르는 trait
///
/// 스테이지별 동작은 이 trait 하나로 다형적으로 디스패치됩니다.
/// 모든 훅은 제어 스레드에서 동기적으로 호출됩니다.
///
/// # 구현 예시
/// ```ignore
/// struct Counter { seen: u64 }
///
/// impl Stage for Counter {
///     fn interpret(&mut self, _inputs: &Inputs<'_>, outputs: &mut Outputs<'_>)
///         -> Result<(), IronlogError>
///     {
///         self.seen += 1;
///         outputs.set(0, Value::UInt64(self.seen))?;
///         Ok(())
///     }
/// }
/// ```
pub trait Stage: Send {
    /// 스테이지를 설정합니다.
    ///
    /// 데이터베이스처럼 외부 스키마에 따라 입력 키가 결정되는 스테이지는
    /// 교체할 입력 키 목록을 `Some`으로 반환합니다.
    fn configure(
        &mut self,
        _ctx: &StageContext<'_>,
    ) -> Result<Option<Vec<KeyDescriptor>>, IronlogError> {
        Ok(None)
    }

    /// 리소스를 할당하고 스테이지를 시작합니다.
    fn start(&mut self, _ctx: &StageContext<'_>) -> Result<(), IronlogError> {
        Ok(())
    }

    /// 리소스를 해제하고 스테이지를 정지합니다.
    fn stop(&mut self, _ctx: &StageContext<'_>) -> Result<(), IronlogError> {
        Ok(())
    }

    /// 한 전파 사이클을 처리합니다.
    ///
    /// 바인딩된 입력만 읽고 자신의 출력만 기록해야 하며, 전파를 직접 호출하지 않습니다.
    /// 처리할 수 없는 사이클(비활성화 등)은 아무것도 하지 않고 `Ok(())`를 반환합니다.
    fn interpret(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
    ) -> Result<(), IronlogError>;

    /// 재설정 제어 메시지를 처리합니다. 기본 구현은 stop 후 start 입니다.
    fn reload(&mut self, ctx: &StageContext<'_>) -> Result<(), IronlogError> {
        self.stop(ctx)?;
        self.start(ctx)
    }
}

/// 스테이지 팩토리: 인스턴스 설정으로부터 스테이지 구현을 생성
pub type StageFactory =
    Box<dyn Fn(&StageConfig) -> Result<Box<dyn Stage>, IronlogError> + Send + Sync>;

// ─── PluginDefinition ────────────────────────────────────────────────

/// 플러그인 정의: 이름, 키 스키마, 팩토리를 묶은 스테이지 템플릿
pub struct PluginDefinition {
    name: String,
    kind: StageKind,
    input_keys: Vec<KeyDescriptor>,
    output_keys: Vec<KeyDescriptor>,
    factory: StageFactory,
}

impl PluginDefinition {
    /// 새 정의를 생성합니다. 키 스키마는 [`declare_schema`](Self::declare_schema)로 지정합니다.
    pub fn new<F>(name: impl Into<String>, kind: StageKind, factory: F) -> Self
    where
        F: Fn(&StageConfig) -> Result<Box<dyn Stage>, IronlogError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            input_keys: Vec::new(),
            output_keys: Vec::new(),
            factory: Box::new(factory),
        }
    }

    /// 입력/출력 키 스키마를 선언합니다.
    pub fn declare_schema(
        mut self,
        input_keys: Vec<KeyDescriptor>,
        output_keys: Vec<KeyDescriptor>,
    ) -> Self {
        self.input_keys = input_keys;
        self.output_keys = output_keys;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn input_keys(&self) -> &[KeyDescriptor] {
        &self.input_keys
    }

    pub fn output_keys(&self) -> &[KeyDescriptor] {
        &self.output_keys
    }

    /// 인스턴스 설정으로 스테이지 구현을 생성합니다.
    pub fn instantiate(&self, config: &StageConfig) -> Result<Box<dyn Stage>, IronlogError> {
        (self.factory)(config)
    }

    fn validate(&self) -> Result<(), StackError> {
        if self.name.is_empty() {
            return Err(StackError::InvalidDefinition {
                name: self.name.clone(),
                reason: "plugin name must not be empty".to_owned(),
            });
        }
        if let Some(key) = self.output_keys.iter().find(|k| k.key_type.is_none()) {
            return Err(StackError::InvalidDefinition {
                name: self.name.clone(),
                reason: format!("output key '{}' has no type", key.name),
            });
        }
        if self.kind == StageKind::Source && !self.input_keys.is_empty() {
            return Err(StackError::InvalidDefinition {
                name: self.name.clone(),
                reason: "source plugins must not declare input keys".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for PluginDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("input_keys", &self.input_keys.len())
            .field("output_keys", &self.output_keys.len())
            .finish()
    }
}

// ─── PluginRegistry ──────────────────────────────────────────────────

/// 플러그인 정의 레지스트리
///
/// 전역 가변 카탈로그 대신 시작 시점에 값으로 생성하여 참조로 전달합니다.
///
/// # 사용 예시
/// ```ignore
/// let mut registry = PluginRegistry::new();
/// registry.register(ironlog_packet::ulog::definition())?;
/// registry.register(ironlog_db::sqlite::definition())?;
///
/// let stack = PipelineStack::build("fw", &registry, &stack_config)?;
/// ```
#[derive(Debug, Default)]
pub struct PluginRegistry {
    definitions: Vec<PluginDefinition>,
}

impl PluginRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 플러그인 정의를 등록합니다.
    ///
    /// 같은 이름이 이미 있거나 정의가 잘못되었으면 에러를 반환합니다.
    pub fn register(&mut self, definition: PluginDefinition) -> Result<(), IronlogError> {
        definition.validate()?;
        if self.get(definition.name()).is_some() {
            return Err(StackError::AlreadyRegistered {
                name: definition.name().to_owned(),
            }
            .into());
        }
        tracing::debug!(
            plugin = definition.name(),
            kind = %definition.kind(),
            "registered plugin"
        );
        self.definitions.push(definition);
        Ok(())
    }

    /// 이름으로 정의를 조회합니다.
    pub fn get(&self, name: &str) -> Option<&PluginDefinition> {
        self.definitions.iter().find(|d| d.name() == name)
    }

    /// 등록된 정의 수를 반환합니다.
    pub fn count(&self) -> usize {
        self.definitions.len()
    }

    /// 등록 순서대로 플러그인 이름을 반환합니다.
    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name()).collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

//! Ironlog 코어: 키 모델, 플러그인 레지스트리, 파이프라인 스택, 전파 엔진
//!
//! 독립적으로 작성된 스테이지들이 컴파일 타임 결합 없이 타입이 지정된 값을
//! 교환할 수 있도록 하는 데이터 배선 계층입니다.
//!
//! - [`key`]: 키 디스크립터, 값 슬롯, 유효성 비트
//! - [`plugin`]: [`Stage`] trait, 플러그인 정의, 명시적 [`PluginRegistry`]
//! - [`stack`]: 가장 가까운 앞선 출력자 바인딩, 생명주기, 동기 전파
//! - [`config`]: `ironlog.toml` 설정
//! - [`metrics`]: 메트릭 이름 상수

pub mod config;
pub mod error;
pub mod key;
pub mod metrics;
pub mod plugin;
pub mod stack;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, IronlogError, KeyError, ParseError, StackError, StorageError};

// 설정
pub use config::{IronlogConfig, StackConfig, StageConfig};

// 키 모델
pub use key::{KeyDescriptor, KeyType, Slot, SlotRef, Value};

// 플러그인
pub use plugin::{LifecycleState, PluginDefinition, PluginRegistry, Stage, StageContext, StageKind};

// 스택
pub use stack::{Inputs, Outputs, PipelineStack, StageInstance};

//! 파이프라인 스택: 스테이지 배선, 생명주기, 동기 전파
//!
//! [`PipelineStack`]은 순서가 있는 스테이지 인스턴스 목록입니다.
//! 각 입력 키는 configure 시점에 한 번, 자신보다 앞선 스테이지 중
//! 같은 이름의 출력을 가진 가장 가까운 스테이지에 바인딩됩니다.
//!
//! # 전파
//! 소스 스테이지가 [`PipelineStack::ingest`]로 이벤트를 넣으면,
//! 원점 이후의 모든 시작된 스테이지가 순서대로 정확히 한 번씩 `interpret` 됩니다.
//! 한 스테이지의 에러는 기록만 되고 이후 스테이지로의 전파를 막지 않습니다.
//!
//! ```text
//! [0] ULOG ──▶ [1] BASE ──▶ [2] ASTARO ──▶ [3] SQLITE3
//!   raw.pkt ─────┘  ip.saddr ─────┴──────────────┘
//! ```

use metrics::counter;
use tracing::{debug, info, warn};

use crate::config::{StackConfig, StageConfig};
use crate::error::{ConfigError, IronlogError, KeyError, StackError};
use crate::key::{KeyDescriptor, KeyType, Slot, SlotRef, Value};
use crate::metrics as m;
use crate::plugin::{LifecycleState, PluginRegistry, Stage, StageContext, StageKind};

// ─── StageInstance ───────────────────────────────────────────────────

/// 스택 내의 스테이지 인스턴스
///
/// 출력 슬롯을 소유하고, 입력은 상위 스테이지 슬롯에 대한 읽기 전용 참조로만 가집니다.
pub struct StageInstance {
    id: String,
    plugin: String,
    kind: StageKind,
    input_keys: Vec<KeyDescriptor>,
    output_keys: Vec<KeyDescriptor>,
    bindings: Vec<Option<SlotRef>>,
    slots: Vec<Slot>,
    stage: Box<dyn Stage>,
    state: LifecycleState,
}

impl StageInstance {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// 현재 입력 키 목록 (동적 스키마 스테이지는 configure 이후 교체됨)
    pub fn input_keys(&self) -> &[KeyDescriptor] {
        &self.input_keys
    }

    pub fn output_keys(&self) -> &[KeyDescriptor] {
        &self.output_keys
    }

    /// 이름으로 출력 슬롯의 현재 값을 읽습니다.
    pub fn output(&self, name: &str) -> Option<&Value> {
        let idx = self.output_keys.iter().position(|k| k.name == name)?;
        self.slots.get(idx)?.read()
    }

    /// 컨텍스트와 함께 스테이지 훅을 호출합니다.
    fn with_stage<R>(&mut self, f: impl FnOnce(&mut dyn Stage, &StageContext<'_>) -> R) -> R {
        let ctx = StageContext {
            id: &self.id,
            inputs: &self.input_keys,
            outputs: &self.output_keys,
        };
        f(self.stage.as_mut(), &ctx)
    }

    fn start(&mut self) -> Result<(), IronlogError> {
        self.with_stage(|stage, ctx| stage.start(ctx))?;
        self.state = LifecycleState::Started;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), IronlogError> {
        // 정지 훅이 실패해도 인스턴스는 더 이상 interpret 대상이 아님
        self.state = LifecycleState::Stopped;
        self.with_stage(|stage, ctx| stage.stop(ctx))
    }
}

impl std::fmt::Debug for StageInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageInstance")
            .field("id", &self.id)
            .field("plugin", &self.plugin)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("bindings", &self.bindings)
            .finish()
    }
}

// ─── Inputs / Outputs ────────────────────────────────────────────────

/// `interpret`에 전달되는 입력 뷰 (상위 슬롯 읽기 전용)
pub struct Inputs<'a> {
    keys: &'a [KeyDescriptor],
    bindings: &'a [Option<SlotRef>],
    upstream: &'a [StageInstance],
}

impl<'a> Inputs<'a> {
    /// 입력 키 수
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// 입력 디스크립터
    pub fn key(&self, idx: usize) -> Option<&'a KeyDescriptor> {
        self.keys.get(idx)
    }

    /// 입력 키 목록
    pub fn keys(&self) -> &'a [KeyDescriptor] {
        self.keys
    }

    /// 바인딩 여부
    pub fn is_bound(&self, idx: usize) -> bool {
        matches!(self.bindings.get(idx), Some(Some(_)))
    }

    /// 인덱스로 입력 값을 읽습니다. 바인딩이 없거나 슬롯이 무효면 `None`입니다.
    pub fn get(&self, idx: usize) -> Option<&'a Value> {
        let slot_ref = (*self.bindings.get(idx)?)?;
        self.upstream.get(slot_ref.stage)?.slots.get(slot_ref.slot)?.read()
    }

    /// 이름으로 입력 값을 읽습니다.
    pub fn by_name(&self, name: &str) -> Option<&'a Value> {
        let idx = self.keys.iter().position(|k| k.name == name)?;
        self.get(idx)
    }
}

/// `interpret`에 전달되는 출력 뷰 (자기 슬롯만 기록 가능)
pub struct Outputs<'a> {
    keys: &'a [KeyDescriptor],
    slots: &'a mut [Slot],
}

impl<'a> Outputs<'a> {
    /// 출력 키 수
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 출력 키 이름의 인덱스
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.keys.iter().position(|k| k.name == name)
    }

    /// 슬롯에 값을 기록합니다.
    ///
    /// 슬롯 타입과 다른 값은 기록하지 않고 [`KeyError::TypeMismatch`]를 반환합니다.
    pub fn set(&mut self, idx: usize, value: impl Into<Value>) -> Result<(), KeyError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(idx)
            .ok_or(KeyError::IndexOutOfRange { index: idx, len })?;
        slot.write(value.into()).map_err(|e| match e {
            KeyError::TypeMismatch {
                expected, actual, ..
            } => KeyError::TypeMismatch {
                key: self.keys.get(idx).map(|k| k.name.clone()).unwrap_or_default(),
                expected,
                actual,
            },
            other => other,
        })
    }

    /// 슬롯을 무효화합니다 (범위 밖 인덱스는 무시).
    pub fn invalidate(&mut self, idx: usize) {
        if let Some(slot) = self.slots.get_mut(idx) {
            slot.invalidate();
        }
    }

    /// 모든 출력 슬롯을 무효화합니다.
    pub fn invalidate_all(&mut self) {
        self.slots.iter_mut().for_each(Slot::invalidate);
    }

    /// 이번 사이클에 기록된 값을 읽습니다.
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.slots.get(idx)?.read()
    }
}

// ─── PipelineStack ───────────────────────────────────────────────────

/// 순서가 있는 스테이지 인스턴스 스택
#[derive(Debug)]
pub struct PipelineStack {
    name: String,
    instances: Vec<StageInstance>,
    cycles: u64,
}

impl PipelineStack {
    /// 스택 설정으로부터 인스턴스를 생성합니다.
    pub fn from_config(
        config: &StackConfig,
        registry: &PluginRegistry,
    ) -> Result<Self, IronlogError> {
        Self::build(&config.name, registry, &config.stages)
    }

    /// 레지스트리의 플러그인 정의로 스테이지를 생성합니다 (바인딩 전, `Created` 상태).
    ///
    /// 소스 스테이지는 스택의 첫 번째 위치에만 올 수 있습니다.
    pub fn build(
        name: &str,
        registry: &PluginRegistry,
        stages: &[StageConfig],
    ) -> Result<Self, IronlogError> {
        let mut instances = Vec::with_capacity(stages.len());

        for (pos, config) in stages.iter().enumerate() {
            let definition = registry
                .get(&config.plugin)
                .ok_or_else(|| StackError::UnknownPlugin {
                    name: config.plugin.clone(),
                })?;

            if definition.kind() == StageKind::Source && pos != 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("stack.{name}.stage.{}", config.instance_id()),
                    reason: "source stages must come first in a stack".to_owned(),
                }
                .into());
            }

            let stage = definition.instantiate(config)?;
            // 출력 키 타입은 등록 시점에 검증됨
            let slots = definition
                .output_keys()
                .iter()
                .map(|k| Slot::new(k.key_type.unwrap_or(KeyType::Raw)))
                .collect();

            instances.push(StageInstance {
                id: config.instance_id().to_owned(),
                plugin: definition.name().to_owned(),
                kind: definition.kind(),
                input_keys: definition.input_keys().to_vec(),
                output_keys: definition.output_keys().to_vec(),
                bindings: Vec::new(),
                slots,
                stage,
                state: LifecycleState::Created,
            });
        }

        debug!(stack = name, stages = instances.len(), "stack built");

        Ok(Self {
            name: name.to_owned(),
            instances,
            cycles: 0,
        })
    }

    /// 각 스테이지를 순서대로 설정하고 입력을 바인딩합니다.
    ///
    /// 스테이지가 입력 키 목록을 교체하면 교체된 목록으로 바인딩합니다.
    /// 필수 키를 해결하지 못하면 스택 전체가 실패합니다.
    pub fn configure(&mut self) -> Result<(), IronlogError> {
        for i in 0..self.instances.len() {
            let (upstream, rest) = self.instances.split_at_mut(i);
            let inst = &mut rest[0];

            if inst.state != LifecycleState::Created {
                return Err(StackError::InvalidState {
                    stage: inst.id.clone(),
                    current: inst.state.to_string(),
                    expected: LifecycleState::Created.to_string(),
                }
                .into());
            }

            if let Some(keys) = inst.with_stage(|stage, ctx| stage.configure(ctx))? {
                debug!(stage = %inst.id, keys = keys.len(), "stage replaced its input keys");
                inst.input_keys = keys;
            }

            inst.bindings = resolve_bindings(&inst.id, &inst.input_keys, upstream)?;
            inst.state = LifecycleState::Configured;
        }

        info!(stack = %self.name, stages = self.instances.len(), "stack configured");
        Ok(())
    }

    /// 설정된(또는 정지된) 모든 스테이지를 순서대로 시작합니다.
    ///
    /// 하나라도 실패하면 이번 호출에서 시작한 스테이지를 역순으로 정지하고 에러를 반환합니다.
    pub fn start(&mut self) -> Result<(), IronlogError> {
        let mut started = Vec::new();
        for i in 0..self.instances.len() {
            let inst = &mut self.instances[i];
            match inst.state {
                LifecycleState::Configured | LifecycleState::Stopped => {}
                LifecycleState::Started => continue,
                other => {
                    let err = StackError::InvalidState {
                        stage: inst.id.clone(),
                        current: other.to_string(),
                        expected: LifecycleState::Configured.to_string(),
                    };
                    self.rollback(&started);
                    return Err(err.into());
                }
            }

            if let Err(e) = inst.start() {
                warn!(stack = %self.name, stage = %inst.id, error = %e, "stage failed to start");
                self.rollback(&started);
                return Err(e);
            }
            started.push(i);
        }

        info!(stack = %self.name, "stack started");
        Ok(())
    }

    fn rollback(&mut self, started: &[usize]) {
        for &i in started.iter().rev() {
            if let Err(e) = self.instances[i].stop() {
                warn!(stage = %self.instances[i].id, error = %e, "rollback stop failed");
            }
        }
    }

    /// 시작된 모든 스테이지를 역순으로 정지합니다.
    ///
    /// 개별 정지 실패는 모아서 하나의 에러로 반환하며, 나머지 스테이지 정지는 계속합니다.
    pub fn stop(&mut self) -> Result<(), IronlogError> {
        let mut errors = Vec::new();
        for inst in self.instances.iter_mut().rev() {
            if inst.state != LifecycleState::Started {
                continue;
            }
            if let Err(e) = inst.stop() {
                warn!(stack = %self.name, stage = %inst.id, error = %e, "stage failed to stop");
                errors.push(format!("{}: {e}", inst.id));
            }
        }

        if errors.is_empty() {
            info!(stack = %self.name, "stack stopped");
            Ok(())
        } else {
            Err(StackError::StopFailed(errors.join("; ")).into())
        }
    }

    /// 재설정 제어 메시지: 시작된 모든 스테이지의 리소스를 정지 후 다시 시작합니다.
    ///
    /// 전파 사이클 사이에서만 호출됩니다. 재시작에 실패한 스테이지는 `Stopped` 상태가 되어
    /// 이후 사이클에서 건너뜁니다.
    pub fn reload(&mut self) -> Result<(), IronlogError> {
        let mut errors = Vec::new();
        for inst in &mut self.instances {
            if inst.state != LifecycleState::Started {
                continue;
            }
            if let Err(e) = inst.with_stage(|stage, ctx| stage.reload(ctx)) {
                warn!(stack = %self.name, stage = %inst.id, error = %e, "stage failed to reload");
                inst.state = LifecycleState::Stopped;
                errors.push(format!("{}: {e}", inst.id));
            }
        }

        if errors.is_empty() {
            info!(stack = %self.name, "stack reloaded");
            Ok(())
        } else {
            Err(StackError::ReloadFailed(errors.join("; ")).into())
        }
    }

    /// 스택을 정지하고 모든 인스턴스를 `Destroyed`로 표시합니다.
    pub fn destroy(&mut self) -> Result<(), IronlogError> {
        let result = self.stop();
        for inst in &mut self.instances {
            inst.state = LifecycleState::Destroyed;
        }
        result
    }

    /// 소스 진입점: 원점 스테이지 출력을 무효화하고 `fill`로 채운 뒤 전파합니다.
    ///
    /// `fill`이 실패하면 전파하지 않고 에러를 반환합니다.
    /// 성공 시 이번 사이클에서 실패한 스테이지 수를 반환합니다.
    pub fn ingest<F>(&mut self, origin: usize, fill: F) -> Result<usize, IronlogError>
    where
        F: FnOnce(&mut Outputs<'_>) -> Result<(), IronlogError>,
    {
        let len = self.instances.len();
        let inst = self
            .instances
            .get_mut(origin)
            .ok_or(StackError::IndexOutOfRange { index: origin, len })?;

        if inst.state != LifecycleState::Started {
            return Err(StackError::InvalidState {
                stage: inst.id.clone(),
                current: inst.state.to_string(),
                expected: LifecycleState::Started.to_string(),
            }
            .into());
        }

        let mut outputs = Outputs {
            keys: &inst.output_keys,
            slots: &mut inst.slots,
        };
        outputs.invalidate_all();
        fill(&mut outputs)?;

        Ok(self.propagate(origin))
    }

    /// `origin` 이후의 시작된 모든 스테이지를 순서대로 한 번씩 실행합니다.
    ///
    /// 하류 스테이지의 출력 슬롯은 상태와 무관하게 사이클마다 먼저 무효화되므로,
    /// 정지된 스테이지나 기록에 실패한 스테이지의 이전 값은 보이지 않습니다.
    /// 스테이지 에러는 기록하고 계속 진행합니다. 실패한 스테이지 수를 반환합니다.
    pub fn propagate(&mut self, origin: usize) -> usize {
        self.cycles += 1;
        counter!(m::STACK_CYCLES_TOTAL, m::LABEL_STACK => self.name.clone())
            .increment(1);

        let mut failures = 0;
        for i in (origin + 1)..self.instances.len() {
            let (upstream, rest) = self.instances.split_at_mut(i);
            let inst = &mut rest[0];
            inst.slots.iter_mut().for_each(Slot::invalidate);
            if inst.state != LifecycleState::Started {
                continue;
            }

            let inputs = Inputs {
                keys: &inst.input_keys,
                bindings: &inst.bindings,
                upstream,
            };
            let mut outputs = Outputs {
                keys: &inst.output_keys,
                slots: &mut inst.slots,
            };

            if let Err(e) = inst.stage.interpret(&inputs, &mut outputs) {
                failures += 1;
                counter!(m::STACK_STAGE_ERRORS_TOTAL, m::LABEL_STAGE => inst.id.clone())
                    .increment(1);
                warn!(
                    stack = %self.name,
                    stage = %inst.id,
                    error = %e,
                    "stage failed to interpret event, continuing"
                );
            }
        }
        failures
    }

    // ─── 조회 ───

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// 지금까지 실행된 전파 사이클 수
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// 첫 번째 소스 스테이지의 인덱스
    pub fn source_index(&self) -> Option<usize> {
        self.instances
            .iter()
            .position(|inst| inst.kind == StageKind::Source)
    }

    /// 인덱스로 인스턴스를 조회합니다.
    pub fn instance(&self, idx: usize) -> Option<&StageInstance> {
        self.instances.get(idx)
    }

    /// ID로 인스턴스 인덱스를 찾습니다.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.instances.iter().position(|inst| inst.id == id)
    }

    /// 스테이지 입력 키의 바인딩을 조회합니다.
    pub fn binding(&self, stage: usize, key: &str) -> Option<SlotRef> {
        let inst = self.instances.get(stage)?;
        let idx = inst.input_keys.iter().position(|k| k.name == key)?;
        *inst.bindings.get(idx)?
    }

    /// 모든 인스턴스 상태 (인덱스 순서)
    pub fn states(&self) -> Vec<LifecycleState> {
        self.instances.iter().map(|inst| inst.state).collect()
    }

    /// 인스턴스 컨텍스트 순회 (진단용)
    pub fn describe(&self) -> Vec<String> {
        self.instances
            .iter()
            .map(|inst| {
                format!(
                    "{}({}) in={} out={} [{}]",
                    inst.id,
                    inst.plugin,
                    inst.input_keys.len(),
                    inst.output_keys.len(),
                    inst.state
                )
            })
            .collect()
    }
}

impl Drop for PipelineStack {
    fn drop(&mut self) {
        if self
            .instances
            .iter()
            .any(|inst| inst.state == LifecycleState::Started)
        {
            if let Err(e) = self.stop() {
                warn!(stack = %self.name, error = %e, "stop on drop failed");
            }
        }
    }
}

/// 가장 가까운 앞선 출력자 규칙으로 입력 키를 바인딩합니다.
fn resolve_bindings(
    stage_id: &str,
    inputs: &[KeyDescriptor],
    upstream: &[StageInstance],
) -> Result<Vec<Option<SlotRef>>, ConfigError> {
    let mut bindings = Vec::with_capacity(inputs.len());

    for key in inputs {
        if key.inactive {
            bindings.push(None);
            continue;
        }

        let found = upstream.iter().enumerate().rev().find_map(|(s, inst)| {
            inst.output_keys
                .iter()
                .position(|out| out.name == key.name)
                .map(|o| (s, o, inst.output_keys[o].key_type))
        });

        match found {
            Some((stage, slot, actual)) => {
                if let (Some(expected), Some(actual)) = (key.key_type, actual) {
                    if expected != actual {
                        return Err(ConfigError::KeyTypeMismatch {
                            stage: stage_id.to_owned(),
                            key: key.name.clone(),
                            expected: expected.to_string(),
                            actual: actual.to_string(),
                        });
                    }
                }
                bindings.push(Some(SlotRef { stage, slot }));
            }
            None if key.required => {
                return Err(ConfigError::UnresolvedKey {
                    stage: stage_id.to_owned(),
                    key: key.name.clone(),
                });
            }
            None => {
                debug!(stage = stage_id, key = %key.name, "optional input key left unbound");
                bindings.push(None);
            }
        }
    }

    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginDefinition;
    use std::sync::{Arc, Mutex};

    /// 소스: ingest fill 클로저로만 값이 채워짐
    struct Passive;

    impl Stage for Passive {
        fn interpret(&mut self, _: &Inputs<'_>, _: &mut Outputs<'_>) -> Result<(), IronlogError> {
            Ok(())
        }
    }

    /// 입력 `n`을 두 배로 만들어 `n2`에 기록
    struct Doubler;

    impl Stage for Doubler {
        fn interpret(
            &mut self,
            inputs: &Inputs<'_>,
            outputs: &mut Outputs<'_>,
        ) -> Result<(), IronlogError> {
            match inputs.get(0).and_then(Value::as_u32) {
                Some(n) => outputs.set(0, n * 2)?,
                None => outputs.invalidate(0),
            }
            Ok(())
        }
    }

    /// `Doubler`와 같지만 첫 시작 이후의 재시작은 실패
    #[derive(Default)]
    struct Flaky {
        starts: u32,
    }

    impl Stage for Flaky {
        fn start(&mut self, _: &StageContext<'_>) -> Result<(), IronlogError> {
            self.starts += 1;
            if self.starts > 1 {
                return Err(crate::error::StorageError::Connection("gone".to_owned()).into());
            }
            Ok(())
        }

        fn interpret(
            &mut self,
            inputs: &Inputs<'_>,
            outputs: &mut Outputs<'_>,
        ) -> Result<(), IronlogError> {
            Doubler.interpret(inputs, outputs)
        }
    }

    /// 짝수 입력이면 잘못된 타입을 기록하려다 실패
    struct Sloppy;

    impl Stage for Sloppy {
        fn interpret(
            &mut self,
            inputs: &Inputs<'_>,
            outputs: &mut Outputs<'_>,
        ) -> Result<(), IronlogError> {
            match inputs.get(0).and_then(Value::as_u32) {
                Some(n) if n % 2 == 0 => outputs.set(0, "even")?,
                Some(n) => outputs.set(0, n * 2)?,
                None => {}
            }
            Ok(())
        }
    }

    /// 읽은 값을 기록하는 싱크
    struct Recorder {
        seen: Arc<Mutex<Vec<Option<u32>>>>,
        fail: bool,
    }

    impl Stage for Recorder {
        fn interpret(
            &mut self,
            inputs: &Inputs<'_>,
            _: &mut Outputs<'_>,
        ) -> Result<(), IronlogError> {
            self.seen
                .lock()
                .unwrap()
                .push(inputs.get(0).and_then(Value::as_u32));
            if self.fail {
                return Err(crate::error::StorageError::Query("boom".to_owned()).into());
            }
            Ok(())
        }
    }

    fn registry(seen: Arc<Mutex<Vec<Option<u32>>>>) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry
            .register(
                PluginDefinition::new("SRC", StageKind::Source, |_| Ok(Box::new(Passive)))
                    .declare_schema(vec![], vec![KeyDescriptor::new("n", KeyType::UInt32)]),
            )
            .unwrap();
        registry
            .register(
                PluginDefinition::new("DOUBLE", StageKind::Filter, |_| Ok(Box::new(Doubler)))
                    .declare_schema(
                        vec![KeyDescriptor::new("n", KeyType::UInt32).required()],
                        vec![KeyDescriptor::new("n2", KeyType::UInt32)],
                    ),
            )
            .unwrap();
        let failing = seen.clone();
        registry
            .register(
                PluginDefinition::new("REC", StageKind::Sink, move |cfg| {
                    Ok(Box::new(Recorder {
                        seen: failing.clone(),
                        fail: cfg.options.contains_key("fail"),
                    }))
                })
                .declare_schema(vec![KeyDescriptor::untyped("n2")], vec![]),
            )
            .unwrap();
        registry
    }

    fn register_filter(
        registry: &mut PluginRegistry,
        name: &str,
        make: fn() -> Box<dyn Stage>,
    ) {
        registry
            .register(
                PluginDefinition::new(name, StageKind::Filter, move |_| Ok(make()))
                    .declare_schema(
                        vec![KeyDescriptor::new("n", KeyType::UInt32).required()],
                        vec![KeyDescriptor::new("n2", KeyType::UInt32)],
                    ),
            )
            .unwrap();
    }

    fn stages(specs: &[&str]) -> Vec<StageConfig> {
        specs
            .iter()
            .enumerate()
            .map(|(i, p)| StageConfig::new(*p).with_id(format!("{p}{i}")))
            .collect()
    }

    #[test]
    fn build_rejects_unknown_plugin() {
        let reg = registry(Arc::default());
        let err = PipelineStack::build("t", &reg, &stages(&["SRC", "NOPE"])).unwrap_err();
        assert!(err.to_string().contains("NOPE"));
    }

    #[test]
    fn build_rejects_source_after_first_position() {
        let reg = registry(Arc::default());
        let err = PipelineStack::build("t", &reg, &stages(&["DOUBLE", "SRC"])).unwrap_err();
        assert!(err.to_string().contains("must come first"));
    }

    #[test]
    fn configure_fails_on_unresolved_required_key() {
        let reg = registry(Arc::default());
        let mut stack = PipelineStack::build("t", &reg, &stages(&["DOUBLE"])).unwrap();
        let err = stack.configure().unwrap_err();
        assert!(matches!(
            err,
            IronlogError::Config(ConfigError::UnresolvedKey { ref key, .. }) if key == "n"
        ));
    }

    #[test]
    fn propagation_runs_downstream_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reg = registry(seen.clone());
        let mut stack =
            PipelineStack::build("t", &reg, &stages(&["SRC", "DOUBLE", "REC"])).unwrap();
        stack.configure().unwrap();
        stack.start().unwrap();

        for n in [1u32, 2, 3] {
            let failures = stack.ingest(0, |out| Ok(out.set(0, n)?)).unwrap();
            assert_eq!(failures, 0);
        }

        assert_eq!(*seen.lock().unwrap(), vec![Some(2), Some(4), Some(6)]);
        assert_eq!(stack.cycles(), 3);
    }

    #[test]
    fn absent_source_value_propagates_as_absent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reg = registry(seen.clone());
        let mut stack =
            PipelineStack::build("t", &reg, &stages(&["SRC", "DOUBLE", "REC"])).unwrap();
        stack.configure().unwrap();
        stack.start().unwrap();

        stack.ingest(0, |out| Ok(out.set(0, 5u32)?)).unwrap();
        // 두 번째 사이클은 아무것도 채우지 않음: 이전 값이 보이면 안 됨
        stack.ingest(0, |_| Ok(())).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Some(10), None]);
    }

    #[test]
    fn failing_stage_does_not_stop_siblings() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reg = registry(seen.clone());
        let mut configs = stages(&["SRC", "DOUBLE", "REC", "REC"]);
        configs[2].options.insert("fail".to_owned(), true.into());
        let mut stack = PipelineStack::build("t", &reg, &configs).unwrap();
        stack.configure().unwrap();
        stack.start().unwrap();

        let failures = stack.ingest(0, |out| Ok(out.set(0, 7u32)?)).unwrap();
        assert_eq!(failures, 1);
        assert_eq!(*seen.lock().unwrap(), vec![Some(14), Some(14)]);
    }

    #[test]
    fn fill_error_skips_propagation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reg = registry(seen.clone());
        let mut stack =
            PipelineStack::build("t", &reg, &stages(&["SRC", "DOUBLE", "REC"])).unwrap();
        stack.configure().unwrap();
        stack.start().unwrap();

        let err = stack
            .ingest(0, |out| Ok(out.set(0, "wrong type")?))
            .unwrap_err();
        assert!(err.to_string().contains("'n'"));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(stack.cycles(), 0);
    }

    #[test]
    fn ingest_requires_started_stack() {
        let reg = registry(Arc::default());
        let mut stack = PipelineStack::build("t", &reg, &stages(&["SRC"])).unwrap();
        stack.configure().unwrap();
        assert!(stack.ingest(0, |_| Ok(())).is_err());
        assert!(stack.ingest(5, |_| Ok(())).is_err());
    }

    #[test]
    fn stopped_stages_are_skipped_and_restartable() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reg = registry(seen.clone());
        let mut stack =
            PipelineStack::build("t", &reg, &stages(&["SRC", "DOUBLE", "REC"])).unwrap();
        stack.configure().unwrap();
        stack.start().unwrap();
        stack.stop().unwrap();
        assert_eq!(stack.states(), vec![LifecycleState::Stopped; 3]);

        stack.start().unwrap();
        stack.ingest(0, |out| Ok(out.set(0, 1u32)?)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some(2)]);
    }

    #[test]
    fn stage_stopped_by_failed_reload_hides_its_last_outputs() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut reg = registry(seen.clone());
        register_filter(&mut reg, "FLAKY", || Box::new(Flaky::default()));
        let mut stack =
            PipelineStack::build("t", &reg, &stages(&["SRC", "FLAKY", "REC"])).unwrap();
        stack.configure().unwrap();
        stack.start().unwrap();

        stack.ingest(0, |out| Ok(out.set(0, 1u32)?)).unwrap();
        let err = stack.reload().unwrap_err();
        assert!(matches!(
            err,
            IronlogError::Stack(StackError::ReloadFailed(ref msg)) if msg.contains("FLAKY1")
        ));
        assert_eq!(
            stack.states(),
            vec![
                LifecycleState::Started,
                LifecycleState::Stopped,
                LifecycleState::Started
            ]
        );

        stack.ingest(0, |out| Ok(out.set(0, 50u32)?)).unwrap();
        stack.ingest(0, |_| Ok(())).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some(2), None, None]);
    }

    #[test]
    fn failed_write_does_not_leave_previous_value_visible() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut reg = registry(seen.clone());
        register_filter(&mut reg, "SLOPPY", || Box::new(Sloppy));
        let mut stack =
            PipelineStack::build("t", &reg, &stages(&["SRC", "SLOPPY", "REC"])).unwrap();
        stack.configure().unwrap();
        stack.start().unwrap();

        assert_eq!(stack.ingest(0, |out| Ok(out.set(0, 3u32)?)).unwrap(), 0);
        assert_eq!(stack.ingest(0, |out| Ok(out.set(0, 4u32)?)).unwrap(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![Some(6), None]);
    }

    #[test]
    fn configure_twice_is_rejected() {
        let reg = registry(Arc::default());
        let mut stack = PipelineStack::build("t", &reg, &stages(&["SRC"])).unwrap();
        stack.configure().unwrap();
        assert!(stack.configure().is_err());
    }

    #[test]
    fn outputs_set_reports_key_name_on_type_mismatch() {
        let keys = vec![KeyDescriptor::new("ip.ttl", KeyType::UInt8)];
        let mut slots = vec![Slot::new(KeyType::UInt8)];
        let mut outputs = Outputs {
            keys: &keys,
            slots: &mut slots,
        };
        let err = outputs.set(0, 64u32).unwrap_err();
        assert!(err.to_string().contains("ip.ttl"));
        assert!(outputs.set(3, 1u8).is_err());
        outputs.set(0, 64u8).unwrap();
        assert_eq!(outputs.get(0), Some(&Value::UInt8(64)));
    }
}

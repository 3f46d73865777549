//! 전파 사이클 벤치마크
//!
//! 소스 → N개 필터 → 싱크 스택에서 ingest 한 번의 비용을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ironlog_core::{
    Inputs, IronlogError, KeyDescriptor, KeyType, Outputs, PipelineStack, PluginDefinition,
    PluginRegistry, Stage, StageConfig, StageKind, Value,
};

struct Source;

impl Stage for Source {
    fn interpret(&mut self, _: &Inputs<'_>, _: &mut Outputs<'_>) -> Result<(), IronlogError> {
        Ok(())
    }
}

/// `counter`를 읽어 1 증가시켜 다시 `counter`로 출력
struct Increment;

impl Stage for Increment {
    fn interpret(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
    ) -> Result<(), IronlogError> {
        let n = inputs.get(0).and_then(Value::as_u32).unwrap_or(0);
        outputs.set(0, n + 1)?;
        Ok(())
    }
}

struct Sink;

impl Stage for Sink {
    fn interpret(&mut self, inputs: &Inputs<'_>, _: &mut Outputs<'_>) -> Result<(), IronlogError> {
        black_box(inputs.get(0));
        Ok(())
    }
}

fn registry() -> PluginRegistry {
    let counter = || KeyDescriptor::new("counter", KeyType::UInt32);
    let mut registry = PluginRegistry::new();
    registry
        .register(
            PluginDefinition::new("SRC", StageKind::Source, |_| Ok(Box::new(Source)))
                .declare_schema(vec![], vec![counter()]),
        )
        .unwrap();
    registry
        .register(
            PluginDefinition::new("INC", StageKind::Filter, |_| Ok(Box::new(Increment)))
                .declare_schema(vec![counter().required()], vec![counter()]),
        )
        .unwrap();
    registry
        .register(
            PluginDefinition::new("SINK", StageKind::Sink, |_| Ok(Box::new(Sink)))
                .declare_schema(vec![counter().required()], vec![]),
        )
        .unwrap();
    registry
}

fn bench_propagate(c: &mut Criterion) {
    let registry = registry();
    let mut group = c.benchmark_group("propagate");
    group.throughput(Throughput::Elements(1));

    for filters in [0usize, 4, 16] {
        let mut stages = vec![StageConfig::new("SRC")];
        stages.extend((0..filters).map(|i| StageConfig::new("INC").with_id(format!("inc{i}"))));
        stages.push(StageConfig::new("SINK"));

        let mut stack = PipelineStack::build("bench", &registry, &stages).unwrap();
        stack.configure().unwrap();
        stack.start().unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(filters), &filters, |b, _| {
            b.iter(|| {
                stack
                    .ingest(0, |out| {
                        out.set(0, black_box(1u32))?;
                        Ok(())
                    })
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_propagate);
criterion_main!(benches);

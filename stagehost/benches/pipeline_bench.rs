//! Benchmarks for pipeline building, preflight and execution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use stagehost::plugins::ModuleLoader;
use stagehost::prelude::*;

fn registry() -> Arc<StageRegistry> {
    let registry = Arc::new(StageRegistry::new());
    let loader = ModuleLoader::new(Arc::clone(&registry));
    if let Err(e) = loader.register_builtin() {
        panic!("core stages failed to register: {e}");
    }
    registry
}

fn description(stages: usize) -> Value {
    let mut root = Map::new();
    root.insert(
        "PipelineBuilder".into(),
        json!({"Name": "Bench", "Number_Filters": stages, "Version": 6}),
    );
    for i in 0..stages {
        root.insert(
            i.to_string(),
            json!({"Filter_Name": "ErrorWarningStage", "Filter_Human_Label": format!("Stage {i}")}),
        );
    }
    Value::Object(root)
}

fn pipeline_benchmark(c: &mut Criterion) {
    let registry = registry();

    let mut group = c.benchmark_group("pipeline");
    for stages in [1usize, 16, 128] {
        let value = description(stages);

        group.bench_with_input(BenchmarkId::new("build", stages), &value, |b, value| {
            b.iter(|| black_box(PipelineReader::new(&registry).read(value)))
        });

        group.bench_with_input(BenchmarkId::new("preflight", stages), &value, |b, value| {
            let Ok(mut pipeline) = PipelineReader::new(&registry).read(value) else {
                return;
            };
            b.iter(|| black_box(pipeline.preflight()))
        });

        group.bench_with_input(BenchmarkId::new("execute", stages), &value, |b, value| {
            let Ok(mut pipeline) = PipelineReader::new(&registry).read(value) else {
                return;
            };
            b.iter(|| black_box(pipeline.execute().is_completed()))
        });
    }
    group.finish();
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);

//! Benchmarks for decision evaluation and full runs.

use std::sync::Arc;

use approver::core::{StageResult, Submission};
use approver::persistence::{InMemoryRecordStore, PersistenceConfig, PersistenceStep};
use approver::pipeline::{decide, PipelineBuilder, DEFAULT_REJECTION_CODE};
use approver::testing::{email_validator, pincode_validator, valid_submission};
use approver::workflow::Orchestrator;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn decision_benchmark(c: &mut Criterion) {
    let pipeline = PipelineBuilder::new("bench")
        .stage("check_email", email_validator())
        .build()
        .unwrap();
    let stage = &pipeline.stages()[0];
    let passed = StageResult::new(Some(200), serde_json::Map::new());
    let rejected = StageResult::new(Some(400), serde_json::Map::new());

    c.bench_function("decide_pass", |b| {
        b.iter(|| decide(black_box(&passed), stage, DEFAULT_REJECTION_CODE));
    });
    c.bench_function("decide_reject", |b| {
        b.iter(|| decide(black_box(&rejected), stage, DEFAULT_REJECTION_CODE));
    });
}

fn run_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let pipeline = PipelineBuilder::new("bench")
        .stage("check_email", email_validator())
        .stage("check_pincode", pincode_validator())
        .build()
        .unwrap();
    let orchestrator = Orchestrator::new(
        Arc::new(pipeline),
        PersistenceStep::new(
            Arc::new(InMemoryRecordStore::new()),
            PersistenceConfig::new("users"),
        ),
    );

    c.bench_function("full_run_accepted", |b| {
        b.iter(|| {
            let submission = Submission::from_raw(valid_submission()).unwrap();
            runtime.block_on(orchestrator.run(black_box(submission)))
        });
    });
}

criterion_group!(benches, decision_benchmark, run_benchmark);
criterion_main!(benches);

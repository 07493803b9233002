//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use deployflow::config::DeployConfig;
use deployflow::pipeline::{Pipeline, PipelineMode};
use deployflow::resources::manifests;
use deployflow::testing::TestHarness;

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");

    c.bench_function("full_install_in_memory", |b| {
        b.iter(|| {
            let harness = TestHarness::new();
            let pipeline = Pipeline::for_mode(&harness.config, PipelineMode::FullInstall)
                .expect("catalog validates");
            let report = runtime.block_on(pipeline.run(&harness.context()));
            black_box(report.exit_code())
        });
    });

    c.bench_function("rerun_unchanged", |b| {
        let harness = TestHarness::new();
        let pipeline = Pipeline::for_mode(&harness.config, PipelineMode::FullInstall)
            .expect("catalog validates");
        runtime.block_on(pipeline.run(&harness.context()));
        b.iter(|| black_box(runtime.block_on(pipeline.run(&harness.context())).overall));
    });

    c.bench_function("application_manifests", |b| {
        let config = DeployConfig::default();
        b.iter(|| {
            manifests::application(black_box(&config), |s| config.image_ref(&s.name))
                .expect("manifests build")
                .len()
        });
    });
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);

//! Benchmarks for chain construction.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use repochain::pipeline::{BuildRule, FaultPlan, StepSpec};
use repochain::testing::rc2_builder;

fn build_chain(groups: usize) -> usize {
    let mut builder = rc2_builder();
    builder.extend(StepSpec::step("step1")).unwrap();
    builder
        .add_side_run("rescue-test", StepSpec::subsets(["isr"]).with_faults(FaultPlan::new().fail("isr", "exposure=1")))
        .unwrap();
    for group in 0..groups {
        builder
            .extend(StepSpec::step("step3").with_group(format!("tract{group}")))
            .unwrap();
    }
    let artifacts = builder.finish().unwrap();
    BuildRule::from_artifacts(&artifacts).unwrap().len()
}

fn chain_benchmark(c: &mut Criterion) {
    c.bench_function("chain_10_groups", |b| b.iter(|| build_chain(black_box(10))));
    c.bench_function("chain_100_groups", |b| b.iter(|| build_chain(black_box(100))));
}

criterion_group!(benches, chain_benchmark);
criterion_main!(benches);

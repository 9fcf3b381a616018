use criterion::{black_box, criterion_group, criterion_main, Criterion};
use indexmap::IndexMap;
use lockmeet_engine::pipeline::{self, AnalysisOptions};
use lockmeet_ir::domain::Interval;

const CLUSTER12: &str = include_str!("../../../fixtures/mutex_meet_cluster12.lmt");
const COUNTER_LOOP: &str = include_str!("../../../fixtures/counter_loop.lmt");
const TWO_CLUSTERS: &str = include_str!("../../../fixtures/two_clusters.lmt");

fn overrides(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Fixpoint only (program already lowered, cluster table built)
// ---------------------------------------------------------------------------

fn bench_fixpoint_cluster12(c: &mut Criterion) {
    let ast = pipeline::parse(CLUSTER12, "mutex_meet_cluster12.lmt").unwrap();
    let program = pipeline::lower(&ast).unwrap();
    let options = AnalysisOptions::default();
    let table = pipeline::build_cluster_table(&program, &options).unwrap();
    c.bench_function("engine_fixpoint_cluster12", |b| {
        b.iter(|| {
            pipeline::run_fixpoint::<Interval>(
                black_box(&program),
                black_box(&table),
                black_box(&options),
            )
            .unwrap()
        })
    });
}

fn bench_fixpoint_counter_loop_widening(c: &mut Criterion) {
    let ast = pipeline::parse(COUNTER_LOOP, "counter_loop.lmt").unwrap();
    let program = pipeline::lower(&ast).unwrap();
    let options = AnalysisOptions::resolve(&program, &IndexMap::new()).unwrap();
    let table = pipeline::build_cluster_table(&program, &options).unwrap();
    c.bench_function("engine_fixpoint_counter_loop", |b| {
        b.iter(|| {
            pipeline::run_fixpoint::<Interval>(
                black_box(&program),
                black_box(&table),
                black_box(&options),
            )
            .unwrap()
        })
    });
}

// ---------------------------------------------------------------------------
// Full pipeline (parse -> lower -> cluster -> fixpoint -> report)
// ---------------------------------------------------------------------------

fn bench_analyze_two_clusters(c: &mut Criterion) {
    let none = overrides(&[]);
    c.bench_function("engine_analyze_two_clusters", |b| {
        b.iter(|| {
            pipeline::analyze_source(black_box(TWO_CLUSTERS), "two_clusters.lmt", &none).unwrap()
        })
    });
}

fn bench_analyze_cluster12_parallel(c: &mut Criterion) {
    let parallel = overrides(&[("workers", "4")]);
    c.bench_function("engine_analyze_cluster12_workers4", |b| {
        b.iter(|| {
            pipeline::analyze_source(black_box(CLUSTER12), "mutex_meet_cluster12.lmt", &parallel)
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_fixpoint_cluster12,
    bench_fixpoint_counter_loop_widening,
    bench_analyze_two_clusters,
    bench_analyze_cluster12_parallel,
);
criterion_main!(benches);

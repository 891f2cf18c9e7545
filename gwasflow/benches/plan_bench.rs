//! Benchmarks for registry validation and run planning.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gwasflow::registry::{StageDef, StageRegistry};

fn linear_defs(n: usize) -> Vec<StageDef> {
    (0..n)
        .map(|i| {
            let mut def = StageDef::new(format!("stage{i}"), "true");
            if i > 0 {
                def = def.with_dependency(format!("stage{}", i - 1));
            }
            def
        })
        .collect()
}

fn registry_benchmark(c: &mut Criterion) {
    c.bench_function("validate_linear_100", |b| {
        b.iter(|| {
            let registry = StageRegistry::from_defs(black_box(linear_defs(100))).unwrap();
            black_box(registry.topological_order().len())
        })
    });

    let registry = StageRegistry::from_defs(linear_defs(100)).unwrap();
    c.bench_function("closure_linear_100", |b| {
        b.iter(|| {
            let closure = registry
                .closure(black_box(&["stage99".to_string()]), "end targets")
                .unwrap();
            black_box(closure.len())
        })
    });
}

criterion_group!(benches, registry_benchmark);
criterion_main!(benches);

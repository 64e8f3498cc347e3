use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kgfit::config::{InitializerConfig, ModelConfig, UpdateConfig};
use kgfit::{build_model, ModelContext, ScoringModel, Triple};
use rand::rngs::StdRng;
use rand::SeedableRng;

const ENTITIES: usize = 2000;

fn model(kind: &str) -> Box<dyn ScoringModel> {
    let update = UpdateConfig::default();
    let initializer = InitializerConfig::default();
    let mut rng = StdRng::seed_from_u64(42);
    let mut ctx = ModelContext {
        num_entities: ENTITIES,
        num_relations: 4,
        update: &update,
        initializer: &initializer,
        rng: &mut rng,
    };
    match build_model(&ModelConfig::new(kind, 32), &mut ctx) {
        Ok(model) => model,
        Err(e) => panic!("cannot build {kind}: {e}"),
    }
}

fn bench_score_all_objects(c: &mut Criterion) {
    let mut group = c.benchmark_group("score_all_objects");
    for kind in ["transe", "distmult", "rescal", "complex"] {
        let model = model(kind);

        group.bench_with_input(BenchmarkId::new("batched", kind), &model, |b, m| {
            b.iter(|| m.score_all_objects(black_box(7), black_box(1)))
        });
        group.bench_with_input(BenchmarkId::new("naive", kind), &model, |b, m| {
            b.iter(|| {
                (0..ENTITIES)
                    .map(|o| m.score(&Triple::new(black_box(7), 1, o)))
                    .collect::<Vec<f64>>()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_score_all_objects);
criterion_main!(benches);

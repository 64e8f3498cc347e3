//! Property-based tests for the training and evaluation engine.
//!
//! These tests verify invariants that should hold for any parameters:
//! - Rank bounds in both evaluation settings
//! - Gradient accumulator reset
//! - Matrix dump/reload
//! - Margin loss gradient silence
//! - Sampler output ranges

use proptest::prelude::*;

use kgfit::config::{InitializerConfig, ModelConfig, UpdateConfig};
use kgfit::{build_model, ModelContext, ScoringModel, Triple, TripleStore};
use rand::rngs::StdRng;
use rand::SeedableRng;

const N: usize = 9;
const K: usize = 3;

fn model(kind: &str, seed: u64) -> Box<dyn ScoringModel> {
    let update = UpdateConfig::default();
    let initializer = InitializerConfig::default();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ctx = ModelContext {
        num_entities: N,
        num_relations: K,
        update: &update,
        initializer: &initializer,
        rng: &mut rng,
    };
    build_model(&ModelConfig::new(kind, 3), &mut ctx).unwrap()
}

fn arb_kind() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("transe"),
        Just("distmult"),
        Just("rescal"),
        Just("complex"),
    ]
}

fn arb_triple() -> impl Strategy<Value = Triple> {
    (0..N, 0..K, 0..N).prop_map(|(s, r, o)| Triple::new(s, r, o))
}

mod evaluation_props {
    use super::*;
    use kgfit::RankEvaluator;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn ranks_within_bounds(
            kind in arb_kind(),
            seed in 0u64..1000,
            known in prop::collection::vec(arb_triple(), 0..30),
            probe in arb_triple(),
        ) {
            let model = model(kind, seed);
            let store = TripleStore::from_triples(known, N, K);
            let evaluator = RankEvaluator::new(&[&store]);

            for rank in [
                evaluator.rank_object(model.as_ref(), &probe),
                evaluator.rank_subject(model.as_ref(), &probe),
            ] {
                prop_assert!(rank.filtered >= 1);
                prop_assert!(rank.filtered <= rank.raw);
                prop_assert!(rank.raw <= N);
            }
        }
    }
}

mod gradient_props {
    use super::*;
    use kgfit::GradientAccumulator;
    use ndarray::Array1;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn reset_forgets_every_touch(
            touches in prop::collection::vec((0usize..20, -5.0f64..5.0), 1..60),
        ) {
            let mut acc = GradientAccumulator::new(20, 2);
            for &(id, v) in &touches {
                acc.add(id, &Array1::from_elem(2, v).view());
            }
            let distinct: std::collections::HashSet<_> = touches.iter().map(|t| t.0).collect();
            prop_assert_eq!(acc.len(), distinct.len());
            prop_assert_eq!(distinct.iter().map(|&id| acc.count(id)).sum::<usize>(), touches.len());

            acc.reset();
            prop_assert_eq!(acc.len(), 0);
            prop_assert!(acc.is_empty());
            prop_assert!((0..20).all(|id| !acc.contains(id) && acc.get(id).is_none()));
        }

        #[test]
        fn repeated_touches_sum(values in prop::collection::vec(-5.0f64..5.0, 1..20)) {
            let mut acc = GradientAccumulator::new(4, 1);
            for &v in &values {
                acc.add(3, &Array1::from_elem(1, v).view());
            }
            let total: f64 = values.iter().sum();
            prop_assert!((acc.get(3).unwrap()[0] - total).abs() < 1e-9);
            prop_assert_eq!(acc.count(3), values.len());
        }
    }
}

mod io_props {
    use super::*;
    use kgfit::io::{dump_matrix, load_matrix};
    use ndarray::Array2;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn matrix_dump_reload_is_exact(
            rows in 1usize..6,
            cols in 1usize..6,
            values in prop::collection::vec(prop::num::f64::NORMAL | prop::num::f64::ZERO, 36),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("parameters").join("E");
            let matrix = Array2::from_shape_fn((rows, cols), |(i, j)| values[i * 6 + j]);

            dump_matrix(&path, &matrix).unwrap();
            prop_assert_eq!(load_matrix(&path).unwrap(), matrix);
        }
    }
}

mod loss_props {
    use super::*;
    use kgfit::loss::{BatchShape, LossFunction, MarginLoss};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn margin_silent_exactly_when_satisfied(
            kind in arb_kind(),
            seed in 0u64..1000,
            positive in arb_triple(),
            negative in arb_triple(),
            margin in 0.0f64..3.0,
        ) {
            let mut model = model(kind, seed);
            let hinge = model.score(&negative) - model.score(&positive) + margin;

            let shape = BatchShape { batch_size: 1, number_of_negatives: 1 };
            let mut loss = MarginLoss::new(shape, margin);
            model.reset_gradients();
            loss.gradient(model.as_mut(), &[positive], &[vec![negative]]);

            let touched = model.families().iter().any(|(_, f)| !f.gradient.is_empty());
            if hinge > 0.0 {
                prop_assert_eq!(loss.violations(), 1);
                prop_assert!(touched);
            } else {
                prop_assert_eq!(loss.violations(), 0);
                prop_assert!(!touched);
            }
        }
    }
}

mod sampler_props {
    use super::*;
    use kgfit::sampling::{ClosedWorldSampler, CorruptionSampler, SamplerSettings, SamplingMode};
    use kgfit::NegativeSampler;

    fn arb_mode() -> impl Strategy<Value = SamplingMode> {
        prop_oneof![
            Just(SamplingMode::Subject),
            Just(SamplingMode::Object),
            Just(SamplingMode::Both),
            Just(SamplingMode::Random),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn negatives_stay_in_range_and_keep_relation(
            known in prop::collection::vec(arb_triple(), 1..30),
            mode in arb_mode(),
            retries in 0usize..5,
            seed in 0u64..1000,
        ) {
            let store = TripleStore::from_triples(known.clone(), N, K);
            let settings = SamplerSettings {
                number_of_negatives: 3,
                number_of_retries: retries,
                mode,
            };
            let samplers: [Box<dyn NegativeSampler>; 2] = [
                Box::new(ClosedWorldSampler::new(settings)),
                Box::new(CorruptionSampler::new(settings)),
            ];
            let mut rng = StdRng::seed_from_u64(seed);

            for sampler in &samplers {
                for positive in &known {
                    let negatives = sampler.sample_negatives(&store, positive, &mut rng);
                    prop_assert_eq!(negatives.len(), 3);
                    for n in negatives {
                        prop_assert_eq!(n.relation, positive.relation);
                        prop_assert!(n.subject < N && n.object < N);
                        match mode {
                            SamplingMode::Subject => prop_assert_eq!(n.object, positive.object),
                            SamplingMode::Object => prop_assert_eq!(n.subject, positive.subject),
                            _ => {}
                        }
                    }
                }
            }
        }
    }
}

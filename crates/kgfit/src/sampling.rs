//! Negative sampling by corruption.
//!
//! A negative is a true triple with its subject, object or both replaced.
//! Replacements that produce a triple already in the store are redrawn up to
//! `numberOfRetries` times; after that the last draw is accepted as-is and a
//! warning is logged. Sampling never fails.
//!
//! | Sampler | Config name | Replacement drawn from |
//! |---------|-------------|------------------------|
//! | [`ClosedWorldSampler`] | `lcwa` | all N entities, uniformly |
//! | [`CorruptionSampler`] | `corruption` | entities seen in that position with the relation, then all N |
//!
//! # References
//!
//! - Bordes et al. (2013): uniform corruption of head or tail
//! - Krompaß et al. (2015): "Type-Constrained Representation Learning in Knowledge Graphs"

use std::fmt::Debug;
use std::str::FromStr;

use rand::{Rng, RngCore};
use tracing::warn;

use crate::config::SamplingConfig;
use crate::error::{Error, Result};
use crate::triples::{Triple, TripleStore};

/// Which position of a triple to corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Replace the subject.
    Subject,
    /// Replace the object.
    Object,
    /// Replace subject and object together.
    Both,
    /// Pick subject or object uniformly for every negative.
    Random,
}

impl FromStr for SamplingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "subject" => Ok(Self::Subject),
            "object" => Ok(Self::Object),
            "both" => Ok(Self::Both),
            "random" => Ok(Self::Random),
            _ => Err(Error::unknown("sampling mode", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Subject,
    Object,
}

/// A sampling mode with `Random` already decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Subject,
    Object,
    Both,
}

impl Target {
    fn resolve(mode: SamplingMode, rng: &mut dyn RngCore) -> Self {
        match mode {
            SamplingMode::Subject => Self::Subject,
            SamplingMode::Object => Self::Object,
            SamplingMode::Both => Self::Both,
            SamplingMode::Random => {
                if rng.random_bool(0.5) {
                    Self::Subject
                } else {
                    Self::Object
                }
            }
        }
    }

    fn sides(self) -> &'static [Side] {
        match self {
            Self::Subject => &[Side::Subject],
            Self::Object => &[Side::Object],
            Self::Both => &[Side::Subject, Side::Object],
        }
    }

    fn corrupt<F>(self, positive: &Triple, rng: &mut dyn RngCore, pick: &mut F) -> Triple
    where
        F: FnMut(Side, &mut dyn RngCore) -> usize,
    {
        let mut triple = *positive;
        for &side in self.sides() {
            match side {
                Side::Subject => triple.subject = pick(side, &mut *rng),
                Side::Object => triple.object = pick(side, &mut *rng),
            }
        }
        triple
    }
}

/// Draw up to `attempts` corruptions; return the first one not in `store`,
/// or the last draw with `false` if every draw collided.
fn first_unknown<F>(
    store: &TripleStore,
    positive: &Triple,
    target: Target,
    attempts: usize,
    rng: &mut dyn RngCore,
    mut pick: F,
) -> (Triple, bool)
where
    F: FnMut(Side, &mut dyn RngCore) -> usize,
{
    let mut candidate = *positive;
    for _ in 0..attempts {
        candidate = target.corrupt(positive, rng, &mut pick);
        if !store.contains(&candidate) {
            return (candidate, true);
        }
    }
    (candidate, false)
}

fn uniform_entity(store: &TripleStore) -> impl FnMut(Side, &mut dyn RngCore) -> usize + '_ {
    move |_, rng| rng.random_range(0..store.num_entities())
}

/// Produces corrupted triples for training.
pub trait NegativeSampler: Debug {
    /// Sampler name as used in configuration.
    fn name(&self) -> &'static str;

    /// One negative for `positive`, corrupting the positions chosen by `mode`.
    fn sample(
        &self,
        store: &TripleStore,
        positive: &Triple,
        mode: SamplingMode,
        rng: &mut dyn RngCore,
    ) -> Triple;

    /// Negatives drawn per positive.
    fn number_of_negatives(&self) -> usize;

    /// Configured corruption mode.
    fn mode(&self) -> SamplingMode;

    /// All negatives for `positive` under the configured mode and count.
    fn sample_negatives(
        &self,
        store: &TripleStore,
        positive: &Triple,
        rng: &mut dyn RngCore,
    ) -> Vec<Triple> {
        (0..self.number_of_negatives())
            .map(|_| self.sample(store, positive, self.mode(), &mut *rng))
            .collect()
    }
}

/// Sampler names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    /// Local closed-world assumption: uniform replacements.
    ClosedWorld,
    /// Relation-typed replacements first.
    Corruption,
}

impl FromStr for SamplerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lcwa" | "closed-world" => Ok(Self::ClosedWorld),
            "corruption" => Ok(Self::Corruption),
            _ => Err(Error::unknown("sampler", s)),
        }
    }
}

/// Build the configured sampler.
pub fn build_sampler(config: &SamplingConfig) -> Result<Box<dyn NegativeSampler>> {
    let kind = config.kind.parse::<SamplerKind>()?;
    let mode = config.mode.parse::<SamplingMode>()?;
    let settings = SamplerSettings {
        number_of_negatives: config.number_of_negatives,
        number_of_retries: config.number_of_retries,
        mode,
    };
    Ok(match kind {
        SamplerKind::ClosedWorld => Box::new(ClosedWorldSampler::new(settings)),
        SamplerKind::Corruption => Box::new(CorruptionSampler::new(settings)),
    })
}

/// Options shared by both samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSettings {
    /// Negatives per positive.
    pub number_of_negatives: usize,
    /// Redraws after the first colliding draw.
    pub number_of_retries: usize,
    /// Positions to corrupt.
    pub mode: SamplingMode,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            number_of_negatives: 1,
            number_of_retries: 10,
            mode: SamplingMode::Random,
        }
    }
}

impl SamplerSettings {
    fn attempts(&self) -> usize {
        self.number_of_retries + 1
    }
}

/// Uniform corruption over all entities.
#[derive(Debug, Clone)]
pub struct ClosedWorldSampler {
    settings: SamplerSettings,
}

impl ClosedWorldSampler {
    /// Sampler with the given settings.
    pub fn new(settings: SamplerSettings) -> Self {
        Self { settings }
    }
}

impl NegativeSampler for ClosedWorldSampler {
    fn name(&self) -> &'static str {
        "lcwa"
    }

    fn sample(
        &self,
        store: &TripleStore,
        positive: &Triple,
        mode: SamplingMode,
        rng: &mut dyn RngCore,
    ) -> Triple {
        let target = Target::resolve(mode, rng);
        let attempts = self.settings.attempts();
        let (negative, unknown) =
            first_unknown(store, positive, target, attempts, rng, uniform_entity(store));
        if !unknown {
            warn!(?positive, ?negative, attempts, "accepting a known triple as negative");
        }
        negative
    }

    fn number_of_negatives(&self) -> usize {
        self.settings.number_of_negatives
    }

    fn mode(&self) -> SamplingMode {
        self.settings.mode
    }
}

/// Relation-typed corruption with a uniform fallback.
///
/// Replacements are first drawn from the entities observed as subject (or
/// object) of the positive's relation, which yields harder negatives. If
/// every typed draw collides, or the relation has no candidates, the
/// sampler falls back to uniform draws with the same retry budget.
#[derive(Debug, Clone)]
pub struct CorruptionSampler {
    settings: SamplerSettings,
}

impl CorruptionSampler {
    /// Sampler with the given settings.
    pub fn new(settings: SamplerSettings) -> Self {
        Self { settings }
    }
}

impl NegativeSampler for CorruptionSampler {
    fn name(&self) -> &'static str {
        "corruption"
    }

    fn sample(
        &self,
        store: &TripleStore,
        positive: &Triple,
        mode: SamplingMode,
        rng: &mut dyn RngCore,
    ) -> Triple {
        let target = Target::resolve(mode, rng);
        let attempts = self.settings.attempts();
        let relation = positive.relation;
        let pool = |side: Side| match side {
            Side::Subject => store.subjects_for(relation),
            Side::Object => store.objects_for(relation),
        };

        if target.sides().iter().all(|&side| !pool(side).is_empty()) {
            let typed = |side: Side, rng: &mut dyn RngCore| {
                let candidates = pool(side);
                candidates[rng.random_range(0..candidates.len())]
            };
            let (negative, unknown) = first_unknown(store, positive, target, attempts, rng, typed);
            if unknown {
                return negative;
            }
        }

        let (negative, unknown) =
            first_unknown(store, positive, target, attempts, rng, uniform_entity(store));
        if !unknown {
            warn!(?positive, ?negative, attempts, "accepting a known triple as negative");
        }
        negative
    }

    fn number_of_negatives(&self) -> usize {
        self.settings.number_of_negatives
    }

    fn mode(&self) -> SamplingMode {
        self.settings.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings(mode: SamplingMode, retries: usize) -> SamplerSettings {
        SamplerSettings {
            number_of_negatives: 1,
            number_of_retries: retries,
            mode,
        }
    }

    fn chain(n: usize) -> TripleStore {
        TripleStore::from_triples((0..n - 1).map(|i| Triple::new(i, 0, i + 1)), n, 1)
    }

    #[test]
    fn test_mode_keeps_other_positions() {
        let store = chain(50);
        let sampler = ClosedWorldSampler::new(settings(SamplingMode::Object, 10));
        let mut rng = StdRng::seed_from_u64(1);
        let positive = Triple::new(3, 0, 4);
        for _ in 0..100 {
            let negative = sampler.sample(&store, &positive, SamplingMode::Object, &mut rng);
            assert_eq!(negative.subject, 3);
            assert_eq!(negative.relation, 0);
            assert!(!store.contains(&negative));
        }
    }

    #[test]
    fn test_random_mode_changes_one_side() {
        let store = chain(50);
        let sampler = ClosedWorldSampler::new(settings(SamplingMode::Random, 10));
        let mut rng = StdRng::seed_from_u64(2);
        let positive = Triple::new(10, 0, 11);
        let (mut subjects, mut objects) = (0, 0);
        for _ in 0..200 {
            let n = sampler.sample(&store, &positive, SamplingMode::Random, &mut rng);
            assert!(n.subject == 10 || n.object == 11);
            if n.subject != 10 {
                subjects += 1;
            }
            if n.object != 11 {
                objects += 1;
            }
        }
        assert!(subjects > 50 && objects > 50);
    }

    #[test]
    fn test_zero_retries_accepts_colliding_draw() {
        // Complete graph on two entities: every corruption is a known triple.
        let store = TripleStore::from_triples(
            [
                Triple::new(0, 0, 0),
                Triple::new(0, 0, 1),
                Triple::new(1, 0, 0),
                Triple::new(1, 0, 1),
            ],
            2,
            1,
        );
        let mut rng = StdRng::seed_from_u64(3);
        for sampler in [
            Box::new(ClosedWorldSampler::new(settings(SamplingMode::Object, 0))) as Box<dyn NegativeSampler>,
            Box::new(CorruptionSampler::new(settings(SamplingMode::Object, 0))),
        ] {
            let negative = sampler.sample(&store, &Triple::new(0, 0, 1), SamplingMode::Object, &mut rng);
            assert!(store.contains(&negative));
            assert_eq!(negative.subject, 0);
        }
    }

    #[test]
    fn test_corruption_prefers_typed_candidates() {
        // Relation 1 only ever has objects 40..44.
        let mut triples: Vec<Triple> = (0..40).map(|i| Triple::new(i, 0, (i + 1) % 40)).collect();
        triples.extend((40..45).map(|o| Triple::new(0, 1, o)));
        let store = TripleStore::from_triples(triples, 100, 2);
        let sampler = CorruptionSampler::new(settings(SamplingMode::Object, 10));
        let mut rng = StdRng::seed_from_u64(4);

        let positive = Triple::new(5, 1, 40);
        for _ in 0..50 {
            let negative = sampler.sample(&store, &positive, SamplingMode::Object, &mut rng);
            assert!((40..45).contains(&negative.object));
        }
    }

    #[test]
    fn test_corruption_falls_back_to_uniform() {
        // Every typed candidate for subject 0 collides.
        let store = TripleStore::from_triples(
            (1..4).map(|o| Triple::new(0, 0, o)),
            30,
            1,
        );
        let sampler = CorruptionSampler::new(settings(SamplingMode::Object, 10));
        let mut rng = StdRng::seed_from_u64(5);
        let negative = sampler.sample(&store, &Triple::new(0, 0, 1), SamplingMode::Object, &mut rng);
        assert!(!store.contains(&negative));
        assert!(!(1..4).contains(&negative.object));
    }

    #[test]
    fn test_sample_negatives_count() {
        let store = chain(20);
        let sampler = build_sampler(&SamplingConfig {
            number_of_negatives: 4,
            ..SamplingConfig::default()
        })
        .unwrap();
        let mut rng = StdRng::seed_from_u64(6);
        assert_eq!(sampler.sample_negatives(&store, &Triple::new(0, 0, 1), &mut rng).len(), 4);
    }

    #[test]
    fn test_factory_rejects_unknown_names() {
        let bad_kind = SamplingConfig {
            kind: "bernoulli".into(),
            ..SamplingConfig::default()
        };
        assert!(matches!(
            build_sampler(&bad_kind),
            Err(Error::UnknownVariant { component: "sampler", .. })
        ));
        let bad_mode = SamplingConfig {
            mode: "relation".into(),
            ..SamplingConfig::default()
        };
        assert!(matches!(
            build_sampler(&bad_mode),
            Err(Error::UnknownVariant { component: "sampling mode", .. })
        ));
    }
}

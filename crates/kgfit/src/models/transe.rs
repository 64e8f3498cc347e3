//! Translational model (TransE).
//!
//! Relations are translations in entity space: a true triple should satisfy
//! `s + r ≈ o`. The score is the negated distance
//!
//! ```text
//! score(s, r, o) = −Σ |s + r − o|     (L1)
//!                = −Σ (s + r − o)²    (squared L2)
//! ```
//!
//! The squared form keeps the gradient linear in the difference.

use ndarray::{Array1, ArrayView1};

use super::{ModelContext, ModelCore, Regularization, ScoringModel};
use crate::config::HyperParameters;
use crate::error::Result;
use crate::init::Initializer;
use crate::params::{FamilyId, FamilyKind, ParameterRegistry};
use crate::triples::Triple;

/// TransE with L1 or squared-L2 dissimilarity.
#[derive(Debug)]
pub struct Translational {
    core: ModelCore,
    entities: FamilyId,
    relations: FamilyId,
    dim: usize,
    use_l1: bool,
}

impl Translational {
    /// Build with families `E` (N×k) and `R` (K×k).
    pub fn new(hp: &HyperParameters, init: &Initializer, ctx: &mut ModelContext<'_>) -> Result<Self> {
        let mut registry = ParameterRegistry::new();
        let entities = ctx.add_family(&mut registry, init, "E", FamilyKind::Entity, hp.k)?;
        let relations = ctx.add_family(&mut registry, init, "R", FamilyKind::Relation, hp.k)?;
        let core = ModelCore::new(registry, ctx.update, Regularization::from(hp), ctx.num_entities)?;
        Ok(Self {
            core,
            entities,
            relations,
            dim: hp.k,
            use_l1: hp.use_l1,
        })
    }

    fn dissimilarity(&self, diff: impl Iterator<Item = f64>) -> f64 {
        if self.use_l1 {
            diff.map(f64::abs).sum()
        } else {
            diff.map(|d| d * d).sum()
        }
    }

    fn rows(&self, triple: &Triple) -> (ArrayView1<'_, f64>, ArrayView1<'_, f64>, ArrayView1<'_, f64>) {
        let registry = self.core.registry();
        let e = registry.params(self.entities);
        (
            e.row(triple.subject),
            registry.params(self.relations).row(triple.relation),
            e.row(triple.object),
        )
    }
}

impl ScoringModel for Translational {
    fn dump_name(&self) -> String {
        format!("transe-{}-{}", self.dim, if self.use_l1 { "l1" } else { "l2" })
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn score(&self, triple: &Triple) -> f64 {
        let (s, r, o) = self.rows(triple);
        let diff = s.iter().zip(&r).zip(&o).map(|((s, r), o)| s + r - o);
        -self.dissimilarity(diff)
    }

    fn gradient(&mut self, triple: &Triple, scale: f64) {
        let (s, r, o) = self.rows(triple);
        let mut d: Array1<f64> = &s + &r - &o;
        d *= 2.0;
        if self.use_l1 {
            d.mapv_inplace(|x| if x > 0.0 { 1.0 } else { -1.0 });
        }

        let registry = self.core.registry_mut();
        let e = registry.gradient_mut(self.entities);
        e.add_scaled(triple.subject, -scale, &d.view());
        e.add_scaled(triple.object, scale, &d.view());
        registry
            .gradient_mut(self.relations)
            .add_scaled(triple.relation, -scale, &d.view());
    }

    fn score_all_objects(&self, subject: usize, relation: usize) -> Array1<f64> {
        let registry = self.core.registry();
        let e = registry.params(self.entities);
        let base = &e.row(subject) + &registry.params(self.relations).row(relation);
        e.matrix()
            .rows()
            .into_iter()
            .map(|o| -self.dissimilarity(base.iter().zip(&o).map(|(b, o)| b - o)))
            .collect()
    }

    fn score_all_subjects(&self, relation: usize, object: usize) -> Array1<f64> {
        let registry = self.core.registry();
        let e = registry.params(self.entities);
        let base = &registry.params(self.relations).row(relation) - &e.row(object);
        e.matrix()
            .rows()
            .into_iter()
            .map(|s| -self.dissimilarity(s.iter().zip(&base).map(|(s, b)| s + b)))
            .collect()
    }
}

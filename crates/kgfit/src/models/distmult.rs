//! Bilinear-diagonal model (DistMult): a trilinear dot product.

use ndarray::Array1;

use super::{ModelContext, ModelCore, Regularization, ScoringModel};
use crate::config::HyperParameters;
use crate::error::Result;
use crate::init::Initializer;
use crate::params::{FamilyId, FamilyKind, ParameterRegistry};
use crate::triples::Triple;

/// DistMult: `score = Σᵢ sᵢ rᵢ oᵢ`. Symmetric in subject and object.
#[derive(Debug)]
pub struct BilinearDiagonal {
    core: ModelCore,
    entities: FamilyId,
    relations: FamilyId,
    dim: usize,
}

impl BilinearDiagonal {
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
        })
    }
}

impl ScoringModel for BilinearDiagonal {
    fn dump_name(&self) -> String {
        format!("distmult-{}", self.dim)
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn score(&self, triple: &Triple) -> f64 {
        let registry = self.core.registry();
        let e = registry.params(self.entities);
        let r = registry.params(self.relations).row(triple.relation);
        let (s, o) = (e.row(triple.subject), e.row(triple.object));
        s.iter().zip(&r).zip(&o).map(|((s, r), o)| s * r * o).sum()
    }

    fn gradient(&mut self, triple: &Triple, scale: f64) {
        let (ds, dr, d_o) = {
            let registry = self.core.registry();
            let e = registry.params(self.entities);
            let r = registry.params(self.relations).row(triple.relation);
            let (s, o) = (e.row(triple.subject), e.row(triple.object));
            (&r * &o, &s * &o, &r * &s)
        };

        let registry = self.core.registry_mut();
        let e = registry.gradient_mut(self.entities);
        e.add_scaled(triple.subject, scale, &ds.view());
        e.add_scaled(triple.object, scale, &d_o.view());
        registry
            .gradient_mut(self.relations)
            .add_scaled(triple.relation, scale, &dr.view());
    }

    fn score_all_objects(&self, subject: usize, relation: usize) -> Array1<f64> {
        let registry = self.core.registry();
        let e = registry.params(self.entities);
        let sr = &e.row(subject) * &registry.params(self.relations).row(relation);
        e.matrix().dot(&sr)
    }

    fn score_all_subjects(&self, relation: usize, object: usize) -> Array1<f64> {
        let registry = self.core.registry();
        let e = registry.params(self.entities);
        let ro = &registry.params(self.relations).row(relation) * &e.row(object);
        e.matrix().dot(&ro)
    }
}

//! Bilinear-matrix model (RESCAL).
//!
//! Each relation is a full k×k matrix `M_r`, stored as a row of width k² in
//! column-major order (`M[i][j] = r[j·k + i]`).
//!
//! ```text
//! score(s, r, o) = sᵀ M_r o
//! ∂s = M_r o      ∂o = M_rᵀ s      ∂M_r = s oᵀ
//! ```
//!
//! Ranking all objects is one matrix-vector product `E (M_rᵀ s)` instead of
//! N separate bilinear forms.

use ndarray::{Array1, Array2, ArrayView1};

use super::{ModelContext, ModelCore, Regularization, ScoringModel};
use crate::config::HyperParameters;
use crate::error::Result;
use crate::init::Initializer;
use crate::params::{FamilyId, FamilyKind, ParameterRegistry};
use crate::triples::Triple;

/// RESCAL with one dense matrix per relation.
#[derive(Debug)]
pub struct BilinearMatrix {
    core: ModelCore,
    entities: FamilyId,
    relations: FamilyId,
    dim: usize,
}

impl BilinearMatrix {
    /// Build with families `E` (N×k) and `R` (K×k²).
    pub fn new(hp: &HyperParameters, init: &Initializer, ctx: &mut ModelContext<'_>) -> Result<Self> {
        let k = hp.k;
        let mut registry = ParameterRegistry::new();
        let entities = ctx.add_family(&mut registry, init, "E", FamilyKind::Entity, k)?;
        let relations = ctx.add_family(&mut registry, init, "R", FamilyKind::Relation, k * k)?;
        let core = ModelCore::new(registry, ctx.update, Regularization::from(hp), ctx.num_entities)?;
        Ok(Self {
            core,
            entities,
            relations,
            dim: k,
        })
    }

    fn relation_matrix(&self, relation: usize) -> Array2<f64> {
        let k = self.dim;
        let flat = self.core.registry().params(self.relations).row(relation);
        Array2::from_shape_fn((k, k), |(i, j)| flat[j * k + i])
    }

    fn entity(&self, id: usize) -> ArrayView1<'_, f64> {
        self.core.registry().params(self.entities).row(id)
    }
}

impl ScoringModel for BilinearMatrix {
    fn dump_name(&self) -> String {
        format!("rescal-{}", self.dim)
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn score(&self, triple: &Triple) -> f64 {
        let m = self.relation_matrix(triple.relation);
        self.entity(triple.subject)
            .dot(&m.dot(&self.entity(triple.object)))
    }

    fn gradient(&mut self, triple: &Triple, scale: f64) {
        let k = self.dim;
        let (ds, d_o, dr) = {
            let m = self.relation_matrix(triple.relation);
            let s = self.entity(triple.subject);
            let o = self.entity(triple.object);
            let dr = Array1::from_shape_fn(k * k, |idx| s[idx % k] * o[idx / k]);
            (m.dot(&o), m.t().dot(&s), dr)
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
        let m = self.relation_matrix(relation);
        let projected = m.t().dot(&self.entity(subject));
        self.core.registry().params(self.entities).matrix().dot(&projected)
    }

    fn score_all_subjects(&self, relation: usize, object: usize) -> Array1<f64> {
        let m = self.relation_matrix(relation);
        let projected = m.dot(&self.entity(object));
        self.core.registry().params(self.entities).matrix().dot(&projected)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{batched_scoring_error, model};
    use super::*;
    use ndarray::array;

    #[test]
    fn test_relation_rows_have_k_squared_width() {
        let m = model("rescal", 3, 0);
        assert_eq!(m.core().registry().get("R").unwrap().params.dim(), 9);
        assert_eq!(m.core().registry().get("E").unwrap().params.dim(), 3);
    }

    #[test]
    fn test_column_major_layout() {
        let mut m = model("rescal", 2, 0);
        {
            let registry = m.core_mut().registry_mut();
            let e = registry.get_mut("E").unwrap().params.matrix_mut();
            e.row_mut(0).assign(&array![1.0, 0.0]);
            e.row_mut(1).assign(&array![0.0, 1.0]);
            // M = [[0, 5], [7, 0]] stored column-major as [0, 7, 5, 0]
            let r = registry.get_mut("R").unwrap().params.matrix_mut();
            r.row_mut(0).assign(&array![0.0, 7.0, 5.0, 0.0]);
        }
        // e0ᵀ M e1 = M[0][1] = 5
        assert_eq!(m.score(&Triple::new(0, 0, 1)), 5.0);
        assert_eq!(m.score(&Triple::new(1, 0, 0)), 7.0);

        m.reset_gradients();
        m.gradient(&Triple::new(0, 0, 1), 1.0);
        let dr = m.core().registry().get("R").unwrap().gradient.get(0).unwrap().to_owned();
        // ∂M = e0 e1ᵀ has a single 1 at M[0][1], flat index 1·2 + 0
        assert_eq!(dr, array![0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_batched_scoring_matches_naive() {
        assert!(batched_scoring_error(model("rescal", 3, 4).as_ref()) < 1e-10);
    }
}

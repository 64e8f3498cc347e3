//! Complex-bilinear model (ComplEx).
//!
//! Entities and relations are complex vectors, kept as separate real and
//! imaginary families. The score is the real part of the trilinear product
//! with the conjugated object:
//!
//! ```text
//! score = Σ rr·sr·or + rr·si·oi + ri·sr·oi − ri·si·or
//! ```
//!
//! Unlike DistMult this can model antisymmetric relations.

use ndarray::{Array1, ArrayView1};

use super::{ModelContext, ModelCore, Regularization, ScoringModel};
use crate::config::HyperParameters;
use crate::error::Result;
use crate::init::Initializer;
use crate::params::{FamilyId, FamilyKind, ParameterRegistry};
use crate::triples::Triple;

/// ComplEx with families `Er`, `Ei`, `Rr`, `Ri`.
#[derive(Debug)]
pub struct ComplexBilinear {
    core: ModelCore,
    er: FamilyId,
    ei: FamilyId,
    rr: FamilyId,
    ri: FamilyId,
    dim: usize,
}

/// Real and imaginary parts of one triple's embeddings.
struct Parts<'a> {
    sr: ArrayView1<'a, f64>,
    si: ArrayView1<'a, f64>,
    rr: ArrayView1<'a, f64>,
    ri: ArrayView1<'a, f64>,
    or: ArrayView1<'a, f64>,
    oi: ArrayView1<'a, f64>,
}

impl ComplexBilinear {
    /// Build with entity families `Er`, `Ei` (N×k) and relation families `Rr`, `Ri` (K×k).
    pub fn new(hp: &HyperParameters, init: &Initializer, ctx: &mut ModelContext<'_>) -> Result<Self> {
        let k = hp.k;
        let mut registry = ParameterRegistry::new();
        let er = ctx.add_family(&mut registry, init, "Er", FamilyKind::Entity, k)?;
        let ei = ctx.add_family(&mut registry, init, "Ei", FamilyKind::Entity, k)?;
        let rr = ctx.add_family(&mut registry, init, "Rr", FamilyKind::Relation, k)?;
        let ri = ctx.add_family(&mut registry, init, "Ri", FamilyKind::Relation, k)?;
        let core = ModelCore::new(registry, ctx.update, Regularization::from(hp), ctx.num_entities)?;
        Ok(Self {
            core,
            er,
            ei,
            rr,
            ri,
            dim: k,
        })
    }

    fn parts(&self, triple: &Triple) -> Parts<'_> {
        let registry = self.core.registry();
        let (er, ei) = (registry.params(self.er), registry.params(self.ei));
        Parts {
            sr: er.row(triple.subject),
            si: ei.row(triple.subject),
            rr: registry.params(self.rr).row(triple.relation),
            ri: registry.params(self.ri).row(triple.relation),
            or: er.row(triple.object),
            oi: ei.row(triple.object),
        }
    }

    fn relation(&self, relation: usize) -> (ArrayView1<'_, f64>, ArrayView1<'_, f64>) {
        let registry = self.core.registry();
        (
            registry.params(self.rr).row(relation),
            registry.params(self.ri).row(relation),
        )
    }

    /// `Er·a + Ei·b` for every entity.
    fn project(&self, a: &Array1<f64>, b: &Array1<f64>) -> Array1<f64> {
        let registry = self.core.registry();
        registry.params(self.er).matrix().dot(a) + registry.params(self.ei).matrix().dot(b)
    }
}

impl ScoringModel for ComplexBilinear {
    fn dump_name(&self) -> String {
        format!("complex-{}", self.dim)
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn score(&self, triple: &Triple) -> f64 {
        let p = self.parts(triple);
        (0..self.dim)
            .map(|i| {
                p.rr[i] * p.sr[i] * p.or[i] + p.rr[i] * p.si[i] * p.oi[i] + p.ri[i] * p.sr[i] * p.oi[i]
                    - p.ri[i] * p.si[i] * p.or[i]
            })
            .sum()
    }

    fn gradient(&mut self, triple: &Triple, scale: f64) {
        let [d_sr, d_si, d_rr, d_ri, d_or, d_oi] = {
            let p = self.parts(triple);
            [
                &p.rr * &p.or + &p.ri * &p.oi,
                &p.rr * &p.oi - &p.ri * &p.or,
                &p.sr * &p.or + &p.si * &p.oi,
                &p.sr * &p.oi - &p.si * &p.or,
                &p.rr * &p.sr - &p.ri * &p.si,
                &p.rr * &p.si + &p.ri * &p.sr,
            ]
        };

        let (er, ei, rr, ri) = (self.er, self.ei, self.rr, self.ri);
        let registry = self.core.registry_mut();
        let real = registry.gradient_mut(er);
        real.add_scaled(triple.subject, scale, &d_sr.view());
        real.add_scaled(triple.object, scale, &d_or.view());
        let imaginary = registry.gradient_mut(ei);
        imaginary.add_scaled(triple.subject, scale, &d_si.view());
        imaginary.add_scaled(triple.object, scale, &d_oi.view());
        registry
            .gradient_mut(rr)
            .add_scaled(triple.relation, scale, &d_rr.view());
        registry
            .gradient_mut(ri)
            .add_scaled(triple.relation, scale, &d_ri.view());
    }

    fn score_all_objects(&self, subject: usize, relation: usize) -> Array1<f64> {
        let registry = self.core.registry();
        let sr = registry.params(self.er).row(subject);
        let si = registry.params(self.ei).row(subject);
        let (rr, ri) = self.relation(relation);
        let a = &rr * &sr - &ri * &si;
        let b = &rr * &si + &ri * &sr;
        self.project(&a, &b)
    }

    fn score_all_subjects(&self, relation: usize, object: usize) -> Array1<f64> {
        let registry = self.core.registry();
        let or = registry.params(self.er).row(object);
        let oi = registry.params(self.ei).row(object);
        let (rr, ri) = self.relation(relation);
        let c = &rr * &or + &ri * &oi;
        let d = &rr * &oi - &ri * &or;
        self.project(&c, &d)
    }
}

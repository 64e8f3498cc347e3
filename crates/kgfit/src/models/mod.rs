//! Scoring models.
//!
//! | Model | Config name | Score | Families |
//! |-------|-------------|-------|----------|
//! | [`Translational`] | `translational`, `transe` | −‖s + r − o‖ (L1 or squared L2) | `E`, `R` |
//! | [`BilinearDiagonal`] | `bilinear-diagonal`, `distmult` | Σ s⊙r⊙o | `E`, `R` |
//! | [`BilinearMatrix`] | `bilinear-matrix`, `rescal` | sᵀ M_r o | `E`, `R` |
//! | [`ComplexBilinear`] | `complex-bilinear`, `complex` | Re(⟨s, r, ō⟩) | `Er`, `Ei`, `Rr`, `Ri` |
//! | [`Ensemble`] | `ensemble` | Σ_m w_m · score_m | `weights` |
//!
//! Every model supplies an analytic gradient of its score. `gradient(t, c)`
//! adds `c · ∂score(t)/∂θ` into the gradient accumulators; losses pass a
//! negative `c` for triples whose score should go up, since updaters subtract
//! the accumulated step.
//!
//! # References
//!
//! - Bordes et al. (2013): "Translating Embeddings for Modeling Multi-relational Data"
//! - Nickel et al. (2011): "A Three-Way Model for Collective Learning on Multi-Relational Data"
//! - Yang et al. (2015): "Embedding Entities and Relations for Learning and Inference"
//! - Trouillon et al. (2016): "Complex Embeddings for Simple Link Prediction"

mod complex;
mod distmult;
mod ensemble;
mod rescal;
mod transe;

use std::fmt::Debug;
use std::path::Path;
use std::str::FromStr;

use ndarray::{Array1, ArrayViewMut1};
use rand::RngCore;

pub use complex::ComplexBilinear;
pub use distmult::BilinearDiagonal;
pub use ensemble::{Ensemble, EnsembleMember};
pub use rescal::BilinearMatrix;
pub use transe::Translational;

use crate::config::{HyperParameters, InitializerConfig, ModelConfig, UpdateConfig};
use crate::error::{Error, Result};
use crate::init::Initializer;
use crate::params::{Family, FamilyId, FamilyKind, ParameterRegistry};
use crate::triples::Triple;
use crate::updater::{build_updater, ParameterUpdater};

/// A triple scoring function with hand-derived gradients.
pub trait ScoringModel: Debug {
    // =========================================================================
    // Identity
    // =========================================================================

    /// Name used for dump directories, e.g. `transe-50-l2`.
    fn dump_name(&self) -> String;

    /// Parameters, gradients and updater of this model.
    fn core(&self) -> &ModelCore;

    /// Mutable access to [`ScoringModel::core`].
    fn core_mut(&mut self) -> &mut ModelCore;

    /// Number of entities the model can score (N).
    fn num_entities(&self) -> usize {
        self.core().num_entities()
    }

    // =========================================================================
    // Scoring
    // =========================================================================

    /// Plausibility of `triple`; higher is more plausible.
    fn score(&self, triple: &Triple) -> f64;

    /// Accumulate `scale · ∂score(triple)/∂θ` into the gradient buffers.
    fn gradient(&mut self, triple: &Triple, scale: f64);

    /// Scores of `(subject, relation, o)` for every entity `o`.
    fn score_all_objects(&self, subject: usize, relation: usize) -> Array1<f64> {
        (0..self.num_entities())
            .map(|o| self.score(&Triple::new(subject, relation, o)))
            .collect()
    }

    /// Scores of `(s, relation, object)` for every entity `s`.
    fn score_all_subjects(&self, relation: usize, object: usize) -> Array1<f64> {
        (0..self.num_entities())
            .map(|s| self.score(&Triple::new(s, relation, object)))
            .collect()
    }

    // =========================================================================
    // Training hooks
    // =========================================================================

    /// Forget the previous batch's gradients.
    fn reset_gradients(&mut self) {
        self.core_mut().registry.reset_gradients();
    }

    /// Add the L2 penalty, scaled by `scale`, to the touched gradients.
    fn l2(&mut self, scale: f64) {
        self.core_mut().l2(scale);
    }

    /// Turn gradients into steps and apply them.
    fn update(&mut self) {
        self.core_mut().update();
    }

    /// Called after every batch's update.
    fn post_batch(&mut self) {
        self.core_mut().post_batch();
    }

    /// Called after every epoch.
    fn post_epoch(&mut self) {}

    // =========================================================================
    // Persistence and inspection
    // =========================================================================

    /// Write all parameters below `dir`.
    fn dump(&self, dir: &Path) -> Result<()> {
        self.core().registry.dump(dir)
    }

    /// Every parameter family reachable from this model, keyed by path.
    fn families(&self) -> Vec<(String, &Family)> {
        self.core()
            .registry
            .iter()
            .map(|family| (family.name().to_string(), family))
            .collect()
    }

    /// Mutable family by a path returned from [`ScoringModel::families`].
    fn family_mut(&mut self, path: &str) -> Option<&mut Family> {
        self.core_mut().registry.get_mut(path)
    }

    /// Writable embedding `id` of the family at `path`.
    fn parameter_mut(&mut self, path: &str, id: usize) -> Option<ArrayViewMut1<'_, f64>> {
        let family = self.family_mut(path)?;
        (id < family.params.count()).then(|| family.params.row_mut(id))
    }
}

/// L2 weights and renormalization switches shared by the base models.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Regularization {
    /// L2 weight on entity families.
    pub lambda_e: f64,
    /// L2 weight on relation families.
    pub lambda_r: f64,
    /// Renormalize touched entity embeddings after each batch.
    pub normalize_entities: bool,
    /// Renormalize touched relation embeddings after each batch.
    pub normalize_relations: bool,
}

impl From<&HyperParameters> for Regularization {
    fn from(hp: &HyperParameters) -> Self {
        Self {
            lambda_e: hp.lambda_e,
            lambda_r: hp.lambda_r,
            normalize_entities: hp.normalize_entities,
            normalize_relations: hp.normalize_relations,
        }
    }
}

/// State every model owns: its families, their updater and regularization.
#[derive(Debug)]
pub struct ModelCore {
    registry: ParameterRegistry,
    updater: Box<dyn ParameterUpdater>,
    regularization: Regularization,
    num_entities: usize,
}

impl ModelCore {
    /// Wrap a fully registered `registry`; the updater is shaped after it.
    pub fn new(
        registry: ParameterRegistry,
        update: &UpdateConfig,
        regularization: Regularization,
        num_entities: usize,
    ) -> Result<Self> {
        let updater = build_updater(update, &registry)?;
        Ok(Self {
            registry,
            updater,
            regularization,
            num_entities,
        })
    }

    /// The model's families.
    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    /// Mutable access to the model's families.
    pub fn registry_mut(&mut self) -> &mut ParameterRegistry {
        &mut self.registry
    }

    /// Number of entities (N).
    pub fn num_entities(&self) -> usize {
        self.num_entities
    }

    /// Regularization settings.
    pub fn regularization(&self) -> Regularization {
        self.regularization
    }

    /// L2 penalty for touched ids of entity and relation families.
    pub fn l2(&mut self, scale: f64) {
        let reg = self.regularization;
        for family in self.registry.iter_mut() {
            let lambda = match family.kind() {
                FamilyKind::Entity => reg.lambda_e,
                FamilyKind::Relation => reg.lambda_r,
                FamilyKind::Auxiliary => 0.0,
            };
            if lambda * scale > 0.0 {
                family.add_l2(lambda, scale);
            }
        }
    }

    /// Run the updater, then subtract the steps from the parameters.
    pub fn update(&mut self) {
        self.updater.calculate_update(&mut self.registry);
        self.registry.apply_gradients();
    }

    /// Unit-norm renormalization of touched rows, where enabled.
    pub fn post_batch(&mut self) {
        let reg = self.regularization;
        for family in self.registry.iter_mut() {
            let enabled = match family.kind() {
                FamilyKind::Entity => reg.normalize_entities,
                FamilyKind::Relation => reg.normalize_relations,
                FamilyKind::Auxiliary => false,
            };
            if enabled {
                family.normalize_touched();
            }
        }
    }
}

/// Model names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// TransE.
    Translational,
    /// DistMult.
    BilinearDiagonal,
    /// RESCAL.
    BilinearMatrix,
    /// ComplEx.
    ComplexBilinear,
    /// Weighted combination of other models.
    Ensemble,
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "translational" | "transe" => Ok(Self::Translational),
            "bilinear-diagonal" | "distmult" => Ok(Self::BilinearDiagonal),
            "bilinear-matrix" | "rescal" => Ok(Self::BilinearMatrix),
            "complex-bilinear" | "complex" => Ok(Self::ComplexBilinear),
            "ensemble" => Ok(Self::Ensemble),
            _ => Err(Error::unknown("model", s)),
        }
    }
}

/// Everything a model needs from outside its own configuration.
pub struct ModelContext<'a> {
    /// Entity count (N).
    pub num_entities: usize,
    /// Relation count (K).
    pub num_relations: usize,
    /// Updater configuration, applied to every model.
    pub update: &'a UpdateConfig,
    /// Initializer used unless a model overrides it.
    pub initializer: &'a InitializerConfig,
    /// The run's RNG.
    pub rng: &'a mut dyn RngCore,
}

impl ModelContext<'_> {
    /// Create and register one family filled by `init`.
    pub(crate) fn add_family(
        &mut self,
        registry: &mut ParameterRegistry,
        init: &Initializer,
        name: &str,
        kind: FamilyKind,
        dim: usize,
    ) -> Result<FamilyId> {
        let count = match kind {
            FamilyKind::Entity => self.num_entities,
            FamilyKind::Relation => self.num_relations,
            FamilyKind::Auxiliary => {
                return Err(Error::Config(format!(
                    "family `{name}` has no id space to size it"
                )))
            }
        };
        let params = init.initialize(name, count, dim, &mut *self.rng)?;
        registry.register(name, kind, params)
    }
}

/// Build the model described by `config`.
///
/// Unknown model or initializer names are reported before any parameter is
/// allocated.
pub fn build_model(
    config: &ModelConfig,
    ctx: &mut ModelContext<'_>,
) -> Result<Box<dyn ScoringModel>> {
    let kind = config.kind.parse::<ModelKind>()?;
    let init = Initializer::from_config(config.initializer.as_ref().unwrap_or(ctx.initializer))?;
    let hp = &config.hyper_parameters;
    if kind != ModelKind::Ensemble && hp.k == 0 {
        return Err(Error::Config("model.hyperParameters.k must be at least 1".into()));
    }

    let model: Box<dyn ScoringModel> = match kind {
        ModelKind::Translational => Box::new(Translational::new(hp, &init, ctx)?),
        ModelKind::BilinearDiagonal => Box::new(BilinearDiagonal::new(hp, &init, ctx)?),
        ModelKind::BilinearMatrix => Box::new(BilinearMatrix::new(hp, &init, ctx)?),
        ModelKind::ComplexBilinear => Box::new(ComplexBilinear::new(hp, &init, ctx)?),
        ModelKind::Ensemble => Box::new(Ensemble::from_config(config, ctx)?),
    };
    Ok(model)
}

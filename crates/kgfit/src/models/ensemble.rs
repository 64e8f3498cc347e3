//! Weighted ensembles of scoring models.
//!
//! ```text
//! score(t) = Σ_m w[j][m] · score_m(t)      j = relation of t, or 0 for global weights
//! ```
//!
//! The weights form the family `weights` with one row of width M (member
//! count) per relation, or a single global row; every entry starts at 1/M.
//! Members flagged as not trainable are frozen: gradients, regularization,
//! updates and batch hooks are not forwarded to them. This is how a
//! pretrained model is fine-tuned into, or merely weighted by, an ensemble.

use std::collections::HashSet;
use std::path::Path;

use ndarray::Array1;

use super::{build_model, ModelContext, ModelCore, ModelKind, Regularization, ScoringModel};
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::init::Initializer;
use crate::params::{EmbeddingParameterSet, Family, FamilyId, FamilyKind, ParameterRegistry};
use crate::triples::Triple;

/// Subdirectory of an ensemble dump holding its members.
pub const MEMBERS_DIR: &str = "models";

const WEIGHTS: &str = "weights";

/// One ensemble member and whether it learns.
#[derive(Debug)]
pub struct EnsembleMember {
    /// The member model.
    pub model: Box<dyn ScoringModel>,
    /// Whether gradients and hooks reach the member.
    pub trainable: bool,
}

/// Linear combination of member scores with learned weights.
#[derive(Debug)]
pub struct Ensemble {
    core: ModelCore,
    weights: FamilyId,
    members: Vec<EnsembleMember>,
    by_relation: bool,
    normalize_weights: bool,
    fix_weights: bool,
}

impl Ensemble {
    /// Build the members of `config.models`, then the weight family.
    ///
    /// Every member's type is checked before any member is built.
    pub fn from_config(config: &ModelConfig, ctx: &mut ModelContext<'_>) -> Result<Self> {
        if config.models.is_empty() {
            return Err(Error::Config("ensemble needs at least one member in `models`".into()));
        }
        for member in &config.models {
            member.kind.parse::<ModelKind>()?;
        }

        let members = config
            .models
            .iter()
            .map(|member| {
                Ok(EnsembleMember {
                    model: build_model(member, ctx)?,
                    trainable: member.trainable.unwrap_or(config.train_models),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let hp = &config.hyper_parameters;
        Self::new(members, hp.weights_by_relation, ctx)
            .map(|ensemble| ensemble.with_weight_options(hp.normalize_weights, hp.fix_weights))
    }

    /// Ensemble over already built members with uniform initial weights.
    pub fn new(
        members: Vec<EnsembleMember>,
        by_relation: bool,
        ctx: &mut ModelContext<'_>,
    ) -> Result<Self> {
        if members.is_empty() {
            return Err(Error::Config("ensemble needs at least one member".into()));
        }
        let rows = if by_relation { ctx.num_relations } else { 1 };
        let m = members.len();
        let params =
            Initializer::Constant(1.0 / m as f64).initialize(WEIGHTS, rows, m, &mut *ctx.rng)?;
        Self::with_weights(members, by_relation, params, ctx)
    }

    fn with_weights(
        members: Vec<EnsembleMember>,
        by_relation: bool,
        params: EmbeddingParameterSet,
        ctx: &ModelContext<'_>,
    ) -> Result<Self> {
        let mut registry = ParameterRegistry::new();
        let weights = registry.register(WEIGHTS, FamilyKind::Auxiliary, params)?;
        let core = ModelCore::new(registry, ctx.update, Regularization::default(), ctx.num_entities)?;
        Ok(Self {
            core,
            weights,
            members,
            by_relation,
            normalize_weights: false,
            fix_weights: false,
        })
    }

    /// Set weight renormalization and freezing.
    pub fn with_weight_options(mut self, normalize_weights: bool, fix_weights: bool) -> Self {
        self.normalize_weights = normalize_weights;
        self.fix_weights = fix_weights;
        self
    }

    /// The members in configuration order.
    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }

    /// Current weight row used for `relation`.
    pub fn weights_for(&self, relation: usize) -> Array1<f64> {
        self.core
            .registry()
            .params(self.weights)
            .row(self.weight_row(relation))
            .to_owned()
    }

    fn weight_row(&self, relation: usize) -> usize {
        if self.by_relation {
            relation
        } else {
            0
        }
    }

    fn trainable_members(&mut self) -> impl Iterator<Item = &mut Box<dyn ScoringModel>> + '_ {
        self.members
            .iter_mut()
            .filter(|member| member.trainable)
            .map(|member| &mut member.model)
    }

    /// Member directory names, made unique by suffixing the member index.
    fn member_dirs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.members
            .iter()
            .enumerate()
            .map(|(i, member)| {
                let name = member.model.dump_name();
                if seen.insert(name.clone()) {
                    name
                } else {
                    format!("{name}-{i}")
                }
            })
            .collect()
    }
}

impl ScoringModel for Ensemble {
    fn dump_name(&self) -> String {
        let scope = if self.by_relation { "relation" } else { "global" };
        let finetune = if self.members.iter().any(|m| m.trainable) {
            "-finetune"
        } else {
            ""
        };
        let names: Vec<String> = self.members.iter().map(|m| m.model.dump_name()).collect();
        format!("ensemble-{scope}{finetune}-{}", names.join("-"))
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn score(&self, triple: &Triple) -> f64 {
        let weights = self.core.registry().params(self.weights);
        let w = weights.row(self.weight_row(triple.relation));
        self.members
            .iter()
            .zip(&w)
            .map(|(member, w)| w * member.model.score(triple))
            .sum()
    }

    fn gradient(&mut self, triple: &Triple, scale: f64) {
        let row = self.weight_row(triple.relation);
        let w = self.weights_for(triple.relation);
        let scores: Array1<f64> = self
            .members
            .iter()
            .map(|member| member.model.score(triple))
            .collect();

        for (member, &weight) in self.members.iter_mut().zip(&w) {
            if member.trainable {
                member.model.gradient(triple, scale * weight);
            }
        }
        if !self.fix_weights {
            self.core
                .registry_mut()
                .gradient_mut(self.weights)
                .add_scaled(row, scale, &scores.view());
        }
    }

    fn score_all_objects(&self, subject: usize, relation: usize) -> Array1<f64> {
        let w = self.weights_for(relation);
        let mut scores = Array1::zeros(self.num_entities());
        for (member, &weight) in self.members.iter().zip(&w) {
            scores.scaled_add(weight, &member.model.score_all_objects(subject, relation));
        }
        scores
    }

    fn score_all_subjects(&self, relation: usize, object: usize) -> Array1<f64> {
        let w = self.weights_for(relation);
        let mut scores = Array1::zeros(self.num_entities());
        for (member, &weight) in self.members.iter().zip(&w) {
            scores.scaled_add(weight, &member.model.score_all_subjects(relation, object));
        }
        scores
    }

    fn reset_gradients(&mut self) {
        self.core.registry_mut().reset_gradients();
        for model in self.trainable_members() {
            model.reset_gradients();
        }
    }

    /// Weights are not regularized; only trainable members are.
    fn l2(&mut self, scale: f64) {
        for model in self.trainable_members() {
            model.l2(scale);
        }
    }

    fn update(&mut self) {
        self.core.update();
        for model in self.trainable_members() {
            model.update();
        }
    }

    fn post_batch(&mut self) {
        if self.normalize_weights {
            self.core.registry_mut().family_mut(self.weights).normalize_touched();
        }
        for model in self.trainable_members() {
            model.post_batch();
        }
    }

    fn post_epoch(&mut self) {
        for model in self.trainable_members() {
            model.post_epoch();
        }
    }

    fn dump(&self, dir: &Path) -> Result<()> {
        self.core.registry().dump(dir)?;
        for (member, name) in self.members.iter().zip(self.member_dirs()) {
            member.model.dump(&dir.join(MEMBERS_DIR).join(name))?;
        }
        Ok(())
    }

    fn families(&self) -> Vec<(String, &Family)> {
        let mut families: Vec<(String, &Family)> = self
            .core
            .registry()
            .iter()
            .map(|family| (family.name().to_string(), family))
            .collect();
        for (i, member) in self.members.iter().enumerate() {
            families.extend(
                member
                    .model
                    .families()
                    .into_iter()
                    .map(|(path, family)| (format!("{MEMBERS_DIR}/{i}/{path}"), family)),
            );
        }
        families
    }

    fn family_mut(&mut self, path: &str) -> Option<&mut Family> {
        match path.strip_prefix(MEMBERS_DIR).and_then(|p| p.strip_prefix('/')) {
            Some(rest) => {
                let (index, inner) = rest.split_once('/')?;
                let index: usize = index.parse().ok()?;
                self.members.get_mut(index)?.model.family_mut(inner)
            }
            None => self.core.registry_mut().get_mut(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::model_from;
    use super::*;

    fn ensemble(by_relation: bool, second_trainable: bool) -> Box<dyn ScoringModel> {
        let mut config = ModelConfig::ensemble(vec![
            ModelConfig::new("transe", 3),
            ModelConfig::new("distmult", 3).with_trainable(second_trainable),
        ]);
        config.hyper_parameters.weights_by_relation = by_relation;
        model_from(&config, 4)
    }

    #[test]
    fn test_uniform_initial_weights() {
        let m = ensemble(true, true);
        let w = &m.core().registry().get("weights").unwrap().params;
        assert_eq!(w.count(), 2);
        assert_eq!(w.dim(), 2);
        assert!(w.matrix().iter().all(|&v| v == 0.5));
        assert_eq!(w.row(1).to_vec(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_score_is_weighted_sum_of_members() {
        let m = model_from(
            &ModelConfig::ensemble(vec![ModelConfig::new("transe", 3)]),
            1,
        );
        let single = model_from(&ModelConfig::new("transe", 3), 1);
        let t = Triple::new(1, 0, 2);
        // One member with weight 1 built from the same seed.
        assert!((m.score(&t) - single.score(&t)).abs() < 1e-12);
    }

    #[test]
    fn test_frozen_member_receives_no_gradient() {
        let mut m = ensemble(false, false);
        let t = Triple::new(0, 1, 2);
        m.reset_gradients();
        m.gradient(&t, 1.0);

        let families = m.families();
        let touched = |path: &str| {
            families
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, f)| !f.gradient.is_empty())
                .unwrap()
        };
        assert!(touched("weights"));
        assert!(touched("models/0/E"));
        assert!(!touched("models/1/E"));
    }

    #[test]
    fn test_weight_gradient_is_member_scores() {
        let mut m = ensemble(true, true);
        let t = Triple::new(3, 1, 4);
        m.reset_gradients();
        m.gradient(&t, 2.0);

        let families = m.families();
        let weights = families.iter().find(|(p, _)| p == "weights").unwrap().1;
        let grad = weights.gradient.get(1).unwrap().to_owned();
        assert!(weights.gradient.get(0).is_none());

        // Rebuild the members with the same seed to get their scores.
        let transe = model_from(&ModelConfig::new("transe", 3), 4);
        assert!((grad[0] - 2.0 * transe.score(&t)).abs() < 1e-12);
    }

    #[test]
    fn test_dump_name() {
        assert_eq!(
            ensemble(true, true).dump_name(),
            "ensemble-relation-finetune-transe-3-l2-distmult-3"
        );
        let frozen = model_from(
            &ModelConfig {
                train_models: false,
                ..ModelConfig::ensemble(vec![ModelConfig::new("rescal", 2)])
            },
            0,
        );
        assert_eq!(frozen.dump_name(), "ensemble-global-rescal-2");
    }

    #[test]
    fn test_unknown_member_type_rejected_up_front() {
        let config = ModelConfig::ensemble(vec![
            ModelConfig::new("transe", 3),
            ModelConfig::new("holographic", 3),
        ]);
        let update = crate::config::UpdateConfig::default();
        let initializer = crate::config::InitializerConfig::default();
        let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(0);
        let mut ctx = ModelContext {
            num_entities: 5,
            num_relations: 2,
            update: &update,
            initializer: &initializer,
            rng: &mut rng,
        };
        assert!(matches!(
            build_model(&config, &mut ctx),
            Err(Error::UnknownVariant { component: "model", .. })
        ));
    }

    #[test]
    fn test_family_paths_resolve() {
        let mut m = ensemble(false, true);
        assert!(m.family_mut("weights").is_some());
        assert!(m.family_mut("models/1/R").is_some());
        assert!(m.family_mut("models/2/R").is_none());
        assert!(m.family_mut("models/x").is_none());
    }
}

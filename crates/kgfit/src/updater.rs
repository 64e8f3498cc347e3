//! Parameter updaters.
//!
//! An updater rewrites each touched gradient slot in place into the step that
//! will be subtracted from the parameters. It only visits ids touched in the
//! current batch, but its per-id statistics live in dense matrices shaped
//! like the families they shadow and persist for the whole run.
//!
//! | Type | Step | Defaults |
//! |------|------|----------|
//! | `sgd` | α·g | α = 0.01 |
//! | `adagrad` | α·g / (√G + δ), G += g² | α = 0.1, δ = 1e-7 |
//! | `adadelta` | g·√(U + δ) / √(G + δ) | ρ = 0.95, δ = 1e-7 |
//! | `rmsprop` | α·g / (√G + δ), G = ρG + (1−ρ)g² | α = 0.001, ρ = 0.9, δ = 1e-7 |
//!
//! For AdaDelta, G = ρG + (1−ρ)g² before the step and U = ρU + (1−ρ)step²
//! after it.
//!
//! # References
//!
//! - Duchi et al. (2011): AdaGrad
//! - Zeiler (2012): "ADADELTA: An Adaptive Learning Rate Method"
//! - Tieleman & Hinton (2012): RMSProp, Coursera lecture 6.5

use std::fmt::Debug;
use std::str::FromStr;

use ndarray::{Array2, Zip};

use crate::config::UpdateConfig;
use crate::error::{Error, Result};
use crate::params::ParameterRegistry;

const DEFAULT_DELTA: f64 = 1e-7;

/// Turns accumulated gradients into update steps.
pub trait ParameterUpdater: Debug {
    /// Updater name as used in configuration.
    fn name(&self) -> &'static str;

    /// Replace every touched gradient slot of `registry` with its step.
    fn calculate_update(&mut self, registry: &mut ParameterRegistry);
}

/// Updater names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdaterKind {
    /// Plain gradient descent.
    Sgd,
    /// Per-coordinate learning rates from summed squared gradients.
    AdaGrad,
    /// Learning-rate free running-average method.
    AdaDelta,
    /// Running average of squared gradients.
    RmsProp,
}

impl FromStr for UpdaterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sgd" => Ok(Self::Sgd),
            "adagrad" => Ok(Self::AdaGrad),
            "adadelta" => Ok(Self::AdaDelta),
            "rmsprop" => Ok(Self::RmsProp),
            _ => Err(Error::unknown("updater", s)),
        }
    }
}

/// Build the configured updater with state shaped like `registry`.
pub fn build_updater(
    config: &UpdateConfig,
    registry: &ParameterRegistry,
) -> Result<Box<dyn ParameterUpdater>> {
    let delta = config.delta.unwrap_or(DEFAULT_DELTA);
    if delta < 0.0 {
        return Err(Error::Config(format!("update.delta must be >= 0, got {delta}")));
    }
    let updater: Box<dyn ParameterUpdater> = match config.kind.parse::<UpdaterKind>()? {
        UpdaterKind::Sgd => Box::new(Sgd::new(learning_rate(config, 0.01)?)),
        UpdaterKind::AdaGrad => {
            Box::new(AdaGrad::new(learning_rate(config, 0.1)?, delta, registry))
        }
        UpdaterKind::AdaDelta => Box::new(AdaDelta::new(decay(config, 0.95)?, delta, registry)),
        UpdaterKind::RmsProp => Box::new(RmsProp::new(
            learning_rate(config, 0.001)?,
            decay(config, 0.9)?,
            delta,
            registry,
        )),
    };
    Ok(updater)
}

fn learning_rate(config: &UpdateConfig, default: f64) -> Result<f64> {
    let alpha = config.alpha.unwrap_or(default);
    if alpha > 0.0 {
        Ok(alpha)
    } else {
        Err(Error::Config(format!("update.alpha must be > 0, got {alpha}")))
    }
}

fn decay(config: &UpdateConfig, default: f64) -> Result<f64> {
    let rho = config.rho.unwrap_or(default);
    if (0.0..1.0).contains(&rho) {
        Ok(rho)
    } else {
        Err(Error::Config(format!("update.rho must be in [0, 1), got {rho}")))
    }
}

fn state_like(registry: &ParameterRegistry) -> Vec<Array2<f64>> {
    registry
        .iter()
        .map(|family| Array2::zeros((family.params.count(), family.params.dim())))
        .collect()
}

/// Stochastic gradient descent.
#[derive(Debug, Clone)]
pub struct Sgd {
    alpha: f64,
}

impl Sgd {
    /// SGD with learning rate `alpha`.
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }
}

impl ParameterUpdater for Sgd {
    fn name(&self) -> &'static str {
        "sgd"
    }

    fn calculate_update(&mut self, registry: &mut ParameterRegistry) {
        let alpha = self.alpha;
        for family in registry.iter_mut() {
            family.gradient.for_each_mut(|_, _, mut grad| grad *= alpha);
        }
    }
}

/// AdaGrad.
#[derive(Debug, Clone)]
pub struct AdaGrad {
    alpha: f64,
    delta: f64,
    squared: Vec<Array2<f64>>,
}

impl AdaGrad {
    /// AdaGrad over the families of `registry`.
    pub fn new(alpha: f64, delta: f64, registry: &ParameterRegistry) -> Self {
        Self {
            alpha,
            delta,
            squared: state_like(registry),
        }
    }
}

impl ParameterUpdater for AdaGrad {
    fn name(&self) -> &'static str {
        "adagrad"
    }

    fn calculate_update(&mut self, registry: &mut ParameterRegistry) {
        let (alpha, delta) = (self.alpha, self.delta);
        for (family, squared) in registry.iter_mut().zip(&mut self.squared) {
            family.gradient.for_each_mut(|id, _, mut grad| {
                Zip::from(&mut grad)
                    .and(squared.row_mut(id))
                    .for_each(|g, acc| {
                        *acc += *g * *g;
                        *g = alpha * *g / (acc.sqrt() + delta);
                    });
            });
        }
    }
}

/// AdaDelta.
#[derive(Debug, Clone)]
pub struct AdaDelta {
    rho: f64,
    delta: f64,
    squared_gradients: Vec<Array2<f64>>,
    squared_updates: Vec<Array2<f64>>,
}

impl AdaDelta {
    /// AdaDelta over the families of `registry`.
    pub fn new(rho: f64, delta: f64, registry: &ParameterRegistry) -> Self {
        Self {
            rho,
            delta,
            squared_gradients: state_like(registry),
            squared_updates: state_like(registry),
        }
    }
}

impl ParameterUpdater for AdaDelta {
    fn name(&self) -> &'static str {
        "adadelta"
    }

    fn calculate_update(&mut self, registry: &mut ParameterRegistry) {
        let (rho, delta) = (self.rho, self.delta);
        let states = self
            .squared_gradients
            .iter_mut()
            .zip(&mut self.squared_updates);
        for (family, (gradients, updates)) in registry.iter_mut().zip(states) {
            family.gradient.for_each_mut(|id, _, mut grad| {
                Zip::from(&mut grad)
                    .and(gradients.row_mut(id))
                    .and(updates.row_mut(id))
                    .for_each(|g, acc_g, acc_u| {
                        *acc_g = rho * *acc_g + (1.0 - rho) * *g * *g;
                        let step = *g * (*acc_u + delta).sqrt() / (*acc_g + delta).sqrt();
                        *acc_u = rho * *acc_u + (1.0 - rho) * step * step;
                        *g = step;
                    });
            });
        }
    }
}

/// RMSProp.
#[derive(Debug, Clone)]
pub struct RmsProp {
    alpha: f64,
    rho: f64,
    delta: f64,
    squared: Vec<Array2<f64>>,
}

impl RmsProp {
    /// RMSProp over the families of `registry`.
    pub fn new(alpha: f64, rho: f64, delta: f64, registry: &ParameterRegistry) -> Self {
        Self {
            alpha,
            rho,
            delta,
            squared: state_like(registry),
        }
    }
}

impl ParameterUpdater for RmsProp {
    fn name(&self) -> &'static str {
        "rmsprop"
    }

    fn calculate_update(&mut self, registry: &mut ParameterRegistry) {
        let (alpha, rho, delta) = (self.alpha, self.rho, self.delta);
        for (family, squared) in registry.iter_mut().zip(&mut self.squared) {
            family.gradient.for_each_mut(|id, _, mut grad| {
                Zip::from(&mut grad)
                    .and(squared.row_mut(id))
                    .for_each(|g, acc| {
                        *acc = rho * *acc + (1.0 - rho) * *g * *g;
                        *g = alpha * *g / (acc.sqrt() + delta);
                    });
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{EmbeddingParameterSet, FamilyId, FamilyKind};
    use ndarray::array;

    fn single_family() -> (ParameterRegistry, FamilyId) {
        let mut registry = ParameterRegistry::new();
        let id = registry
            .register("E", FamilyKind::Entity, EmbeddingParameterSet::zeros(3, 1))
            .unwrap();
        (registry, id)
    }

    fn config(kind: &str) -> UpdateConfig {
        UpdateConfig {
            kind: kind.into(),
            ..UpdateConfig::default()
        }
    }

    fn step(updater: &mut dyn ParameterUpdater, registry: &mut ParameterRegistry, id: FamilyId, g: f64) -> f64 {
        registry.reset_gradients();
        registry.gradient_mut(id).add(1, &array![g].view());
        updater.calculate_update(registry);
        registry.family(id).gradient.get(1).unwrap()[0]
    }

    #[test]
    fn test_adagrad_first_step() {
        let (mut registry, e) = single_family();
        let mut updater = AdaGrad::new(0.1, 1e-7, &registry);
        let s = step(&mut updater, &mut registry, e, 2.0);
        assert!((s - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_adagrad_state_persists_across_batches() {
        let (mut registry, e) = single_family();
        let mut updater = AdaGrad::new(0.1, 0.0, &registry);
        step(&mut updater, &mut registry, e, 2.0);
        // accumulated 4 + 4 = 8
        let s = step(&mut updater, &mut registry, e, 2.0);
        assert!((s - 0.2 / 8f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_sgd_scales() {
        let (mut registry, e) = single_family();
        let mut updater = Sgd::new(0.5);
        assert_eq!(step(&mut updater, &mut registry, e, 3.0), 1.5);
    }

    #[test]
    fn test_adadelta_first_step() {
        let (mut registry, e) = single_family();
        let mut updater = AdaDelta::new(0.9, 1e-6, &registry);
        let s = step(&mut updater, &mut registry, e, 1.0);
        // G = 0.1, step = 1 * sqrt(1e-6) / sqrt(0.1 + 1e-6)
        let expected = 1e-6f64.sqrt() / (0.1f64 + 1e-6).sqrt();
        assert!((s - expected).abs() < 1e-12);
    }

    #[test]
    fn test_rmsprop_first_step() {
        let (mut registry, e) = single_family();
        let mut updater = RmsProp::new(0.01, 0.9, 0.0, &registry);
        let s = step(&mut updater, &mut registry, e, 2.0);
        // G = 0.1 * 4 = 0.4
        assert!((s - 0.02 / 0.4f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_untouched_ids_keep_their_state() {
        let (mut registry, e) = single_family();
        let mut updater = AdaGrad::new(1.0, 0.0, &registry);
        step(&mut updater, &mut registry, e, 2.0);
        assert_eq!(updater.squared[0][[1, 0]], 4.0);
        assert_eq!(updater.squared[0][[0, 0]], 0.0);
    }

    #[test]
    fn test_factory() {
        let (registry, _) = single_family();
        for kind in ["sgd", "AdaGrad", "adadelta", "rmsprop"] {
            let updater = build_updater(&config(kind), &registry).unwrap();
            assert_eq!(updater.name(), kind.to_ascii_lowercase());
        }
        let err = build_updater(&config("adam"), &registry).unwrap_err();
        assert!(matches!(err, Error::UnknownVariant { component: "updater", .. }));
        let bad_rho = UpdateConfig {
            rho: Some(1.5),
            ..config("adadelta")
        };
        assert!(matches!(build_updater(&bad_rho, &registry), Err(Error::Config(_))));
    }
}

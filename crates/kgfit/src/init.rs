//! Parameter initialization.
//!
//! | Type | Values |
//! |------|--------|
//! | `xavier` | U(−6/√k, 6/√k), the TransE initialization (Bordes et al. 2013) |
//! | `normal` | N(mean, std) |
//! | `uniform` | U(low, high) |
//! | `pretrained` | read from `<location>/parameters/<family>` |
//!
//! All random draws come from the caller's RNG so runs are reproducible
//! from the configured seed.

use std::path::PathBuf;
use std::str::FromStr;

use ndarray::Array2;
use rand::RngCore;
use rand_distr::{Distribution, Normal, Uniform};

use crate::config::InitializerConfig;
use crate::error::{Error, Result};
use crate::io;
use crate::params::{EmbeddingParameterSet, PARAMETERS_DIR};

/// Initializer names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializerKind {
    /// Scaled uniform.
    Xavier,
    /// Gaussian.
    Normal,
    /// Plain uniform.
    Uniform,
    /// Loaded from a previous dump.
    Pretrained,
}

impl FromStr for InitializerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "xavier" => Ok(Self::Xavier),
            "normal" | "gaussian" => Ok(Self::Normal),
            "uniform" => Ok(Self::Uniform),
            "pretrained" => Ok(Self::Pretrained),
            _ => Err(Error::unknown("initializer", s)),
        }
    }
}

/// Fills a new parameter family.
#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    /// U(−6/√dim, 6/√dim).
    Xavier,
    /// N(mean, std).
    Normal {
        /// Mean.
        mean: f64,
        /// Standard deviation.
        std: f64,
    },
    /// U(low, high).
    Uniform {
        /// Inclusive lower bound.
        low: f64,
        /// Exclusive upper bound.
        high: f64,
    },
    /// Matrices from an earlier dump.
    Pretrained {
        /// Dump location containing `parameters/`.
        location: PathBuf,
    },
    /// Every entry equal to one value.
    Constant(f64),
}

impl Initializer {
    /// Build from configuration, rejecting unknown types and bad parameters.
    pub fn from_config(config: &InitializerConfig) -> Result<Self> {
        match config.kind.parse::<InitializerKind>()? {
            InitializerKind::Xavier => Ok(Self::Xavier),
            InitializerKind::Normal => {
                if !(config.std > 0.0) {
                    return Err(Error::Config(format!(
                        "normal initializer needs std > 0, got {}",
                        config.std
                    )));
                }
                Ok(Self::Normal {
                    mean: config.mean,
                    std: config.std,
                })
            }
            InitializerKind::Uniform => {
                if !(config.low < config.high) {
                    return Err(Error::Config(format!(
                        "uniform initializer needs low < high, got [{}, {})",
                        config.low, config.high
                    )));
                }
                Ok(Self::Uniform {
                    low: config.low,
                    high: config.high,
                })
            }
            InitializerKind::Pretrained => {
                let location = config.location.clone().ok_or_else(|| {
                    Error::Config("pretrained initializer needs `location`".into())
                })?;
                Ok(Self::Pretrained { location })
            }
        }
    }

    /// Create the `count x dim` family `family`.
    pub fn initialize(
        &self,
        family: &str,
        count: usize,
        dim: usize,
        rng: &mut dyn RngCore,
    ) -> Result<EmbeddingParameterSet> {
        let values = match self {
            Self::Xavier => {
                let bound = 6.0 / (dim.max(1) as f64).sqrt();
                sample_uniform(count, dim, -bound, bound, rng)?
            }
            Self::Normal { mean, std } => {
                let normal = Normal::new(*mean, *std)
                    .map_err(|e| Error::Config(format!("normal initializer: {e}")))?;
                Array2::from_shape_simple_fn((count, dim), || normal.sample(&mut *rng))
            }
            Self::Uniform { low, high } => sample_uniform(count, dim, *low, *high, rng)?,
            Self::Pretrained { location } => {
                let path = location.join(PARAMETERS_DIR).join(family);
                let values = io::load_matrix(&path)?;
                if values.dim() != (count, dim) {
                    return Err(Error::shape((count, dim), values.dim()));
                }
                values
            }
            Self::Constant(value) => Array2::from_elem((count, dim), *value),
        };
        Ok(EmbeddingParameterSet::from_matrix(values))
    }
}

fn sample_uniform(
    count: usize,
    dim: usize,
    low: f64,
    high: f64,
    rng: &mut dyn RngCore,
) -> Result<Array2<f64>> {
    let uniform = Uniform::new(low, high)
        .map_err(|e| Error::Config(format!("uniform range [{low}, {high}): {e}")))?;
    Ok(Array2::from_shape_simple_fn((count, dim), || {
        uniform.sample(&mut *rng)
    }))
}

//! Run configuration, deserialized from JSON.
//!
//! Every field has a default, so a minimal file only names what differs:
//!
//! ```json
//! {
//!   "data": { "dir": "data/wn18" },
//!   "model": { "type": "complex", "hyperParameters": { "k": 100 } },
//!   "optimizer": { "type": "softmax", "batchSize": 500, "maxEpochs": 200 },
//!   "update": { "type": "adagrad", "alpha": 0.1 }
//! }
//! ```
//!
//! Component types are plain strings here; the factories parse them and
//! report unknown names as [`Error::UnknownVariant`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::init::InitializerKind;
use crate::loss::LossKind;
use crate::models::ModelKind;
use crate::sampling::{SamplerKind, SamplingMode};
use crate::updater::UpdaterKind;

/// Complete run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Seed of the run's single RNG (default: 42).
    pub seed: u64,
    /// Input files.
    pub data: DataConfig,
    /// Scoring model.
    pub model: ModelConfig,
    /// Loss, batching, sampling and early stopping.
    pub optimizer: OptimizerConfig,
    /// Parameter updater shared by every model.
    pub update: UpdateConfig,
    /// Default initializer for every model.
    pub initializer: InitializerConfig,
    /// Output locations.
    pub serialization: SerializationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: 42,
            data: DataConfig::default(),
            model: ModelConfig::default(),
            optimizer: OptimizerConfig::default(),
            update: UpdateConfig::default(),
            initializer: InitializerConfig::default(),
            serialization: SerializationConfig::default(),
        }
    }
}

impl Config {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file. Relative data paths are kept as written.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Check value ranges that serde cannot express and every component name.
    pub fn validate(&self) -> Result<()> {
        if self.optimizer.batch_size == 0 {
            return Err(Error::Config("optimizer.batchSize must be at least 1".into()));
        }
        if self.optimizer.early_stopping.every_n_epochs == 0 {
            return Err(Error::Config(
                "optimizer.earlyStopping.everyNEpochs must be at least 1".into(),
            ));
        }
        self.optimizer.kind.parse::<LossKind>()?;
        self.optimizer.sampling.kind.parse::<SamplerKind>()?;
        self.optimizer.sampling.mode.parse::<SamplingMode>()?;
        self.update.kind.parse::<UpdaterKind>()?;
        self.initializer.kind.parse::<InitializerKind>()?;
        self.model.validate()
    }

    /// Set the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data.dir = dir.into();
        self
    }

    /// Replace the model configuration.
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    /// Set the loss type (`pair`, `softmax`, `logistic`).
    pub fn with_loss(mut self, loss: &str) -> Self {
        self.optimizer.kind = loss.to_string();
        self
    }

    /// Set the updater type and learning rate.
    pub fn with_update(mut self, kind: &str, alpha: f64) -> Self {
        self.update.kind = kind.to_string();
        self.update.alpha = Some(alpha);
        self
    }

    /// Set batch size and epoch cap.
    pub fn with_schedule(mut self, batch_size: usize, max_epochs: usize) -> Self {
        self.optimizer.batch_size = batch_size;
        self.optimizer.max_epochs = max_epochs;
        self
    }

    /// Set the dump directory.
    pub fn with_dump_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.serialization.dump_directory = dir.into();
        self
    }
}

/// Where the triple files live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataConfig {
    /// Directory holding the three split files (default: `.`).
    pub dir: PathBuf,
    /// Training split file name (default: `train.txt`).
    pub train_file: String,
    /// Validation split file name (default: `valid.txt`).
    pub valid_file: String,
    /// Test split file name (default: `test.txt`).
    pub test_file: String,
    /// Maximum triples read per file; `null` or negative reads all (default: all).
    #[serde(deserialize_with = "count_or_all")]
    pub limit: Option<usize>,
    /// Skip held-out triples with unseen tokens (default: true).
    pub ignore_new_constituents: bool,
    /// Seed the vocabulary from dumped mapping files (default: false).
    pub load_mappings: bool,
    /// Directory of the mapping files to load (default: `dir`).
    pub location: Option<PathBuf>,
    /// Write mapping files into the dump location (default: true).
    pub dump_mappings: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            train_file: "train.txt".into(),
            valid_file: "valid.txt".into(),
            test_file: "test.txt".into(),
            limit: None,
            ignore_new_constituents: true,
            load_mappings: false,
            location: None,
            dump_mappings: true,
        }
    }
}

/// Scoring model selection. Ensembles nest member configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelConfig {
    /// `translational`/`transe`, `bilinear-diagonal`/`distmult`,
    /// `bilinear-matrix`/`rescal`, `complex-bilinear`/`complex`, `ensemble`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Model hyperparameters.
    pub hyper_parameters: HyperParameters,
    /// Ensemble members.
    pub models: Vec<ModelConfig>,
    /// Default trainability of ensemble members (default: true).
    pub train_models: bool,
    /// Trainability of this model when it is an ensemble member.
    pub trainable: Option<bool>,
    /// Initializer override for this model.
    pub initializer: Option<InitializerConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: "transe".into(),
            hyper_parameters: HyperParameters::default(),
            models: Vec::new(),
            train_models: true,
            trainable: None,
            initializer: None,
        }
    }
}

impl ModelConfig {
    /// Model of `kind` with embedding dimension `k`.
    pub fn new(kind: &str, k: usize) -> Self {
        Self {
            kind: kind.to_string(),
            hyper_parameters: HyperParameters {
                k,
                ..HyperParameters::default()
            },
            ..Self::default()
        }
    }

    /// Ensemble over `members`.
    pub fn ensemble(members: Vec<ModelConfig>) -> Self {
        Self {
            kind: "ensemble".into(),
            models: members,
            ..Self::default()
        }
    }

    /// Use the L1 distance (translational models).
    pub fn with_l1(mut self, use_l1: bool) -> Self {
        self.hyper_parameters.use_l1 = use_l1;
        self
    }

    /// Set the trainable flag used when this model is an ensemble member.
    pub fn with_trainable(mut self, trainable: bool) -> Self {
        self.trainable = Some(trainable);
        self
    }

    /// Override the initializer for this model.
    pub fn with_initializer(mut self, initializer: InitializerConfig) -> Self {
        self.initializer = Some(initializer);
        self
    }

    fn validate(&self) -> Result<()> {
        if let Some(initializer) = &self.initializer {
            initializer.kind.parse::<InitializerKind>()?;
        }
        if self.kind.parse::<ModelKind>()? == ModelKind::Ensemble {
            if self.models.is_empty() {
                return Err(Error::Config("ensemble needs at least one member in `models`".into()));
            }
            return self.models.iter().try_for_each(ModelConfig::validate);
        }
        if self.hyper_parameters.k == 0 {
            return Err(Error::Config("model.hyperParameters.k must be at least 1".into()));
        }
        Ok(())
    }
}

/// Model hyperparameters. Each model reads the subset it understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HyperParameters {
    /// Embedding dimension (default: 50).
    pub k: usize,
    /// L1 instead of squared L2 distance for translational models.
    pub use_l1: bool,
    /// Margin of the pairwise hinge loss (default: 1.0).
    pub margin: f64,
    /// L2 weight on entity embeddings (default: 0).
    #[serde(alias = "lambda_e")]
    pub lambda_e: f64,
    /// L2 weight on relation embeddings (default: 0).
    #[serde(alias = "lambda_r")]
    pub lambda_r: f64,
    /// Renormalize touched entity embeddings after every batch.
    pub normalize_entities: bool,
    /// Renormalize touched relation embeddings after every batch.
    pub normalize_relations: bool,
    /// Ensemble: one weight vector per relation instead of one global vector.
    pub weights_by_relation: bool,
    /// Ensemble: renormalize touched weight vectors after every batch.
    pub normalize_weights: bool,
    /// Ensemble: do not learn the weights.
    pub fix_weights: bool,
}

impl Default for HyperParameters {
    fn default() -> Self {
        Self {
            k: 50,
            use_l1: false,
            margin: 1.0,
            lambda_e: 0.0,
            lambda_r: 0.0,
            normalize_entities: false,
            normalize_relations: false,
            weights_by_relation: false,
            normalize_weights: false,
            fix_weights: false,
        }
    }
}

/// Loss, batching, sampling and early stopping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizerConfig {
    /// Loss type: `pair`, `softmax` or `logistic` (default: `pair`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Positives per batch (default: 100).
    pub batch_size: usize,
    /// Epoch cap (default: 1000).
    pub max_epochs: usize,
    /// Append the validation split to the training split.
    pub train_on_validation: bool,
    /// Run the final evaluation on the validation split.
    pub test_on_validation: bool,
    /// Negative sampling.
    pub sampling: SamplingConfig,
    /// Early stopping.
    pub early_stopping: EarlyStoppingConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: "pair".into(),
            batch_size: 100,
            max_epochs: 1000,
            train_on_validation: false,
            test_on_validation: false,
            sampling: SamplingConfig::default(),
            early_stopping: EarlyStoppingConfig::default(),
        }
    }
}

/// Negative sampling strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingConfig {
    /// `lcwa` or `corruption` (default: `lcwa`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Negatives per positive (default: 1).
    pub number_of_negatives: usize,
    /// Redraws before accepting a colliding negative (default: 10).
    pub number_of_retries: usize,
    /// `subject`, `object`, `both` or `random` (default: `random`).
    pub mode: String,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            kind: "lcwa".into(),
            number_of_negatives: 1,
            number_of_retries: 10,
            mode: "random".into(),
        }
    }
}

/// Validation-driven early stopping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EarlyStoppingConfig {
    /// Enable early stopping (default: true).
    pub use_early_stopping: bool,
    /// Validate every N epochs (default: 50).
    pub every_n_epochs: usize,
    /// Validation triples sampled per check; `null` or negative uses all
    /// (default: 1000).
    #[serde(deserialize_with = "count_or_all")]
    pub n: Option<usize>,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            use_early_stopping: true,
            every_n_epochs: 50,
            n: Some(1000),
        }
    }
}

/// Parameter updater. Unset hyperparameters take per-type defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateConfig {
    /// `sgd`, `adagrad`, `adadelta` or `rmsprop` (default: `sgd`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Learning rate.
    pub alpha: Option<f64>,
    /// Numerical stabilizer.
    pub delta: Option<f64>,
    /// Decay of the running averages.
    pub rho: Option<f64>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            kind: "sgd".into(),
            alpha: None,
            delta: None,
            rho: None,
        }
    }
}

/// Parameter initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializerConfig {
    /// `xavier`, `normal`, `uniform` or `pretrained` (default: `xavier`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Normal mean (default: 0).
    pub mean: f64,
    /// Normal standard deviation (default: 1).
    #[serde(alias = "var")]
    pub std: f64,
    /// Uniform lower bound (default: -0.1).
    pub low: f64,
    /// Uniform upper bound (default: 0.1).
    pub high: f64,
    /// Pretrained dump location.
    pub location: Option<PathBuf>,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            kind: "xavier".into(),
            mean: 0.0,
            std: 1.0,
            low: -0.1,
            high: 0.1,
            location: None,
        }
    }
}

impl InitializerConfig {
    /// Pretrained initializer reading from `location`.
    pub fn pretrained(location: impl Into<PathBuf>) -> Self {
        Self {
            kind: "pretrained".into(),
            location: Some(location.into()),
            ..Self::default()
        }
    }
}

/// Output locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SerializationConfig {
    /// Parent directory of run outputs (default: `./models`).
    pub dump_directory: PathBuf,
    /// Run directory name; `auto` derives it from the model name and time.
    pub dump_location: String,
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            dump_directory: PathBuf::from("./models"),
            dump_location: "auto".into(),
        }
    }
}

/// Count where `null` or a negative number such as `-1` means "all".
fn count_or_all<'de, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let count = Option::<i64>::deserialize(deserializer)?;
    Ok(count.and_then(|n| usize::try_from(n).ok()))
}

//! Knowledge graph embedding training and link-prediction evaluation.
//!
//! Knowledge graphs store facts as (subject, relation, object) triples:
//! `(Einstein, won, NobelPrize)`, `(Paris, capitalOf, France)`. An embedding
//! model learns a dense vector (or matrix) per entity and relation so that
//! true triples score higher than false ones.
//!
//! ## Pipeline
//!
//! ```text
//! TripleStore ──> NegativeSampler ──> LossFunction ──> ScoringModel.gradient
//!                                                            │
//!                  EmbeddingParameterSet <── ParameterUpdater <── GradientAccumulator
//! ```
//!
//! Each batch touches only a few embeddings, so gradients are collected in
//! sparse [`GradientAccumulator`]s (one per parameter family) and the
//! updater only ever visits touched ids. Adaptive updaters keep their
//! per-id statistics for the whole run.
//!
//! ## Models
//!
//! | Model | Config name | Score |
//! |-------|-------------|-------|
//! | [`Translational`] | `transe` | −‖s + r − o‖ᵖ |
//! | [`BilinearDiagonal`] | `distmult` | Σ s·r·o |
//! | [`BilinearMatrix`] | `rescal` | sᵀ M_r o |
//! | [`ComplexBilinear`] | `complex` | Re(Σ s·r·conj(o)) |
//! | [`Ensemble`] | `ensemble` | Σ w_m · score_m |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kgfit::{run, Config};
//!
//! let config = Config::from_file("config/wn18.json")?;
//! let summary = run(&config)?;
//! println!("{}", summary.report.summary());
//! ```
//!
//! Pieces compose without the orchestration too: build a model with
//! [`build_model`], a loss with [`build_loss`], a sampler with
//! [`build_sampler`] and hand them to a [`TrainingLoop`].

pub mod config;
mod error;
pub mod evaluation;
pub mod gradcheck;
mod gradient;
pub mod init;
pub mod io;
pub mod loss;
pub mod models;
mod params;
pub mod run;
pub mod sampling;
pub mod training;
pub mod triples;
pub mod updater;

pub use config::Config;
pub use error::{Error, Result};
pub use evaluation::{EvaluationReport, RankEvaluator, RankMetrics};
pub use gradcheck::{check_gradients, GradientDiscrepancy};
pub use gradient::GradientAccumulator;
pub use loss::{build_loss, BatchShape, LossFunction};
pub use models::{
    build_model, BilinearDiagonal, BilinearMatrix, ComplexBilinear, Ensemble, ModelContext,
    ScoringModel, Translational,
};
pub use params::{EmbeddingParameterSet, Family, FamilyId, FamilyKind, ParameterRegistry};
pub use run::{run, RunSummary};
pub use sampling::{build_sampler, NegativeSampler, SamplingMode};
pub use training::{EpochStats, TrainingLoop, TrainingOutcome};
pub use triples::{Dataset, Triple, TripleStore, Vocabulary};
pub use updater::{build_updater, ParameterUpdater};

//! Error types for kgfit.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in kgfit.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV writing error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A configuration enum carried a value no factory recognizes.
    #[error("Unknown {component} type: {value:?}")]
    UnknownVariant {
        /// Which factory rejected the value (model, loss, sampler, ...).
        component: &'static str,
        /// The rejected value as written in the configuration.
        value: String,
    },

    /// Configuration values that are individually valid but unusable.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Malformed line in a triple or matrix file.
    #[error("{}:{line}: {message}", path.display())]
    Parse {
        /// File being read.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What was wrong with the line.
        message: String,
    },

    /// Dimension mismatch between a matrix and what a family expects.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected shape.
        expected: String,
        /// Actual shape.
        actual: String,
    },

    /// Named item missing from a registry or vocabulary.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type for kgfit operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn unknown(component: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            component,
            value: value.into(),
        }
    }

    pub(crate) fn shape(expected: (usize, usize), actual: (usize, usize)) -> Self {
        Self::DimensionMismatch {
            expected: format!("{}x{}", expected.0, expected.1),
            actual: format!("{}x{}", actual.0, actual.1),
        }
    }
}

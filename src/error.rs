//! Error types for the candidate-assignment pipeline.

use thiserror::Error;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required kinematic, tagger or weight field is absent from the batch.
    #[error("missing field `{field}`")]
    MissingField { field: String },

    /// Parallel arrays disagree on event count or slot count.
    #[error("shape mismatch for `{field}`: expected {expected}, found {found}")]
    ShapeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// Configuration rejected at validation time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Strict mode only: events reached overlap resolution with missing jets.
    #[error("{count} event(s) with fewer than two valid {collection} jets")]
    DegenerateEvents { collection: String, count: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("npz read error: {0}")]
    NpzRead(#[from] ndarray_npy::ReadNpzError),

    #[error("npz write error: {0}")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn missing(field: impl Into<String>) -> Self {
        PipelineError::MissingField {
            field: field.into(),
        }
    }

    pub(crate) fn shape(
        field: impl Into<String>,
        expected: impl std::fmt::Display,
        found: impl std::fmt::Display,
    ) -> Self {
        PipelineError::ShapeMismatch {
            field: field.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, PipelineError>;

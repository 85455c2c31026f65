//! Error types for fitloop_core.

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur in tensor and collaborator operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid tensor shape provided.
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Shape mismatch between tensors.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A model forward or backward pass failed.
    #[error("Module error: {0}")]
    ModuleError(String),

    /// A loss computation failed.
    #[error("Loss error: {0}")]
    LossError(String),

    /// An optimizer step failed.
    #[error("Optimizer error: {0}")]
    OptimizerError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

//! Error types for fitloop_data.

use thiserror::Error;

/// Result type alias using [`DataError`].
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors that can occur in dataset and dataloader operations.
#[derive(Error, Debug)]
pub enum DataError {
    /// Input and target sample counts disagree.
    #[error("Length mismatch: {x} input rows vs {y} target rows")]
    LengthMismatch {
        /// Number of input rows.
        x: usize,
        /// Number of target rows.
        y: usize,
    },

    /// A batch size of zero was requested.
    #[error("Batch size must be positive")]
    ZeroBatchSize,

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] fitloop_core::CoreError),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

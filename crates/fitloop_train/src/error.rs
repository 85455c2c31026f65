//! Error types for fitloop_train.

use thiserror::Error;

use crate::event::Cancel;

/// Result type alias using [`TrainError`].
pub type Result<T> = std::result::Result<T, TrainError>;

/// Errors that can occur while driving the training loop.
#[derive(Error, Debug)]
pub enum TrainError {
    /// An event name not in the lifecycle vocabulary was used to
    /// configure a callback.
    #[error("Unknown event name: {name}")]
    UnknownEvent {
        /// The rejected name.
        name: String,
    },

    /// A cancellation signal escaped every level that could catch it.
    ///
    /// Raising a signal outside the scope that handles it is a
    /// programming defect, not a recoverable condition.
    #[error("Uncaught cancellation signal: cancel {0}")]
    UncaughtCancel(Cancel),

    /// A callback was invoked while one of its own handlers was still
    /// running.
    #[error("Callback '{0}' re-entered during its own dispatch")]
    ReentrantCallback(String),

    /// No dataloader registered under the given split index.
    #[error("No dataloader for split index {0}")]
    NoLoader(usize),

    /// The loop reached a point that requires an input batch but none
    /// was staged.
    #[error("No input batch available")]
    MissingInput,

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] fitloop_core::CoreError),

    /// Data error.
    #[error("Data error: {0}")]
    Data(#[from] fitloop_data::DataError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

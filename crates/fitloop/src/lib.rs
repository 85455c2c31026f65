//! # fitloop
//!
//! An event-driven training loop for Rust: a fixed vocabulary of
//! lifecycle events, ordered stateful callbacks, and typed cancellation
//! signals that can abort any granularity of the nested
//! fit → epoch → {train, validate} → batch loop.
//!
//! The crates:
//!
//! - **Core** ([`fitloop_core`]): tensor wrapper, device, seeds, and the
//!   model/loss/optimizer collaborator traits
//! - **Data** ([`fitloop_data`]): in-memory datasets and dataloaders
//! - **Train** ([`fitloop_train`]): the learner, the callback substrate,
//!   and the built-in callbacks
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use fitloop::prelude::*;
//!
//! let dls = DataLoaders::builder(train_ds, valid_ds)
//!     .batch_size(64)
//!     .seed(Seed::new(42))
//!     .build()?;
//!
//! let mut learn = Learner::new(model, loss, opt, dls)?;
//! learn.add_cb(GatherPredsCallback::new().with_loss(true));
//! learn.fit(10)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export all crates
pub use fitloop_core as core;
pub use fitloop_data as data;
pub use fitloop_train as train;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use fitloop_core::{
        Batch, CoreError, Device, Loss, Module, Optimizer, Reduction, Seed, Tensor,
    };
    pub use fitloop_data::{DataLoader, DataLoaders, Dataset, Split};
    pub use fitloop_train::{
        default_callbacks, Callback, CallbackHandle, CallbackResult, CallbackSet, Cancel, Event,
        FetchPredsCallback, FnCallback, GatherPredsCallback, GetPreds, Interrupt, Learner,
        Predictions, TrainError, TrainEvalCallback,
    };
}

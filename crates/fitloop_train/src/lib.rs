//! # fitloop_train
//!
//! Event-driven training loop with ordered callbacks and typed
//! cancellation signals.
//!
//! This crate provides:
//! - [`Event`] — the closed vocabulary of lifecycle checkpoints
//! - [`Cancel`] / [`Interrupt`] — typed signals that abort one loop
//!   granularity, returned up the dispatch stack as values
//! - [`Callback`] — the ordered, stateful extension unit, plus the
//!   [`CallbackSet`] registry and the closure-based [`FnCallback`]
//! - [`Learner`] — the loop driver: fit → epoch → {train, validate} →
//!   batch, dispatching every event through the callback collection and
//!   catching each cancellation kind at its matching level
//! - built-in callbacks: [`TrainEvalCallback`] (iteration bookkeeping and
//!   train/eval mode), [`GatherPredsCallback`] (prediction gathering with
//!   optional persistence), and [`FetchPredsCallback`] (isolated nested
//!   prediction passes mid-training)
//!
//! ## Concurrency contract
//!
//! Dispatch is single-threaded, cooperative, and synchronous: events fire
//! strictly in order, one callback invocation at a time, and a signal
//! transfers control without any background cancellation. Callbacks share
//! the learner mutably with no locking; that is sound only under this
//! strict ordering, so mutating a learner from outside while a fit runs
//! is undefined behavior as far as this crate is concerned. Learners are
//! intentionally not `Send`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fitloop_train::{Cancel, FnCallback, Learner};
//!
//! let mut learn = Learner::new(model, loss, opt, dls)?;
//! learn.add_cb(FnCallback::new("stop_early").on("after_epoch", |learn| {
//!     if learn.epoch == 2 {
//!         Err(Cancel::Fit.into())
//!     } else {
//!         Ok(())
//!     }
//! })?);
//! learn.fit(10)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod callback;
mod error;
mod event;
mod gather;
mod learner;
#[cfg(test)]
mod testing;

pub use callback::{
    callback_name, Callback, CallbackHandle, CallbackSet, FnCallback, TrainEvalCallback,
};
pub use error::{Result, TrainError};
pub use event::{Cancel, CallbackResult, Event, Interrupt};
pub use gather::{FetchPredsCallback, GatherPredsCallback};
pub use learner::{default_callbacks, GetPreds, Learner, Predictions, RemovedCbs};

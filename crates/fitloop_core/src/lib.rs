//! # fitloop_core
//!
//! Core types and collaborator traits for fitloop-rs.
//!
//! This crate provides:
//! - [`Tensor`] — a CPU tensor wrapper with the operations the training
//!   substrate needs (detach, concatenate, per-sample reshape, versioned
//!   persistence)
//! - [`Batch`] — what a dataloader yields
//! - [`Device`] — the explicit device seam
//! - [`Seed`] — deterministic random number generation
//! - [`Module`], [`Loss`], [`Optimizer`] — the opaque collaborators the
//!   training loop sequences
//!
//! The forward/backward/step numerics themselves live behind these traits;
//! fitloop only defines the seams and drives them in order.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod device;
mod error;
mod module;
mod seed;
mod tensor;

pub use device::Device;
pub use error::{CoreError, Result};
pub use module::{Loss, Module, Optimizer, Reduction};
pub use seed::Seed;
pub use tensor::{Batch, Tensor, TensorRecord, TENSOR_RECORD_VERSION};

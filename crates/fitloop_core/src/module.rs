//! Collaborator traits for models, losses, and optimizers.
//!
//! The training substrate sequences these collaborators but does not
//! implement their numerics; a backend supplies concrete types and the
//! loop drives them through the seams defined here.

use crate::device::Device;
use crate::error::Result;
use crate::tensor::Tensor;

/// How a loss tensor is reduced over the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    /// Mean over all elements (the training default).
    #[default]
    Mean,
    /// Sum over all elements.
    Sum,
    /// No reduction: one value per sample (first axis preserved).
    None,
}

/// A trainable model.
///
/// Only the surface the training loop touches is specified: the forward
/// pass, the backward seam, train/eval mode, device placement, and
/// optional internal-state reset (e.g. recurrent hidden state).
pub trait Module {
    /// Forward pass over one input batch.
    ///
    /// # Errors
    ///
    /// Implementations surface any numeric failure.
    fn forward(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Backward pass for the given loss.
    ///
    /// # Errors
    ///
    /// Implementations surface any numeric failure.
    fn backward(&mut self, _loss: &Tensor) -> Result<()> {
        Ok(())
    }

    /// Switch between training and evaluation behavior.
    fn set_train(&mut self, _train: bool) {}

    /// Move parameters to a device.
    fn to_device(&mut self, _device: Device) {}

    /// Reset internal state, if the model keeps any.
    fn reset(&mut self) {}
}

/// A loss function.
pub trait Loss {
    /// Compute the loss between predictions and targets.
    ///
    /// With [`Reduction::None`] the result keeps one value per sample
    /// along the first axis; otherwise it is a scalar.
    ///
    /// # Errors
    ///
    /// Implementations surface any numeric failure.
    fn forward(&self, pred: &Tensor, target: &Tensor, reduction: Reduction) -> Result<Tensor>;

    /// Final activation applied to raw predictions when gathering them.
    fn activation(&self, pred: &Tensor) -> Tensor {
        pred.clone()
    }

    /// Decode activated predictions into task-level outputs
    /// (e.g. class indices).
    fn decodes(&self, pred: &Tensor) -> Tensor {
        pred.clone()
    }

    /// Move loss state to a device.
    ///
    /// Stateless losses keep the no-op default.
    fn to_device(&mut self, _device: Device) {}
}

/// An optimizer over a model's parameters.
pub trait Optimizer {
    /// Apply one update step.
    ///
    /// # Errors
    ///
    /// Implementations surface any numeric failure.
    fn step(&mut self, model: &mut dyn Module) -> Result<()>;

    /// Clear accumulated gradients.
    ///
    /// # Errors
    ///
    /// Implementations surface any numeric failure.
    fn zero_grad(&mut self, _model: &mut dyn Module) -> Result<()> {
        Ok(())
    }
}

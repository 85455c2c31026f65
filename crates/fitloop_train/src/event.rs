//! Lifecycle events and cancellation signals.
//!
//! Events are pure identifiers for checkpoints in the nested
//! fit → epoch → {train, validate} → batch loop; no behavior attaches to
//! them here. Cancellation signals are typed outcomes a callback returns
//! to abort one granularity of that loop; the learner catches each kind
//! at its matching level.

use std::fmt;

use crate::error::TrainError;

/// A named checkpoint in the training loop lifecycle.
///
/// Within one fit the events fire in the order given by [`Event::ALL`]:
/// `AfterCreate` once at learner construction, then `BeforeFit`, then per
/// epoch the training phase (`BeforeTrain`, per batch `BeforeBatch`,
/// `AfterPred`, `AfterLoss`, `BeforeBackward`, `BeforeStep`, `AfterStep`,
/// `AfterBatch`, `AfterTrain`) and the validation phase (same batch shape
/// between `BeforeValidate` and `AfterValidate`), then `AfterEpoch`, and
/// finally `AfterFit`. Each `AfterCancel*` event fires only when the
/// matching [`Cancel`] signal is caught at that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Once, when the learner is constructed.
    AfterCreate,
    /// At the start of a fit.
    BeforeFit,
    /// At the start of each epoch.
    BeforeEpoch,
    /// At the start of the training phase.
    BeforeTrain,
    /// Before a batch is processed.
    BeforeBatch,
    /// After the model produced a prediction.
    AfterPred,
    /// After the loss was computed.
    AfterLoss,
    /// Before the backward pass.
    BeforeBackward,
    /// Before the optimizer step.
    BeforeStep,
    /// When a `Cancel::Step` was caught.
    AfterCancelStep,
    /// After the optimizer step.
    AfterStep,
    /// When a `Cancel::Batch` was caught.
    AfterCancelBatch,
    /// After each batch, cancelled or not.
    AfterBatch,
    /// When a `Cancel::Train` was caught.
    AfterCancelTrain,
    /// At the end of the training phase.
    AfterTrain,
    /// At the start of the validation phase.
    BeforeValidate,
    /// When a `Cancel::Valid` was caught.
    AfterCancelValidate,
    /// At the end of the validation phase.
    AfterValidate,
    /// When a `Cancel::Epoch` was caught.
    AfterCancelEpoch,
    /// At the end of each epoch.
    AfterEpoch,
    /// When a `Cancel::Fit` was caught.
    AfterCancelFit,
    /// At the end of a fit, cancelled or not.
    AfterFit,
}

impl Event {
    /// All events, in lifecycle order.
    pub const ALL: [Self; 22] = [
        Self::AfterCreate,
        Self::BeforeFit,
        Self::BeforeEpoch,
        Self::BeforeTrain,
        Self::BeforeBatch,
        Self::AfterPred,
        Self::AfterLoss,
        Self::BeforeBackward,
        Self::BeforeStep,
        Self::AfterCancelStep,
        Self::AfterStep,
        Self::AfterCancelBatch,
        Self::AfterBatch,
        Self::AfterCancelTrain,
        Self::AfterTrain,
        Self::BeforeValidate,
        Self::AfterCancelValidate,
        Self::AfterValidate,
        Self::AfterCancelEpoch,
        Self::AfterEpoch,
        Self::AfterCancelFit,
        Self::AfterFit,
    ];

    /// The event's snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AfterCreate => "after_create",
            Self::BeforeFit => "before_fit",
            Self::BeforeEpoch => "before_epoch",
            Self::BeforeTrain => "before_train",
            Self::BeforeBatch => "before_batch",
            Self::AfterPred => "after_pred",
            Self::AfterLoss => "after_loss",
            Self::BeforeBackward => "before_backward",
            Self::BeforeStep => "before_step",
            Self::AfterCancelStep => "after_cancel_step",
            Self::AfterStep => "after_step",
            Self::AfterCancelBatch => "after_cancel_batch",
            Self::AfterBatch => "after_batch",
            Self::AfterCancelTrain => "after_cancel_train",
            Self::AfterTrain => "after_train",
            Self::BeforeValidate => "before_validate",
            Self::AfterCancelValidate => "after_cancel_validate",
            Self::AfterValidate => "after_validate",
            Self::AfterCancelEpoch => "after_cancel_epoch",
            Self::AfterEpoch => "after_epoch",
            Self::AfterCancelFit => "after_cancel_fit",
            Self::AfterFit => "after_fit",
        }
    }

    /// Look an event up by its snake_case name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }

    /// Whether this event belongs to the inner-loop subset gated by a
    /// callback's `run_train`/`run_valid` flags.
    #[must_use]
    pub const fn is_inner_loop(self) -> bool {
        matches!(
            self,
            Self::BeforeBatch
                | Self::AfterPred
                | Self::AfterLoss
                | Self::BeforeBackward
                | Self::BeforeStep
                | Self::AfterStep
                | Self::AfterCancelBatch
                | Self::AfterBatch
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed cancellation signal, one per loop granularity.
///
/// Returned (inside an [`Interrupt`]) by callback handlers to abort part
/// of the loop. Each kind is caught exactly at its matching level, which
/// fires that level's `AfterCancel*` event and resumes at the next outer
/// level. The kinds nest: `Batch` ⊂ {`Train`, `Valid`} ⊂ `Epoch` ⊂ `Fit`;
/// `Step` is caught only around the optimizer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cancel {
    /// Skip the rest of this batch and go to `after_batch`.
    Batch,
    /// Skip stepping the optimizer.
    Step,
    /// Skip the rest of the training phase and go to `after_train`.
    Train,
    /// Skip the rest of the validation phase and go to `after_validate`.
    Valid,
    /// Skip the rest of this epoch and go to `after_epoch`.
    Epoch,
    /// Interrupt training and go to `after_fit`.
    Fit,
}

impl fmt::Display for Cancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Batch => "batch",
            Self::Step => "step",
            Self::Train => "train",
            Self::Valid => "valid",
            Self::Epoch => "epoch",
            Self::Fit => "fit",
        };
        f.write_str(name)
    }
}

/// A non-local exit from a callback handler: either a deliberate
/// cancellation signal or a real error.
///
/// Cancellations are structured control flow, not failures; they travel
/// up the dispatch stack as values and the loop driver matches on them at
/// each nesting level. Errors propagate unmodified to the `fit` caller.
#[derive(Debug, thiserror::Error)]
pub enum Interrupt {
    /// A cancellation signal.
    #[error("cancel {0}")]
    Cancel(Cancel),
    /// A real error.
    #[error(transparent)]
    Error(#[from] TrainError),
}

impl From<Cancel> for Interrupt {
    fn from(cancel: Cancel) -> Self {
        Self::Cancel(cancel)
    }
}

impl From<fitloop_core::CoreError> for Interrupt {
    fn from(err: fitloop_core::CoreError) -> Self {
        Self::Error(TrainError::Core(err))
    }
}

impl From<fitloop_data::DataError> for Interrupt {
    fn from(err: fitloop_data::DataError) -> Self {
        Self::Error(TrainError::Data(err))
    }
}

impl From<std::io::Error> for Interrupt {
    fn from(err: std::io::Error) -> Self {
        Self::Error(TrainError::Io(err))
    }
}

/// What a callback handler returns.
pub type CallbackResult = Result<(), Interrupt>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        for event in Event::ALL {
            assert_eq!(Event::from_name(event.as_str()), Some(event));
        }
        assert_eq!(Event::from_name("before_banana"), None);
    }

    #[test]
    fn test_inner_loop_subset() {
        let inner: Vec<Event> = Event::ALL.into_iter().filter(|e| e.is_inner_loop()).collect();
        assert_eq!(
            inner,
            vec![
                Event::BeforeBatch,
                Event::AfterPred,
                Event::AfterLoss,
                Event::BeforeBackward,
                Event::BeforeStep,
                Event::AfterStep,
                Event::AfterCancelBatch,
                Event::AfterBatch,
            ]
        );
        assert!(!Event::BeforeValidate.is_inner_loop());
        assert!(!Event::AfterFit.is_inner_loop());
    }

    #[test]
    fn test_interrupt_conversions() {
        let i: Interrupt = Cancel::Epoch.into();
        assert!(matches!(i, Interrupt::Cancel(Cancel::Epoch)));

        let i: Interrupt = TrainError::Other("boom".into()).into();
        assert!(matches!(i, Interrupt::Error(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Event::AfterCancelValidate.to_string(), "after_cancel_validate");
        assert_eq!(Cancel::Fit.to_string(), "fit");
    }
}

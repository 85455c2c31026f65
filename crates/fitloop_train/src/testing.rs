//! Test doubles shared by the unit tests in this crate.

use std::cell::RefCell;
use std::rc::Rc;

use fitloop_core::{Loss, Module, Optimizer, Reduction, Tensor};
use fitloop_data::{DataLoaders, Dataset};

use crate::callback::FnCallback;
use crate::event::Event;
use crate::learner::Learner;

/// Model double: prediction == input.
pub(crate) struct IdentityModule;

impl Module for IdentityModule {
    fn forward(&mut self, input: &Tensor) -> fitloop_core::Result<Tensor> {
        Ok(input.clone())
    }
}

/// Loss double: mean absolute error per sample, honoring the reduction.
pub(crate) struct AbsLoss;

impl Loss for AbsLoss {
    fn forward(
        &self,
        pred: &Tensor,
        target: &Tensor,
        reduction: Reduction,
    ) -> fitloop_core::Result<Tensor> {
        let bs = pred.size(0).unwrap_or(1).max(1);
        let p = pred.to_vec();
        let t = target.to_vec();
        let per = (p.len() / bs).max(1);
        let samples: Vec<f32> = (0..bs)
            .map(|i| {
                (0..per)
                    .map(|j| (p[i * per + j] - t[i * per + j]).abs())
                    .sum::<f32>()
                    / per as f32
            })
            .collect();
        Ok(match reduction {
            Reduction::None => Tensor::from_vec1(samples),
            Reduction::Sum => Tensor::scalar(samples.iter().sum()),
            Reduction::Mean => {
                Tensor::scalar(samples.iter().sum::<f32>() / samples.len().max(1) as f32)
            }
        })
    }
}

/// Optimizer double: does nothing.
pub(crate) struct NoOpt;

impl Optimizer for NoOpt {
    fn step(&mut self, _model: &mut dyn Module) -> fitloop_core::Result<()> {
        Ok(())
    }
}

/// Build unshuffled batch-size-1 loaders over `(x, y)` rows.
pub(crate) fn loaders(train: &[(f32, f32)], valid: &[(f32, f32)]) -> DataLoaders {
    let ds = |rows: &[(f32, f32)]| {
        let x = Tensor::from_vec(&[rows.len(), 1], rows.iter().map(|r| r.0).collect()).unwrap();
        let y = Tensor::from_vec(&[rows.len(), 1], rows.iter().map(|r| r.1).collect()).unwrap();
        Dataset::new(x, Some(y)).unwrap()
    };
    DataLoaders::builder(ds(train), ds(valid))
        .batch_size(1)
        .shuffle_train(false)
        .build()
        .unwrap()
}

/// A learner over the identity model with default callbacks.
pub(crate) fn toy_learner(train: &[(f32, f32)], valid: &[(f32, f32)]) -> Learner {
    Learner::new(IdentityModule, AbsLoss, NoOpt, loaders(train, valid)).unwrap()
}

/// A callback named "spy" that records every event it sees.
pub(crate) fn spy(log: Rc<RefCell<Vec<Event>>>) -> FnCallback {
    let mut cb = FnCallback::new("spy");
    for event in Event::ALL {
        let log = Rc::clone(&log);
        cb = cb.on_event(event, move |_| {
            log.borrow_mut().push(event);
            Ok(())
        });
    }
    cb
}

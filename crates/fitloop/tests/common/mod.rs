//! Shared doubles for the integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use fitloop::prelude::*;

/// Model double: prediction == input, with an optional failure fuse.
pub struct IdentityModule {
    calls: usize,
    fail_after: Option<usize>,
}

impl IdentityModule {
    pub fn new() -> Self {
        Self {
            calls: 0,
            fail_after: None,
        }
    }

    /// Fail every forward call after the first `n`.
    pub fn failing_after(n: usize) -> Self {
        Self {
            calls: 0,
            fail_after: Some(n),
        }
    }
}

impl Module for IdentityModule {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor, CoreError> {
        self.calls += 1;
        if let Some(limit) = self.fail_after {
            if self.calls > limit {
                return Err(CoreError::ModuleError(format!(
                    "forward call {} exceeded fuse {limit}",
                    self.calls
                )));
            }
        }
        Ok(input.clone())
    }
}

/// Loss double: mean absolute error per sample, honoring the reduction.
pub struct AbsLoss;

impl Loss for AbsLoss {
    fn forward(
        &self,
        pred: &Tensor,
        target: &Tensor,
        reduction: Reduction,
    ) -> Result<Tensor, CoreError> {
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
pub struct NoOpt;

impl Optimizer for NoOpt {
    fn step(&mut self, _model: &mut dyn Module) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Unshuffled batch-size-1 loaders over `(x, y)` rows.
pub fn loaders(train: &[(f32, f32)], valid: &[(f32, f32)]) -> DataLoaders {
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
pub fn toy_learner(train: &[(f32, f32)], valid: &[(f32, f32)]) -> Learner {
    Learner::new(IdentityModule::new(), AbsLoss, NoOpt, loaders(train, valid)).unwrap()
}

/// A callback named "spy" that records every event it sees.
pub fn spy(log: Rc<RefCell<Vec<Event>>>) -> FnCallback {
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

/// Assert two float slices match within `1e-6`.
pub fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-6, "{actual:?} vs {expected:?}");
    }
}

//! The learner: shared training state, event dispatch, and the nested
//! fit → epoch → {train, validate} → batch loop.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use fitloop_core::{Loss, Module, Optimizer, Reduction, Tensor};
use fitloop_data::{DataLoader, DataLoaders};

use crate::callback::{
    invoke, Callback, CallbackHandle, CallbackSet, Entry, TrainEvalCallback,
};
use crate::error::{Result, TrainError};
use crate::event::{Cancel, CallbackResult, Event, Interrupt};
use crate::gather::GatherPredsCallback;

/// The default callback list a learner starts with.
#[must_use]
pub fn default_callbacks() -> Vec<CallbackHandle> {
    vec![Rc::new(RefCell::new(TrainEvalCallback))]
}

/// Owns the model, data, optimizer, and callback collection, and drives
/// the nested training loop while dispatching lifecycle events.
///
/// The mutable state fields are deliberately public: callbacks receive
/// `&mut Learner` and read or write them directly. Dispatch is
/// single-threaded and strictly ordered, which is the only thing keeping
/// those accesses race-free; mutating a learner from another thread while
/// a fit is running is unsupported and its behavior is undefined.
pub struct Learner {
    /// The model being trained.
    pub model: Box<dyn Module>,
    /// The loss function.
    pub loss_func: Box<dyn Loss>,
    /// The optimizer.
    pub opt: Box<dyn Optimizer>,
    /// Train/validation loaders plus the compute device.
    pub dls: DataLoaders,
    /// Current epoch index within the running fit.
    pub epoch: usize,
    /// Number of epochs the current fit runs for.
    pub n_epoch: usize,
    /// Whether the loop is in the training phase.
    pub training: bool,
    /// Fraction of the fit completed, advanced per training batch.
    pub pct_train: f64,
    /// Training batches seen across the fit.
    pub train_iter: usize,
    /// Batch index within the current phase.
    pub iter: usize,
    /// Number of batches in the current phase.
    pub n_iter: usize,
    /// Reduction applied by the loss function.
    pub loss_reduction: Reduction,
    /// Input batch currently being processed.
    pub xb: Option<Tensor>,
    /// Target batch currently being processed.
    pub yb: Option<Tensor>,
    /// Prediction for the current batch, once computed.
    pub pred: Option<Tensor>,
    /// Loss for the current batch, once computed.
    pub loss: Option<Tensor>,
    cbs: CallbackSet,
}

impl Learner {
    /// Create a learner with the default callbacks
    /// ([`TrainEvalCallback`] only) and fire `after_create`.
    ///
    /// # Errors
    ///
    /// Propagates any error an `after_create` handler returns; a
    /// cancellation signal raised there has no catching scope and is
    /// reported as [`TrainError::UncaughtCancel`].
    pub fn new<M, L, O>(model: M, loss_func: L, opt: O, dls: DataLoaders) -> Result<Self>
    where
        M: Module + 'static,
        L: Loss + 'static,
        O: Optimizer + 'static,
    {
        Self::with_cbs(model, loss_func, opt, dls, default_callbacks())
    }

    /// Create a learner with an explicit callback list and fire
    /// `after_create`.
    ///
    /// # Errors
    ///
    /// Same contract as [`Learner::new`].
    pub fn with_cbs<M, L, O>(
        model: M,
        loss_func: L,
        opt: O,
        dls: DataLoaders,
        cbs: Vec<CallbackHandle>,
    ) -> Result<Self>
    where
        M: Module + 'static,
        L: Loss + 'static,
        O: Optimizer + 'static,
    {
        let mut learn = Self {
            model: Box::new(model),
            loss_func: Box::new(loss_func),
            opt: Box::new(opt),
            dls,
            epoch: 0,
            n_epoch: 1,
            training: false,
            pct_train: 0.0,
            train_iter: 0,
            iter: 0,
            n_iter: 0,
            loss_reduction: Reduction::default(),
            xb: None,
            yb: None,
            pred: None,
            loss: None,
            cbs: CallbackSet::new(),
        };
        for cb in cbs {
            learn.cbs.add_handle(cb);
        }
        seal(learn.dispatch(Event::AfterCreate))?;
        Ok(learn)
    }

    /// The callback collection.
    #[must_use]
    pub fn cbs(&self) -> &CallbackSet {
        &self.cbs
    }

    /// The callback collection, mutably.
    pub fn cbs_mut(&mut self) -> &mut CallbackSet {
        &mut self.cbs
    }

    /// Register a callback, returning its handle.
    pub fn add_cb<C: Callback + 'static>(&mut self, cb: C) -> CallbackHandle {
        self.cbs.add(cb)
    }

    /// Register an already-shared callback handle.
    pub fn add_cb_handle(&mut self, cb: CallbackHandle) -> CallbackHandle {
        self.cbs.add_handle(cb)
    }

    /// Remove the first callback registered under `name`.
    pub fn remove_cb(&mut self, name: &str) -> Option<CallbackHandle> {
        self.cbs.remove(name)
    }

    /// Detach a tensor from any producing computation.
    #[must_use]
    pub fn to_detach(&self, tensor: &Tensor) -> Tensor {
        tensor.detach()
    }

    /// Dispatch one event across the order-sorted callback collection.
    ///
    /// Stops at the first interrupt: callbacks later in the order do not
    /// see the event, but effects of earlier ones stand. Right after a
    /// callback's `after_fit` fires (or is skipped by its `run` flag),
    /// its `run` flag is reset to `true` for the next fit.
    ///
    /// # Errors
    ///
    /// Returns the first interrupt a handler produces.
    pub fn dispatch(&mut self, event: Event) -> CallbackResult {
        let snapshot = self.cbs.snapshot_sorted();
        for reg in snapshot {
            let run = self.cbs.run_of_handle(&reg.cb).unwrap_or(reg.run);
            let res = match reg.cb.try_borrow_mut() {
                Ok(mut cb) => invoke(&mut *cb, run, event, self),
                Err(_) => Err(Interrupt::Error(TrainError::ReentrantCallback(
                    reg.name.clone(),
                ))),
            };
            if event == Event::AfterFit && res.is_ok() {
                self.cbs.set_run_handle(&reg.cb, true);
            }
            res?;
        }
        Ok(())
    }

    /// Run `body` bracketed by `before` and `after`, catching `cancel`
    /// into `after_cancel`.
    ///
    /// `after` fires on every path, matching-cancel or not, like a
    /// `finally` block; non-matching interrupts keep propagating after
    /// it fired.
    fn with_events(
        &mut self,
        before: Event,
        cancel: Cancel,
        after_cancel: Event,
        after: Event,
        body: impl FnOnce(&mut Self) -> CallbackResult,
    ) -> CallbackResult {
        let mut res = self.dispatch(before).and_then(|()| body(self));
        if let Err(Interrupt::Cancel(caught)) = &res {
            if *caught == cancel {
                tracing::debug!(%cancel, "caught cancellation signal");
                res = self.dispatch(after_cancel);
            }
        }
        let finally = self.dispatch(after);
        res.and(finally)
    }

    /// Fit for `n_epoch` epochs.
    ///
    /// # Errors
    ///
    /// Returns handler errors unmodified; a cancellation signal that no
    /// loop level caught is reported as [`TrainError::UncaughtCancel`].
    pub fn fit(&mut self, n_epoch: usize) -> Result<()> {
        self.n_epoch = n_epoch;
        tracing::info!(n_epoch, "starting fit");
        let res = self.with_events(
            Event::BeforeFit,
            Cancel::Fit,
            Event::AfterCancelFit,
            Event::AfterFit,
            |learn| {
                for epoch in 0..learn.n_epoch {
                    learn.epoch = epoch;
                    learn.do_epoch()?;
                }
                Ok(())
            },
        );
        let out = seal(res);
        tracing::info!(ok = out.is_ok(), "fit finished");
        out
    }

    /// Run one validation pass over the validation loader, with events.
    ///
    /// # Errors
    ///
    /// Same contract as [`Learner::fit`].
    pub fn validate(&mut self) -> Result<()> {
        let dl = self.dls.valid().clone();
        seal(self.do_epoch_validate(&dl))
    }

    fn do_epoch(&mut self) -> CallbackResult {
        self.with_events(
            Event::BeforeEpoch,
            Cancel::Epoch,
            Event::AfterCancelEpoch,
            Event::AfterEpoch,
            |learn| {
                learn.do_epoch_train()?;
                let dl = learn.dls.valid().clone();
                learn.do_epoch_validate(&dl)
            },
        )
    }

    fn do_epoch_train(&mut self) -> CallbackResult {
        let dl = self.dls.train().clone();
        self.with_events(
            Event::BeforeTrain,
            Cancel::Train,
            Event::AfterCancelTrain,
            Event::AfterTrain,
            |learn| learn.all_batches(&dl),
        )
    }

    fn do_epoch_validate(&mut self, dl: &DataLoader) -> CallbackResult {
        self.with_events(
            Event::BeforeValidate,
            Cancel::Valid,
            Event::AfterCancelValidate,
            Event::AfterValidate,
            |learn| learn.all_batches(dl),
        )
    }

    fn all_batches(&mut self, dl: &DataLoader) -> CallbackResult {
        let batches = dl.batches().map_err(TrainError::from)?;
        self.n_iter = batches.len();
        for (i, batch) in batches.into_iter().enumerate() {
            self.iter = i;
            self.xb = Some(batch.xb);
            self.yb = batch.yb;
            self.pred = None;
            self.with_events(
                Event::BeforeBatch,
                Cancel::Batch,
                Event::AfterCancelBatch,
                Event::AfterBatch,
                |learn| learn.do_one_batch(),
            )?;
        }
        Ok(())
    }

    fn do_one_batch(&mut self) -> CallbackResult {
        let xb = self.xb.clone().ok_or(TrainError::MissingInput)?;
        let pred = self.model.forward(&xb).map_err(TrainError::from)?;
        self.pred = Some(pred);
        self.dispatch(Event::AfterPred)?;

        let (Some(pred), Some(yb)) = (self.pred.clone(), self.yb.clone()) else {
            return Ok(());
        };
        let loss = self
            .loss_func
            .forward(&pred, &yb, self.loss_reduction)
            .map_err(TrainError::from)?;
        self.loss = Some(loss);
        self.dispatch(Event::AfterLoss)?;

        if !self.training {
            return Ok(());
        }
        self.dispatch(Event::BeforeBackward)?;
        if let Some(loss) = self.loss.clone() {
            self.model.backward(&loss).map_err(TrainError::from)?;
        }
        self.with_events(
            Event::BeforeStep,
            Cancel::Step,
            Event::AfterCancelStep,
            Event::AfterStep,
            |learn| {
                let Learner { model, opt, .. } = learn;
                opt.step(model.as_mut()).map_err(TrainError::from)?;
                Ok(())
            },
        )?;
        let Learner { model, opt, .. } = self;
        opt.zero_grad(model.as_mut()).map_err(TrainError::from)?;
        Ok(())
    }

    /// Gather predictions over a chosen split or explicit loader.
    ///
    /// Temporarily registers a [`GatherPredsCallback`], runs one
    /// validation pass (with events) over the loader, and returns the
    /// gathered artifacts. Transient batch state, the loss reduction,
    /// and the callback collection are restored on every exit path.
    ///
    /// Inside the pass only [`Cancel::Valid`] is caught; any other
    /// cancellation signal crossing the pass boundary is reported as
    /// [`TrainError::UncaughtCancel`].
    ///
    /// # Errors
    ///
    /// Returns loader-resolution failures, handler errors, and escaped
    /// cancellation signals.
    pub fn get_preds(&mut self, cfg: GetPreds) -> Result<Predictions> {
        let dl = match &cfg.dl {
            Some(dl) => {
                if cfg.reorder {
                    dl.sequential()
                } else {
                    dl.clone()
                }
            }
            None => self
                .dls
                .loader(cfg.ds_idx)
                .ok_or(TrainError::NoLoader(cfg.ds_idx))?
                .sequential(),
        };
        if !cfg.inner {
            tracing::info!(
                ds_idx = cfg.ds_idx,
                n_batches = dl.n_batches(),
                "gathering predictions"
            );
        }

        let gather = Rc::new(RefCell::new(
            GatherPredsCallback::new()
                .with_input(cfg.with_input)
                .with_loss(cfg.with_loss),
        ));
        let handle: CallbackHandle = gather.clone();
        self.cbs.add_handle(Rc::clone(&handle));

        let saved_state = self.save_transient();
        let saved_reduction = self.loss_reduction;
        if cfg.with_loss {
            self.loss_reduction = Reduction::None;
        }

        let res = self.do_epoch_validate(&dl);

        self.loss_reduction = saved_reduction;
        self.restore_transient(saved_state);
        self.cbs.take_handle(&handle);
        seal(res)?;

        let gathered = gather.borrow();
        let mut predictions = Predictions {
            inputs: gathered.inputs().cloned(),
            preds: None,
            decoded: None,
            targets: gathered.targets().cloned(),
            losses: gathered.losses().cloned(),
        };
        if let Some(raw) = gathered.preds() {
            let activated = self.loss_func.activation(raw);
            if cfg.with_decoded {
                predictions.decoded = Some(self.loss_func.decodes(&activated));
            }
            predictions.preds = Some(activated);
        }
        Ok(predictions)
    }

    /// Temporarily remove the given callbacks, restoring them (at their
    /// original positions, with their flags) when the guard drops —
    /// including when the scoped work fails.
    pub fn removed_cbs(&mut self, cbs: &[CallbackHandle]) -> RemovedCbs<'_> {
        let mut removed = Vec::with_capacity(cbs.len());
        for handle in cbs {
            if let Some(taken) = self.cbs.take_handle(handle) {
                removed.push(taken);
            }
        }
        RemovedCbs {
            learn: self,
            removed,
        }
    }

    fn save_transient(&mut self) -> Transient {
        Transient {
            xb: self.xb.take(),
            yb: self.yb.take(),
            pred: self.pred.take(),
            loss: self.loss.take(),
            iter: self.iter,
            n_iter: self.n_iter,
            training: self.training,
        }
    }

    fn restore_transient(&mut self, t: Transient) {
        self.xb = t.xb;
        self.yb = t.yb;
        self.pred = t.pred;
        self.loss = t.loss;
        self.iter = t.iter;
        self.n_iter = t.n_iter;
        self.training = t.training;
    }
}

/// Saved per-batch state around a nested prediction pass.
struct Transient {
    xb: Option<Tensor>,
    yb: Option<Tensor>,
    pred: Option<Tensor>,
    loss: Option<Tensor>,
    iter: usize,
    n_iter: usize,
    training: bool,
}

/// Convert a loop-level outcome into the public result type, turning any
/// surviving cancellation signal into a fatal error.
fn seal(res: CallbackResult) -> Result<()> {
    match res {
        Ok(()) => Ok(()),
        Err(Interrupt::Error(err)) => Err(err),
        Err(Interrupt::Cancel(cancel)) => {
            tracing::error!(%cancel, "cancellation signal escaped its catching scope");
            Err(TrainError::UncaughtCancel(cancel))
        }
    }
}

/// Configuration for [`Learner::get_preds`].
#[derive(Debug, Clone)]
pub struct GetPreds {
    /// Split index to draw from when `dl` is absent (1 = validation).
    pub ds_idx: usize,
    /// Explicit loader overriding the split.
    pub dl: Option<DataLoader>,
    /// Whether to gather the (detached) inputs.
    pub with_input: bool,
    /// Whether to include decoded predictions.
    pub with_decoded: bool,
    /// Whether to gather per-sample losses.
    pub with_loss: bool,
    /// Whether this is a nested pass inside a running loop; suppresses
    /// the pass's own progress logging.
    pub inner: bool,
    /// Whether results should follow dataset order regardless of the
    /// loader's iteration order.
    pub reorder: bool,
}

impl Default for GetPreds {
    fn default() -> Self {
        Self {
            ds_idx: 1,
            dl: None,
            with_input: false,
            with_decoded: false,
            with_loss: false,
            inner: false,
            reorder: true,
        }
    }
}

/// Artifacts of one prediction pass.
#[derive(Debug, Clone, Default)]
pub struct Predictions {
    /// Gathered inputs, when requested.
    pub inputs: Option<Tensor>,
    /// Activated predictions.
    pub preds: Option<Tensor>,
    /// Decoded predictions, when requested.
    pub decoded: Option<Tensor>,
    /// Gathered targets.
    pub targets: Option<Tensor>,
    /// Gathered per-sample losses, when requested.
    pub losses: Option<Tensor>,
}

/// RAII guard over a learner with some callbacks temporarily removed.
///
/// Dropping the guard reinserts the removed callbacks at their original
/// positions with their registration records intact, so the collection
/// is identical (by set and order) to what it was before the guard was
/// taken — on success and failure alike.
pub struct RemovedCbs<'a> {
    learn: &'a mut Learner,
    removed: Vec<(usize, Entry)>,
}

impl Deref for RemovedCbs<'_> {
    type Target = Learner;

    fn deref(&self) -> &Learner {
        self.learn
    }
}

impl DerefMut for RemovedCbs<'_> {
    fn deref_mut(&mut self) -> &mut Learner {
        self.learn
    }
}

impl Drop for RemovedCbs<'_> {
    fn drop(&mut self) {
        // Reinsert in reverse removal order so stored indices are valid.
        for (idx, entry) in self.removed.drain(..).rev() {
            self.learn.cbs.restore_entry(idx, entry);
        }
    }
}

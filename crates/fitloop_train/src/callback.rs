//! Callback abstraction, registry, and built-in iteration bookkeeping.
//!
//! A [`Callback`] is an ordered, stateful extension unit implementing a
//! subset of lifecycle event handlers. The learner owns an ordered
//! [`CallbackSet`] and dispatches every [`Event`] through it; any handler
//! can return a [`Cancel`](crate::Cancel) signal to abort part of the
//! nested loop.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use fitloop_core::Tensor;

use crate::error::TrainError;
use crate::event::{CallbackResult, Event};
use crate::learner::Learner;

/// A shared, interiorly-mutable handle to a callback.
///
/// Handles are how the registry, the dispatch snapshot, and suppression
/// lists refer to the same callback instance; identity is pointer
/// identity.
pub type CallbackHandle = Rc<RefCell<dyn Callback>>;

/// An ordered, stateful extension unit of the training loop.
///
/// Every handler has a no-op default, so implementations override only
/// the events they care about. Handlers receive the owning [`Learner`]
/// mutably, giving them ambient access to the shared training state
/// (`epoch`, `training`, `xb`/`yb`/`pred`/`loss`, the model, the
/// loaders). Dispatch is strictly single-threaded and ordered; see the
/// crate docs for the concurrency contract.
///
/// Inner-loop events (batch, prediction, loss, backward, and step events)
/// fire only when (`run_train` and the learner is training) or
/// (`run_valid` and it is not); all other events ignore those flags.
pub trait Callback {
    /// Name of the callback: the type name, camel-case converted to
    /// snake_case, with a trailing `Callback` stripped.
    fn name(&self) -> String {
        callback_name(std::any::type_name::<Self>())
    }

    /// Invocation order; lower runs first, ties keep registration order.
    fn order(&self) -> i32 {
        0
    }

    /// Whether inner-loop handlers fire during the training phase.
    fn run_train(&self) -> bool {
        true
    }

    /// Whether inner-loop handlers fire during the validation phase.
    fn run_valid(&self) -> bool {
        true
    }

    /// Whether this callback is removed from nested prediction passes.
    fn remove_on_fetch(&self) -> bool {
        false
    }

    /// Fired once when the learner is constructed.
    fn after_create(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired at the start of a fit.
    fn before_fit(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired at the start of each epoch.
    fn before_epoch(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired at the start of the training phase.
    fn before_train(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired before each batch is processed.
    fn before_batch(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired after the model produced a prediction.
    fn after_pred(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired after the loss was computed.
    fn after_loss(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired before the backward pass.
    fn before_backward(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired before the optimizer step.
    fn before_step(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired when a [`Cancel::Step`](crate::Cancel::Step) was caught.
    fn after_cancel_step(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired after the optimizer step.
    fn after_step(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired when a [`Cancel::Batch`](crate::Cancel::Batch) was caught.
    fn after_cancel_batch(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired after each batch, cancelled or not.
    fn after_batch(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired when a [`Cancel::Train`](crate::Cancel::Train) was caught.
    fn after_cancel_train(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired at the end of the training phase.
    fn after_train(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired at the start of the validation phase.
    fn before_validate(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired when a [`Cancel::Valid`](crate::Cancel::Valid) was caught.
    fn after_cancel_validate(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired at the end of the validation phase.
    fn after_validate(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired when a [`Cancel::Epoch`](crate::Cancel::Epoch) was caught.
    fn after_cancel_epoch(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired at the end of each epoch.
    fn after_epoch(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired when a [`Cancel::Fit`](crate::Cancel::Fit) was caught.
    fn after_cancel_fit(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }

    /// Fired at the end of a fit, cancelled or not.
    fn after_fit(&mut self, _learn: &mut Learner) -> CallbackResult {
        Ok(())
    }
}

/// Derive a callback name from a Rust type name.
///
/// `fitloop_train::callback::TrainEvalCallback` becomes `train_eval`.
#[must_use]
pub fn callback_name(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    let base = base.rsplit("::").next().unwrap_or(base);
    let base = base.strip_suffix("Callback").unwrap_or(base);
    let mut out = String::with_capacity(base.len() + 4);
    for ch in base.chars() {
        if ch.is_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Route one event to the matching handler method.
fn call_event(cb: &mut dyn Callback, event: Event, learn: &mut Learner) -> CallbackResult {
    match event {
        Event::AfterCreate => cb.after_create(learn),
        Event::BeforeFit => cb.before_fit(learn),
        Event::BeforeEpoch => cb.before_epoch(learn),
        Event::BeforeTrain => cb.before_train(learn),
        Event::BeforeBatch => cb.before_batch(learn),
        Event::AfterPred => cb.after_pred(learn),
        Event::AfterLoss => cb.after_loss(learn),
        Event::BeforeBackward => cb.before_backward(learn),
        Event::BeforeStep => cb.before_step(learn),
        Event::AfterCancelStep => cb.after_cancel_step(learn),
        Event::AfterStep => cb.after_step(learn),
        Event::AfterCancelBatch => cb.after_cancel_batch(learn),
        Event::AfterBatch => cb.after_batch(learn),
        Event::AfterCancelTrain => cb.after_cancel_train(learn),
        Event::AfterTrain => cb.after_train(learn),
        Event::BeforeValidate => cb.before_validate(learn),
        Event::AfterCancelValidate => cb.after_cancel_validate(learn),
        Event::AfterValidate => cb.after_validate(learn),
        Event::AfterCancelEpoch => cb.after_cancel_epoch(learn),
        Event::AfterEpoch => cb.after_epoch(learn),
        Event::AfterCancelFit => cb.after_cancel_fit(learn),
        Event::AfterFit => cb.after_fit(learn),
    }
}

/// Invoke one callback for one event, applying the `run` flag and the
/// inner-loop phase gate.
pub(crate) fn invoke(
    cb: &mut dyn Callback,
    run: bool,
    event: Event,
    learn: &mut Learner,
) -> CallbackResult {
    let gated = !event.is_inner_loop()
        || (cb.run_train() && learn.training)
        || (cb.run_valid() && !learn.training);
    if run && gated {
        call_event(cb, event, learn)
    } else {
        Ok(())
    }
}

/// A callback's registration record.
pub(crate) struct Entry {
    pub(crate) cb: CallbackHandle,
    pub(crate) name: String,
    pub(crate) order: i32,
    pub(crate) remove_on_fetch: bool,
    /// Global enable flag; reset to `true` after every `after_fit`.
    pub(crate) run: bool,
}

/// A dispatch-ready view of one registered callback.
pub(crate) struct Registered {
    pub(crate) cb: CallbackHandle,
    pub(crate) name: String,
    pub(crate) run: bool,
}

/// The ordered callback collection a learner owns.
///
/// Dispatch iterates a snapshot sorted stably by `order` (registration
/// order breaks ties), so adding or removing callbacks during dispatch
/// affects only subsequent events, never the event currently firing.
#[derive(Default)]
pub struct CallbackSet {
    entries: Vec<Entry>,
}

impl CallbackSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a callback, returning its handle.
    pub fn add<C: Callback + 'static>(&mut self, cb: C) -> CallbackHandle {
        self.add_handle(Rc::new(RefCell::new(cb)))
    }

    /// Register an already-shared callback handle.
    ///
    /// Registering a second callback under an existing name logs a
    /// warning: by-name lookups become ambiguous and will address the
    /// first match.
    pub fn add_handle(&mut self, cb: CallbackHandle) -> CallbackHandle {
        let (name, order, remove_on_fetch) = {
            let borrowed = cb.borrow();
            (borrowed.name(), borrowed.order(), borrowed.remove_on_fetch())
        };
        if self.entries.iter().any(|e| e.name == name) {
            tracing::warn!(
                name = %name,
                "registering a callback under a name that is already present"
            );
        }
        self.entries.push(Entry {
            cb: Rc::clone(&cb),
            name,
            order,
            remove_on_fetch,
            run: true,
        });
        cb
    }

    /// Remove the first callback registered under `name`.
    pub fn remove(&mut self, name: &str) -> Option<CallbackHandle> {
        let idx = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(idx).cb)
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a callback is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Registered names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Handles of all registered callbacks, in registration order.
    #[must_use]
    pub fn handles(&self) -> Vec<CallbackHandle> {
        self.entries.iter().map(|e| Rc::clone(&e.cb)).collect()
    }

    /// Handles of callbacks marked `remove_on_fetch`.
    #[must_use]
    pub fn remove_on_fetch_handles(&self) -> Vec<CallbackHandle> {
        self.entries
            .iter()
            .filter(|e| e.remove_on_fetch)
            .map(|e| Rc::clone(&e.cb))
            .collect()
    }

    /// Set the `run` flag of the first callback registered under `name`.
    ///
    /// Returns whether a callback with that name was found.
    pub fn set_run(&mut self, name: &str, run: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.run = run;
                true
            }
            None => false,
        }
    }

    /// Read the `run` flag of the first callback registered under `name`.
    #[must_use]
    pub fn run_flag(&self, name: &str) -> Option<bool> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.run)
    }

    pub(crate) fn run_of_handle(&self, handle: &CallbackHandle) -> Option<bool> {
        self.entries
            .iter()
            .find(|e| Rc::ptr_eq(&e.cb, handle))
            .map(|e| e.run)
    }

    pub(crate) fn set_run_handle(&mut self, handle: &CallbackHandle, run: bool) {
        if let Some(entry) = self.entries.iter_mut().find(|e| Rc::ptr_eq(&e.cb, handle)) {
            entry.run = run;
        }
    }

    /// Remove the entry for `handle`, returning its position and record
    /// so it can be restored exactly.
    pub(crate) fn take_handle(&mut self, handle: &CallbackHandle) -> Option<(usize, Entry)> {
        let idx = self
            .entries
            .iter()
            .position(|e| Rc::ptr_eq(&e.cb, handle))?;
        Some((idx, self.entries.remove(idx)))
    }

    /// Reinsert a previously taken entry at its original position.
    pub(crate) fn restore_entry(&mut self, idx: usize, entry: Entry) {
        let idx = idx.min(self.entries.len());
        self.entries.insert(idx, entry);
    }

    /// Snapshot the set sorted stably by `order` for one dispatch.
    pub(crate) fn snapshot_sorted(&self) -> Vec<Registered> {
        let mut snapshot: Vec<(i32, Registered)> = self
            .entries
            .iter()
            .map(|e| {
                (
                    e.order,
                    Registered {
                        cb: Rc::clone(&e.cb),
                        name: e.name.clone(),
                        run: e.run,
                    },
                )
            })
            .collect();
        snapshot.sort_by_key(|(order, _)| *order);
        snapshot.into_iter().map(|(_, r)| r).collect()
    }
}

impl fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.name))
            .finish()
    }
}

type Handler = Box<dyn FnMut(&mut Learner) -> CallbackResult>;

/// A callback assembled from per-event closures.
///
/// Construction is fail-fast: [`FnCallback::on`] rejects event names
/// outside the lifecycle vocabulary, so a typo never produces a silent
/// no-op callback.
///
/// # Example
///
/// ```rust,ignore
/// let cb = FnCallback::new("log_loss")
///     .on("after_loss", |learn| {
///         tracing::info!(?learn.loss, "loss");
///         Ok(())
///     })?;
/// learn.add_cb(cb);
/// ```
pub struct FnCallback {
    name: String,
    order: i32,
    run_train: bool,
    run_valid: bool,
    remove_on_fetch: bool,
    handlers: HashMap<Event, Handler>,
}

impl FnCallback {
    /// Create an empty callback with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: 0,
            run_train: true,
            run_valid: true,
            remove_on_fetch: false,
            handlers: HashMap::new(),
        }
    }

    /// Attach a handler by event name.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::UnknownEvent`] for a name outside the
    /// lifecycle vocabulary; the partially-built callback is consumed.
    pub fn on(
        self,
        event: &str,
        handler: impl FnMut(&mut Learner) -> CallbackResult + 'static,
    ) -> Result<Self, TrainError> {
        let event = Event::from_name(event).ok_or_else(|| TrainError::UnknownEvent {
            name: event.to_string(),
        })?;
        Ok(self.on_event(event, handler))
    }

    /// Attach a handler for a typed event.
    #[must_use]
    pub fn on_event(
        mut self,
        event: Event,
        handler: impl FnMut(&mut Learner) -> CallbackResult + 'static,
    ) -> Self {
        self.handlers.insert(event, Box::new(handler));
        self
    }

    /// Set the invocation order.
    #[must_use]
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Set whether inner-loop handlers fire while training.
    #[must_use]
    pub fn with_run_train(mut self, run_train: bool) -> Self {
        self.run_train = run_train;
        self
    }

    /// Set whether inner-loop handlers fire while validating.
    #[must_use]
    pub fn with_run_valid(mut self, run_valid: bool) -> Self {
        self.run_valid = run_valid;
        self
    }

    /// Mark the callback for removal during nested prediction passes.
    #[must_use]
    pub fn with_remove_on_fetch(mut self, remove_on_fetch: bool) -> Self {
        self.remove_on_fetch = remove_on_fetch;
        self
    }

    fn run_handler(&mut self, event: Event, learn: &mut Learner) -> CallbackResult {
        match self.handlers.get_mut(&event) {
            Some(handler) => handler(learn),
            None => Ok(()),
        }
    }
}

impl Callback for FnCallback {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn run_train(&self) -> bool {
        self.run_train
    }

    fn run_valid(&self) -> bool {
        self.run_valid
    }

    fn remove_on_fetch(&self) -> bool {
        self.remove_on_fetch
    }

    fn after_create(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterCreate, learn)
    }

    fn before_fit(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::BeforeFit, learn)
    }

    fn before_epoch(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::BeforeEpoch, learn)
    }

    fn before_train(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::BeforeTrain, learn)
    }

    fn before_batch(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::BeforeBatch, learn)
    }

    fn after_pred(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterPred, learn)
    }

    fn after_loss(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterLoss, learn)
    }

    fn before_backward(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::BeforeBackward, learn)
    }

    fn before_step(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::BeforeStep, learn)
    }

    fn after_cancel_step(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterCancelStep, learn)
    }

    fn after_step(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterStep, learn)
    }

    fn after_cancel_batch(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterCancelBatch, learn)
    }

    fn after_batch(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterBatch, learn)
    }

    fn after_cancel_train(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterCancelTrain, learn)
    }

    fn after_train(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterTrain, learn)
    }

    fn before_validate(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::BeforeValidate, learn)
    }

    fn after_cancel_validate(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterCancelValidate, learn)
    }

    fn after_validate(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterValidate, learn)
    }

    fn after_cancel_epoch(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterCancelEpoch, learn)
    }

    fn after_epoch(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterEpoch, learn)
    }

    fn after_cancel_fit(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterCancelFit, learn)
    }

    fn after_fit(&mut self, learn: &mut Learner) -> CallbackResult {
        self.run_handler(Event::AfterFit, learn)
    }
}

impl fmt::Debug for FnCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCallback")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Built-in callback that tracks iteration counters and switches
/// train/eval mode.
///
/// Registered by default at order -10 so its bookkeeping is in place
/// before any other callback sees the same event. `run_valid` is false:
/// the iteration counters advance on training batches only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainEvalCallback;

impl Callback for TrainEvalCallback {
    fn order(&self) -> i32 {
        -10
    }

    fn run_valid(&self) -> bool {
        false
    }

    fn after_create(&mut self, learn: &mut Learner) -> CallbackResult {
        learn.n_epoch = 1;
        Ok(())
    }

    fn before_fit(&mut self, learn: &mut Learner) -> CallbackResult {
        learn.epoch = 0;
        learn.loss = Some(Tensor::scalar(0.0));
        learn.train_iter = 0;
        learn.pct_train = 0.0;
        let device = learn.dls.device();
        learn.model.to_device(device);
        learn.loss_func.to_device(device);
        learn.model.reset();
        Ok(())
    }

    fn before_train(&mut self, learn: &mut Learner) -> CallbackResult {
        learn.pct_train = learn.epoch as f64 / learn.n_epoch.max(1) as f64;
        learn.model.set_train(true);
        learn.training = true;
        Ok(())
    }

    fn before_validate(&mut self, learn: &mut Learner) -> CallbackResult {
        learn.model.set_train(false);
        learn.training = false;
        Ok(())
    }

    fn after_batch(&mut self, learn: &mut Learner) -> CallbackResult {
        let total = (learn.n_iter * learn.n_epoch) as f64;
        if total > 0.0 {
            learn.pct_train += 1.0 / total;
        }
        learn.train_iter += 1;
        Ok(())
    }
}

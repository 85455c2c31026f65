//! Prediction gathering and mid-training prediction fetching.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use fitloop_core::{Tensor, TENSOR_RECORD_VERSION};
use fitloop_data::DataLoader;

use crate::callback::{Callback, CallbackHandle};
use crate::error::TrainError;
use crate::event::CallbackResult;
use crate::learner::{GetPreds, Learner, Predictions};

/// Finalized artifacts of one validation pass.
#[derive(Debug, Clone, Default)]
struct Gathered {
    inputs: Option<Tensor>,
    preds: Option<Tensor>,
    targets: Option<Tensor>,
    losses: Option<Tensor>,
}

/// Callback that accumulates predictions, targets, and optionally inputs
/// and per-sample losses across one validation pass.
///
/// Accumulators are created empty at `before_validate`, appended to at
/// `after_batch`, and concatenated into one artifact per quantity at
/// `after_validate`; outside a validation pass the handlers are no-ops.
/// A quantity that never saw a batch stays absent, so a pass over zero
/// batches finishes without artifacts and without error.
///
/// With save directories configured, each batch's predictions/targets are
/// also written to `<dir>/<batch index>.json`, so re-running a pass over
/// the same directory overwrites the previous files deterministically.
#[derive(Debug)]
pub struct GatherPredsCallback {
    with_input: bool,
    with_loss: bool,
    with_preds: bool,
    with_targs: bool,
    save_preds: Option<PathBuf>,
    save_targs: Option<PathBuf>,
    concat_dim: usize,
    save_version: u32,
    started: bool,
    inputs: Vec<Tensor>,
    preds: Vec<Tensor>,
    targets: Vec<Tensor>,
    losses: Vec<Tensor>,
    out: Gathered,
}

impl GatherPredsCallback {
    /// Create a gatherer that captures predictions and targets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            with_input: false,
            with_loss: false,
            with_preds: true,
            with_targs: true,
            save_preds: None,
            save_targs: None,
            concat_dim: 0,
            save_version: TENSOR_RECORD_VERSION,
            started: false,
            inputs: Vec::new(),
            preds: Vec::new(),
            targets: Vec::new(),
            losses: Vec::new(),
            out: Gathered::default(),
        }
    }

    /// Also capture (detached) inputs.
    #[must_use]
    pub fn with_input(mut self, with_input: bool) -> Self {
        self.with_input = with_input;
        self
    }

    /// Also capture per-sample losses.
    #[must_use]
    pub fn with_loss(mut self, with_loss: bool) -> Self {
        self.with_loss = with_loss;
        self
    }

    /// Control whether predictions are captured.
    #[must_use]
    pub fn with_preds(mut self, with_preds: bool) -> Self {
        self.with_preds = with_preds;
        self
    }

    /// Control whether targets are captured.
    #[must_use]
    pub fn with_targs(mut self, with_targs: bool) -> Self {
        self.with_targs = with_targs;
        self
    }

    /// Persist each batch's predictions under this directory.
    #[must_use]
    pub fn save_preds(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_preds = Some(dir.into());
        self
    }

    /// Persist each batch's targets under this directory.
    #[must_use]
    pub fn save_targs(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_targs = Some(dir.into());
        self
    }

    /// Axis along which per-batch tensors are concatenated.
    #[must_use]
    pub fn concat_dim(mut self, dim: usize) -> Self {
        self.concat_dim = dim;
        self
    }

    /// Protocol version used for persisted tensors.
    #[must_use]
    pub fn save_version(mut self, version: u32) -> Self {
        self.save_version = version;
        self
    }

    /// Gathered inputs, if the pass produced any.
    #[must_use]
    pub fn inputs(&self) -> Option<&Tensor> {
        self.out.inputs.as_ref()
    }

    /// Gathered predictions, if the pass produced any.
    #[must_use]
    pub fn preds(&self) -> Option<&Tensor> {
        self.out.preds.as_ref()
    }

    /// Gathered targets, if the pass produced any.
    #[must_use]
    pub fn targets(&self) -> Option<&Tensor> {
        self.out.targets.as_ref()
    }

    /// Gathered per-sample losses, if the pass produced any.
    #[must_use]
    pub fn losses(&self) -> Option<&Tensor> {
        self.out.losses.as_ref()
    }

    /// All gathered artifacts in the fixed order
    /// `(inputs?, preds?, targets?, losses?)`.
    ///
    /// The inputs slot is present only when input capture was requested,
    /// and the losses slot only when loss capture was; predictions and
    /// targets always occupy their slots (as `None` when their capture
    /// flag was off or the pass was empty).
    #[must_use]
    pub fn all_tensors(&self) -> Vec<Option<Tensor>> {
        let mut res = vec![
            if self.with_preds {
                self.out.preds.clone()
            } else {
                None
            },
            if self.with_targs {
                self.out.targets.clone()
            } else {
                None
            },
        ];
        if self.with_input {
            res.insert(0, self.out.inputs.clone());
        }
        if self.with_loss {
            res.push(self.out.losses.clone());
        }
        res
    }

    // One file per batch ordinal; a re-run overwrites in place.
    fn save_tensor(&self, dir: &Path, iter: usize, tensor: &Tensor) -> CallbackResult {
        std::fs::create_dir_all(dir).map_err(TrainError::from)?;
        tensor
            .save(dir.join(format!("{iter}.json")), self.save_version)
            .map_err(TrainError::from)?;
        Ok(())
    }
}

impl Default for GatherPredsCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl Callback for GatherPredsCallback {
    fn before_batch(&mut self, learn: &mut Learner) -> CallbackResult {
        if self.started && self.with_input {
            if let Some(xb) = &learn.xb {
                self.inputs.push(learn.to_detach(xb));
            }
        }
        Ok(())
    }

    fn before_validate(&mut self, _learn: &mut Learner) -> CallbackResult {
        self.started = true;
        self.inputs.clear();
        self.preds.clear();
        self.targets.clear();
        self.losses.clear();
        self.out = Gathered::default();
        Ok(())
    }

    fn after_batch(&mut self, learn: &mut Learner) -> CallbackResult {
        if !self.started {
            return Ok(());
        }
        // A batch cancelled before the forward pass has no prediction;
        // skip it rather than fail.
        let Some(pred) = learn.pred.clone() else {
            return Ok(());
        };
        let pred = learn.to_detach(&pred);
        let targ = learn.yb.as_ref().map(|yb| learn.to_detach(yb));

        if self.with_preds {
            self.preds.push(pred.clone());
        }
        if self.with_targs {
            if let Some(targ) = &targ {
                self.targets.push(targ.clone());
            }
        }
        if let Some(dir) = self.save_preds.clone() {
            self.save_tensor(&dir, learn.iter, &pred)?;
        }
        if let (Some(dir), Some(targ)) = (self.save_targs.clone(), targ.as_ref()) {
            self.save_tensor(&dir, learn.iter, targ)?;
        }
        if self.with_loss {
            if let (Some(yb), Some(loss)) = (&learn.yb, &learn.loss) {
                let bs = yb.size(0).unwrap_or(1).max(1);
                let loss = if loss.numel() == bs {
                    loss.clone()
                } else {
                    let cols = loss.numel() / bs;
                    loss.reshape(&[bs, cols])?.mean_axis(1)?
                };
                self.losses.push(learn.to_detach(&loss));
            }
        }
        Ok(())
    }

    fn after_validate(&mut self, _learn: &mut Learner) -> CallbackResult {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        if self.with_input && !self.inputs.is_empty() {
            self.out.inputs = Some(Tensor::cat(&self.inputs, self.concat_dim)?);
        }
        if self.with_preds && !self.preds.is_empty() {
            self.out.preds = Some(Tensor::cat(&self.preds, self.concat_dim)?);
        }
        if self.with_targs && !self.targets.is_empty() {
            self.out.targets = Some(Tensor::cat(&self.targets, self.concat_dim)?);
        }
        if self.with_loss && !self.losses.is_empty() {
            self.out.losses = Some(Tensor::cat(&self.losses, 0)?);
        }
        Ok(())
    }
}

/// Callback that fetches a full set of predictions mid-training.
///
/// At the end of each validation phase it runs a nested prediction pass
/// over the configured split (default: validation) with every callback
/// marked `remove_on_fetch` — itself included — plus its configured
/// suppression list temporarily removed. The removal is scoped: the
/// callback collection is restored on every exit path, including a
/// failing nested pass, and the nested pass can never re-trigger the
/// fetch recursively.
pub struct FetchPredsCallback {
    ds_idx: usize,
    dl: Option<DataLoader>,
    with_input: bool,
    with_decoded: bool,
    cbs: Vec<CallbackHandle>,
    reorder: bool,
    preds: Option<Predictions>,
}

impl FetchPredsCallback {
    /// Create a fetcher over the validation split.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ds_idx: 1,
            dl: None,
            with_input: false,
            with_decoded: false,
            cbs: Vec::new(),
            reorder: true,
            preds: None,
        }
    }

    /// Fetch from a different split index.
    #[must_use]
    pub fn with_ds_idx(mut self, ds_idx: usize) -> Self {
        self.ds_idx = ds_idx;
        self
    }

    /// Fetch from an explicit loader instead of a split.
    #[must_use]
    pub fn with_dl(mut self, dl: DataLoader) -> Self {
        self.dl = Some(dl);
        self
    }

    /// Include (detached) inputs in the fetched predictions.
    #[must_use]
    pub fn with_input(mut self, with_input: bool) -> Self {
        self.with_input = with_input;
        self
    }

    /// Include decoded predictions.
    #[must_use]
    pub fn with_decoded(mut self, with_decoded: bool) -> Self {
        self.with_decoded = with_decoded;
        self
    }

    /// Suppress an extra callback during the nested pass.
    #[must_use]
    pub fn suppressing(mut self, cb: CallbackHandle) -> Self {
        self.cbs.push(cb);
        self
    }

    /// Control whether fetched results follow dataset order.
    #[must_use]
    pub fn with_reorder(mut self, reorder: bool) -> Self {
        self.reorder = reorder;
        self
    }

    /// The most recently fetched predictions.
    #[must_use]
    pub fn preds(&self) -> Option<&Predictions> {
        self.preds.as_ref()
    }

    /// Take the most recently fetched predictions.
    pub fn take_preds(&mut self) -> Option<Predictions> {
        self.preds.take()
    }
}

impl Default for FetchPredsCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl Callback for FetchPredsCallback {
    fn remove_on_fetch(&self) -> bool {
        true
    }

    fn after_validate(&mut self, learn: &mut Learner) -> CallbackResult {
        let mut to_rm = learn.cbs().remove_on_fetch_handles();
        for handle in &self.cbs {
            if !to_rm.iter().any(|h| Rc::ptr_eq(h, handle)) {
                to_rm.push(Rc::clone(handle));
            }
        }
        let cfg = GetPreds {
            ds_idx: self.ds_idx,
            dl: self.dl.clone(),
            with_input: self.with_input,
            with_decoded: self.with_decoded,
            with_loss: false,
            inner: true,
            reorder: self.reorder,
        };
        let mut guard = learn.removed_cbs(&to_rm);
        let fetched = guard.get_preds(cfg)?;
        drop(guard);
        self.preds = Some(fetched);
        Ok(())
    }
}

impl std::fmt::Debug for FetchPredsCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPredsCallback")
            .field("ds_idx", &self.ds_idx)
            .field("with_input", &self.with_input)
            .field("with_decoded", &self.with_decoded)
            .field("suppressed", &self.cbs.len())
            .field("reorder", &self.reorder)
            .finish()
    }
}

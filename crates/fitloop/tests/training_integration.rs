//! End-to-end scenarios for the training loop and its built-in callbacks.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{assert_close, loaders, spy, toy_learner, AbsLoss, IdentityModule, NoOpt};
use fitloop::prelude::*;

#[test]
fn gathered_losses_and_iteration_bookkeeping() {
    // One epoch, 3 training batches, 2 validation batches of size 1
    // producing per-batch losses 0.5 and 0.3.
    let dls = loaders(
        &[(0.0, 0.0), (0.0, 0.0), (0.0, 0.0)],
        &[(1.0, 0.5), (1.0, 0.7)],
    );
    let gather = Rc::new(RefCell::new(GatherPredsCallback::new().with_loss(true)));
    let mut cbs = default_callbacks();
    cbs.push(gather.clone());
    let mut learn =
        Learner::with_cbs(IdentityModule::new(), AbsLoss, NoOpt, dls, cbs).unwrap();

    learn.fit(1).unwrap();

    assert_eq!(learn.train_iter, 3);
    let gather = gather.borrow();
    assert_close(&gather.losses().unwrap().to_vec(), &[0.5, 0.3]);
    // the loss artifact occupies the last slot
    let slots = gather.all_tensors();
    assert_eq!(slots.len(), 3);
    assert_close(&slots[2].as_ref().unwrap().to_vec(), &[0.5, 0.3]);
}

#[test]
fn cancel_epoch_mid_training_skips_validation_once() {
    // A custom callback cancels the first epoch of a 2-epoch fit at its
    // second training batch; the second epoch proceeds normally.
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut learn = toy_learner(&[(1.0, 1.0), (2.0, 2.0)], &[(3.0, 3.0)]);
    learn.add_cb(spy(Rc::clone(&log)));
    learn.add_cb(
        FnCallback::new("epoch_canceller")
            .on("before_batch", |learn| {
                if learn.training && learn.epoch == 0 && learn.iter == 1 {
                    Err(Cancel::Epoch.into())
                } else {
                    Ok(())
                }
            })
            .unwrap(),
    );

    learn.fit(2).unwrap();

    let events = log.borrow();
    let count = |e: Event| events.iter().filter(|&&x| x == e).count();
    assert_eq!(count(Event::AfterCancelEpoch), 1);
    assert_eq!(count(Event::AfterEpoch), 2);
    assert_eq!(count(Event::BeforeTrain), 2);
    // validation ran only in the second epoch
    assert_eq!(count(Event::BeforeValidate), 1);
    assert_eq!(count(Event::AfterValidate), 1);
    // the second epoch's training phase completed both batches
    assert_eq!(count(Event::AfterCancelBatch), 0);
}

#[test]
fn run_flags_reset_even_when_disabled_mid_fit() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut learn = toy_learner(&[(1.0, 1.0)], &[(2.0, 2.0)]);
    learn.add_cb(spy(Rc::clone(&log)));
    learn.add_cb(
        FnCallback::new("disabler")
            .with_order(-5)
            .on("after_train", |learn| {
                learn.cbs_mut().set_run("spy", false);
                Ok(())
            })
            .unwrap(),
    );

    learn.fit(1).unwrap();
    assert_eq!(learn.cbs().run_flag("spy"), Some(true));
    assert!(!log.borrow().contains(&Event::AfterFit));

    // a second fit sees the spy fully re-enabled
    log.borrow_mut().clear();
    learn.cbs_mut().set_run("disabler", false);
    learn.fit(1).unwrap();
    assert!(log.borrow().contains(&Event::AfterFit));
}

#[test]
fn fetch_preds_restores_callbacks_when_nested_pass_fails() {
    // The fuse allows the outer fit's two forward passes (one train, one
    // valid batch) and blows inside the nested prediction pass.
    let dls = loaders(&[(1.0, 1.0)], &[(2.0, 2.0)]);
    let mut learn =
        Learner::new(IdentityModule::failing_after(2), AbsLoss, NoOpt, dls).unwrap();
    learn.add_cb(FetchPredsCallback::new());
    let before = learn.cbs().names();

    let err = learn.fit(1).unwrap_err();
    assert!(matches!(err, TrainError::Core(CoreError::ModuleError(_))));
    assert_eq!(learn.cbs().names(), before);
}

#[test]
fn fetch_preds_gathers_validation_predictions() {
    let dls = loaders(&[(1.0, 1.0)], &[(2.0, 5.0), (3.0, 7.0)]);
    let mut learn = Learner::new(IdentityModule::new(), AbsLoss, NoOpt, dls).unwrap();
    let fetcher = Rc::new(RefCell::new(
        FetchPredsCallback::new().with_input(true).with_decoded(true),
    ));
    learn.add_cb_handle(fetcher.clone());

    learn.fit(1).unwrap();

    let fetcher = fetcher.borrow();
    let preds = fetcher.preds().unwrap();
    assert_close(&preds.preds.as_ref().unwrap().to_vec(), &[2.0, 3.0]);
    assert_close(&preds.inputs.as_ref().unwrap().to_vec(), &[2.0, 3.0]);
    assert_close(&preds.decoded.as_ref().unwrap().to_vec(), &[2.0, 3.0]);
    assert_close(&preds.targets.as_ref().unwrap().to_vec(), &[5.0, 7.0]);
}

#[test]
fn unknown_event_name_fails_construction() {
    let res = FnCallback::new("typo").on("before_bath", |_| Ok(()));
    assert!(matches!(
        res,
        Err(TrainError::UnknownEvent { ref name }) if name == "before_bath"
    ));
}

#[test]
fn gather_preds_persists_one_file_per_batch() {
    let dir = tempfile::tempdir().unwrap();
    let preds_dir = dir.path().join("preds");

    let mut learn = toy_learner(&[(1.0, 1.0)], &[(2.0, 2.0), (3.0, 3.0)]);
    learn.add_cb(GatherPredsCallback::new().save_preds(&preds_dir));
    learn.fit(1).unwrap();

    let first = Tensor::load(preds_dir.join("0.json")).unwrap();
    let second = Tensor::load(preds_dir.join("1.json")).unwrap();
    assert_close(&first.to_vec(), &[2.0]);
    assert_close(&second.to_vec(), &[3.0]);

    // a second pass overwrites the same ordinals
    learn.fit(1).unwrap();
    assert!(!preds_dir.join("2.json").exists());
}

#[test]
fn zero_validation_batches_leave_gather_empty() {
    let train_x = Tensor::from_vec(&[1, 1], vec![1.0]).unwrap();
    let train_y = Tensor::from_vec(&[1, 1], vec![1.0]).unwrap();
    let empty_x = Tensor::from_vec(&[0, 1], vec![]).unwrap();
    let empty_y = Tensor::from_vec(&[0, 1], vec![]).unwrap();
    let dls = DataLoaders::builder(
        Dataset::new(train_x, Some(train_y)).unwrap(),
        Dataset::new(empty_x, Some(empty_y)).unwrap(),
    )
    .batch_size(1)
    .shuffle_train(false)
    .build()
    .unwrap();

    let gather = Rc::new(RefCell::new(
        GatherPredsCallback::new().with_input(true).with_loss(true),
    ));
    let mut learn = Learner::new(IdentityModule::new(), AbsLoss, NoOpt, dls).unwrap();
    learn.add_cb_handle(gather.clone());

    learn.fit(1).unwrap();

    let gather = gather.borrow();
    assert!(gather.inputs().is_none());
    assert!(gather.preds().is_none());
    assert!(gather.targets().is_none());
    assert!(gather.losses().is_none());
}

#[test]
fn validate_runs_a_standalone_validation_pass() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut learn = toy_learner(&[(1.0, 1.0)], &[(2.0, 2.0)]);
    learn.add_cb(spy(Rc::clone(&log)));

    learn.validate().unwrap();

    use Event::*;
    assert_eq!(
        *log.borrow(),
        vec![BeforeValidate, BeforeBatch, AfterPred, AfterLoss, AfterBatch, AfterValidate]
    );
    assert!(!learn.training);
}

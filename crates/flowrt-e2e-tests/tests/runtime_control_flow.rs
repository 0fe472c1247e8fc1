//! Conditional and while-loop kernel behavior.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{await_value, new_ctx, read_scalar, scalar_handle};
use flowrt_host::kernels::{allocate_indirect_results, cond, create_dense_tensor, while_loop};
use flowrt_host::{
    ready_chain, AsyncValue, ExecutionContext, Function, HostContext, NativeFunction,
    RuntimeError, TensorHandle,
};

/// A 0-argument function returning one constant scalar, counting its
/// invocations.
fn const_fn(name: &str, value: i32, calls: Arc<AtomicU32>) -> Arc<dyn Function> {
    NativeFunction::new(name, 0, 1, move |ctx, _args| {
        calls.fetch_add(1, Ordering::SeqCst);
        vec![AsyncValue::concrete(scalar_handle(ctx, value))]
    })
}

/// `cond_fn(x) = (chain, x > 0)`, forwarding argument errors to both
/// outputs the way a compiled function body would.
fn greater_than_zero(calls: Arc<AtomicU32>) -> Arc<dyn Function> {
    NativeFunction::new("gt_zero", 1, 2, move |ctx, args| {
        calls.fetch_add(1, Ordering::SeqCst);
        if args[0].is_error() {
            return vec![args[0].clone(), args[0].clone()];
        }
        let x = read_scalar(args[0].get::<TensorHandle>());
        let predicate = scalar_handle(ctx, i32::from(x > 0));
        vec![
            ready_chain().into_value(),
            AsyncValue::concrete(predicate),
        ]
    })
}

/// `body_fn(x) = x - 1`, counting invocations.
fn decrement(calls: Arc<AtomicU32>) -> Arc<dyn Function> {
    NativeFunction::new("decrement", 1, 1, move |ctx, args| {
        calls.fetch_add(1, Ordering::SeqCst);
        let x = read_scalar(args[0].get::<TensorHandle>());
        vec![AsyncValue::concrete(scalar_handle(ctx, x - 1))]
    })
}

/// Scenario: a true dense-bool predicate selects the true branch exactly
/// once; the false branch is never invoked.
#[test]
fn cond_takes_true_branch() {
    let ctx = new_ctx();
    let true_calls = Arc::new(AtomicU32::new(0));
    let false_calls = Arc::new(AtomicU32::new(0));
    let true_fn = const_fn("one", 1, true_calls.clone());
    let false_fn = const_fn("zero", 0, false_calls.clone());

    let predicate = create_dense_tensor(&ctx, &[1], &[true]).unwrap();
    let args = vec![AsyncValue::concrete(predicate)];
    let results = allocate_indirect_results(1);
    cond(&ctx, &args, &true_fn, &false_fn, &results);

    await_value(&ctx, &results[0]);
    assert_eq!(read_scalar(results[0].get::<TensorHandle>()), 1);
    assert_eq!(true_calls.load(Ordering::SeqCst), 1);
    assert_eq!(false_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn cond_takes_false_branch() {
    let ctx = new_ctx();
    let true_calls = Arc::new(AtomicU32::new(0));
    let false_calls = Arc::new(AtomicU32::new(0));
    let true_fn = const_fn("one", 1, true_calls.clone());
    let false_fn = const_fn("zero", 0, false_calls.clone());

    let predicate = scalar_handle(&ctx, 0);
    let args = vec![AsyncValue::concrete(predicate)];
    let results = allocate_indirect_results(1);
    cond(&ctx, &args, &true_fn, &false_fn, &results);

    await_value(&ctx, &results[0]);
    assert_eq!(read_scalar(results[0].get::<TensorHandle>()), 0);
    assert_eq!(true_calls.load(Ordering::SeqCst), 0);
    assert_eq!(false_calls.load(Ordering::SeqCst), 1);
}

/// The conditional is non-strict: it may run before the predicate is
/// ready and dispatches once it resolves.
#[test]
fn cond_waits_for_pending_predicate() {
    let ctx = new_ctx();
    let calls = Arc::new(AtomicU32::new(0));
    let true_fn = const_fn("one", 1, calls.clone());
    let false_fn = const_fn("zero", 0, Arc::new(AtomicU32::new(0)));

    let pending = AsyncValue::unavailable();
    let results = allocate_indirect_results(1);
    cond(&ctx, &[pending.clone()], &true_fn, &false_fn, &results);
    assert!(!results[0].is_available());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    pending.set_value(scalar_handle(&ctx, 7));
    await_value(&ctx, &results[0]);
    assert_eq!(read_scalar(results[0].get::<TensorHandle>()), 1);
}

#[test]
fn cond_propagates_predicate_error() {
    let ctx = new_ctx();
    let true_fn = const_fn("one", 1, Arc::new(AtomicU32::new(0)));
    let false_fn = const_fn("zero", 0, Arc::new(AtomicU32::new(0)));

    let failed = AsyncValue::error(RuntimeError::Message("bad predicate".into()));
    let results = allocate_indirect_results(1);
    cond(&ctx, &[failed], &true_fn, &false_fn, &results);
    await_value(&ctx, &results[0]);
    assert!(results[0].is_error());
    assert!(results[0].get_error().to_string().contains("bad predicate"));
}

#[test]
fn cond_rejects_multi_element_predicate() {
    let ctx = new_ctx();
    let true_fn = const_fn("one", 1, Arc::new(AtomicU32::new(0)));
    let false_fn = const_fn("zero", 0, Arc::new(AtomicU32::new(0)));

    let wide = create_dense_tensor(&ctx, &[2], &[1i32, 0]).unwrap();
    let results = allocate_indirect_results(1);
    cond(&ctx, &[AsyncValue::concrete(wide)], &true_fn, &false_fn, &results);
    await_value(&ctx, &results[0]);
    assert!(results[0].is_error());
    assert!(results[0]
        .get_error()
        .to_string()
        .contains("single element"));
}

/// Scenario: `while (x > 0) { x = x - 1 }` from 3 terminates at 0 with
/// exactly three body invocations.
#[test]
fn while_counts_down_to_zero() {
    let ctx = new_ctx();
    let cond_calls = Arc::new(AtomicU32::new(0));
    let body_calls = Arc::new(AtomicU32::new(0));
    let cond_fn = greater_than_zero(cond_calls.clone());
    let body_fn = decrement(body_calls.clone());

    let args = vec![AsyncValue::concrete(scalar_handle(&ctx, 3))];
    let results = allocate_indirect_results(1);
    while_loop(&ctx, &args, &cond_fn, &body_fn, &results);

    await_value(&ctx, &results[0]);
    assert_eq!(read_scalar(results[0].get::<TensorHandle>()), 0);
    assert_eq!(body_calls.load(Ordering::SeqCst), 3);
    // cond runs once per iteration plus the final false evaluation.
    assert_eq!(cond_calls.load(Ordering::SeqCst), 4);
}

#[test]
fn while_with_false_condition_copies_args() {
    let ctx = new_ctx();
    let body_calls = Arc::new(AtomicU32::new(0));
    let cond_fn = greater_than_zero(Arc::new(AtomicU32::new(0)));
    let body_fn = decrement(body_calls.clone());

    let args = vec![AsyncValue::concrete(scalar_handle(&ctx, 0))];
    let results = allocate_indirect_results(1);
    while_loop(&ctx, &args, &cond_fn, &body_fn, &results);

    await_value(&ctx, &results[0]);
    assert_eq!(read_scalar(results[0].get::<TensorHandle>()), 0);
    assert_eq!(body_calls.load(Ordering::SeqCst), 0);
}

/// Scenario: cancellation signalled before the first iteration forwards
/// every result to the cancel value without invoking the condition.
#[test]
fn while_observes_preexisting_cancellation() {
    let host = HostContext::with_threads(2);
    let cancel = AsyncValue::error(RuntimeError::Cancelled);
    let ctx = ExecutionContext::new(host).with_cancel_value(cancel.clone());

    let cond_calls = Arc::new(AtomicU32::new(0));
    let cond_fn = greater_than_zero(cond_calls.clone());
    let body_fn = decrement(Arc::new(AtomicU32::new(0)));

    let args = vec![AsyncValue::concrete(scalar_handle(&ctx, 3))];
    let results = allocate_indirect_results(1);
    while_loop(&ctx, &args, &cond_fn, &body_fn, &results);

    await_value(&ctx, &results[0]);
    assert!(results[0].is_error());
    assert_eq!(
        results[0].get_error().to_string(),
        RuntimeError::Cancelled.to_string()
    );
    assert_eq!(cond_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn while_rejects_non_cpu_condition_device() {
    let ctx = new_ctx();
    let accel = ctx.host().devices().register(flowrt_host::Device::new(
        "accel0",
        flowrt_host::DeviceType::Other("npu"),
    ));

    let accel_for_cond = accel.clone();
    let cond_fn: Arc<dyn Function> = NativeFunction::new("accel_pred", 1, 2, move |ctx, _args| {
        let predicate = scalar_handle(ctx, 1).with_device(accel_for_cond.clone());
        vec![
            ready_chain().into_value(),
            AsyncValue::concrete(predicate),
        ]
    });
    let body_fn = decrement(Arc::new(AtomicU32::new(0)));

    let args = vec![AsyncValue::concrete(scalar_handle(&ctx, 3))];
    let results = allocate_indirect_results(1);
    while_loop(&ctx, &args, &cond_fn, &body_fn, &results);

    await_value(&ctx, &results[0]);
    assert!(results[0].is_error());
    assert!(results[0]
        .get_error()
        .to_string()
        .contains("non-cpu device for condition tensor handle"));
}

/// Errors produced by the body surface through the next condition
/// evaluation and poison every loop result.
#[test]
fn while_propagates_body_error() {
    let ctx = new_ctx();
    let cond_fn = greater_than_zero(Arc::new(AtomicU32::new(0)));
    let body_fn: Arc<dyn Function> = NativeFunction::new("explode", 1, 1, |_ctx, _args| {
        vec![AsyncValue::error(RuntimeError::Message("body failed".into()))]
    });

    let args = vec![AsyncValue::concrete(scalar_handle(&ctx, 3))];
    let results = allocate_indirect_results(1);
    while_loop(&ctx, &args, &cond_fn, &body_fn, &results);

    await_value(&ctx, &results[0]);
    assert!(results[0].is_error());
    assert!(results[0].get_error().to_string().contains("body failed"));
}

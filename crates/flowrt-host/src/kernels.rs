//! Core-runtime kernels.
//!
//! The kernel primitives the executor drives the core runtime with:
//! tensor/handle conversions, constant materialization, op dispatch in
//! sync, async, and chain-sequenced forms, and the control-flow kernels
//! (`cond`, `while`). Kernels never block: every wait is a callback on an
//! async value, and loop tails re-enter through the host work queue.
//!
//! Async kernels report local failures through a [`KernelErrorHandler`],
//! which poisons the kernel's results; sync kernels return errors
//! directly. Result cells for async kernels are allocated indirect (see
//! [`allocate_indirect_results`]) so nested computations can resolve them
//! by forwarding.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace};

use flowrt_ir::DenseAttr;

use crate::async_value::{when_all, AsyncValue, AsyncValueRef, Chain};
use crate::context::ExecutionContext;
use crate::corert::{CoreRuntimeOp, Function, OpHandler, OpKind};
use crate::error::RuntimeError;
use crate::op_attrs::{OpAttr, OpAttrs};
use crate::tensor::{
    tensor_predicate, DenseElement, DenseHostTensor, HostTensor, StringHostTensor, TensorShape,
};
use crate::tensor_handle::TensorHandle;

/// Allocates `count` indirect async values to serve as a kernel's results.
pub fn allocate_indirect_results(count: usize) -> Vec<Arc<AsyncValue>> {
    (0..count).map(|_| AsyncValue::indirect()).collect()
}

/// Resolves `value` to the given error value: forwarding when indirect,
/// erroring directly otherwise.
fn poison(value: &Arc<AsyncValue>, error: &Arc<AsyncValue>) {
    if value.is_indirect() {
        value.clone().forward_to(error.clone());
    } else {
        value.set_error_arc(error.get_error());
    }
}

/// Error reporting for async kernels: a reported error poisons every
/// result of the kernel.
pub struct KernelErrorHandler<'a> {
    exec_ctx: &'a ExecutionContext,
    results: &'a [Arc<AsyncValue>],
}

impl<'a> KernelErrorHandler<'a> {
    /// Creates a handler poisoning `results` on report.
    pub fn new(exec_ctx: &'a ExecutionContext, results: &'a [Arc<AsyncValue>]) -> Self {
        Self { exec_ctx, results }
    }

    /// Reports a kernel-local failure.
    pub fn report_error(&self, error: RuntimeError) {
        let error_value = self.exec_ctx.emit_error(error);
        for result in self.results {
            poison(result, &error_value);
        }
    }
}

/// If `condition` (or the tensor handle inside it) is an error, forwards
/// every result to the error value and returns `true`.
fn return_after_handling_error(condition: &Arc<AsyncValue>, results: &[Arc<AsyncValue>]) -> bool {
    if condition.is_error() {
        for result in results {
            poison(result, condition);
        }
        return true;
    }
    if condition.is_type::<TensorHandle>() {
        if let Some(error_value) = condition.get::<TensorHandle>().error_async_value() {
            for result in results {
                poison(result, &error_value);
            }
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Conversions.

/// Packages a host tensor as a tensor handle on the host device. The chain
/// argument orders this against prior side effects.
pub fn ht_to_tensorhandle(
    exec_ctx: &ExecutionContext,
    tensor: &AsyncValueRef<HostTensor>,
    _in_chain: &AsyncValueRef<Chain>,
) -> TensorHandle {
    let metadata = tensor.get().metadata().clone();
    TensorHandle::new(
        exec_ctx.host().host_device().clone(),
        metadata,
        tensor.clone(),
    )
}

/// Extracts the async host-tensor payload of a handle.
pub fn tensorhandle_to_ht(th: &TensorHandle) -> AsyncValueRef<HostTensor> {
    th.async_tensor().clone()
}

/// The shape of a handle's tensor: synchronously when the metadata is
/// already concrete, otherwise through an indirect value that resolves
/// (or errors) with the metadata.
pub fn tensorhandle_to_shape(th: &TensorHandle) -> Arc<AsyncValue> {
    if let Some(metadata) = th.metadata() {
        return AsyncValue::concrete(metadata.shape.clone());
    }
    let result = AsyncValue::indirect();
    let metadata = th.async_metadata();
    let observed = metadata.clone();
    let out = result.clone();
    metadata.and_then(move || {
        if observed.is_error() {
            out.forward_to(observed.value().clone());
        } else {
            out.forward_to(AsyncValue::concrete(observed.get().shape.clone()));
        }
    });
    result
}

/// Prints a tensor handle to stdout.
pub fn print_tensorhandle_sync(th: &TensorHandle) {
    println!("{th}");
}

/// Prints a tensor handle, returning a chain for sequencing.
pub fn print_tensorhandle(th: &TensorHandle) -> Chain {
    print_tensorhandle_sync(th);
    Chain
}

// ---------------------------------------------------------------------------
// Op attributes.

/// Creates an empty attribute dictionary.
pub fn create_op_attrs() -> OpAttrs {
    OpAttrs::new()
}

/// Sets a boolean attribute.
pub fn op_attrs_set_bool(attrs: &mut OpAttrs, key: &str, value: bool) -> Chain {
    attrs.set(key, OpAttr::Bool(value));
    Chain
}

/// Sets a 32-bit integer attribute.
pub fn op_attrs_set_i32(attrs: &mut OpAttrs, key: &str, value: i32) -> Chain {
    attrs.set(key, OpAttr::I32(value));
    Chain
}

/// Sets a 32-bit float attribute.
pub fn op_attrs_set_f32(attrs: &mut OpAttrs, key: &str, value: f32) -> Chain {
    attrs.set(key, OpAttr::F32(value));
    Chain
}

/// Sets an element-type attribute.
pub fn op_attrs_set_dtype(attrs: &mut OpAttrs, key: &str, value: flowrt_ir::DType) -> Chain {
    attrs.set(key, OpAttr::DType(value));
    Chain
}

/// Sets a string attribute.
pub fn op_attrs_set_string(attrs: &mut OpAttrs, key: &str, value: &str) -> Chain {
    attrs.set(key, OpAttr::Str(value.to_string()));
    Chain
}

/// Sets a shape attribute.
pub fn op_attrs_set_shape(attrs: &mut OpAttrs, key: &str, dims: &[i64]) -> Chain {
    attrs.set(key, OpAttr::Shape(dims.to_vec()));
    Chain
}

/// Sets a dense-constant attribute.
pub fn op_attrs_set_dense(attrs: &mut OpAttrs, key: &str, value: DenseAttr) -> Chain {
    attrs.set(key, OpAttr::Dense(value));
    Chain
}

/// Sets an aggregate attribute.
pub fn op_attrs_set_aggregate(attrs: &mut OpAttrs, key: &str, value: Vec<OpAttr>) -> Chain {
    attrs.set(key, OpAttr::Aggregate(value));
    Chain
}

/// Sets an i32-array attribute.
pub fn op_attrs_set_array_i32(attrs: &mut OpAttrs, key: &str, values: &[i32]) -> Chain {
    attrs.set(key, OpAttr::ArrayI32(values.to_vec()));
    Chain
}

// ---------------------------------------------------------------------------
// Constants.

/// Materializes a dense constant tensor from a dense attribute.
pub fn const_dense_tensor(
    exec_ctx: &ExecutionContext,
    value: &DenseAttr,
) -> Result<TensorHandle, RuntimeError> {
    let tensor = DenseHostTensor::from_attr(value)
        .ok_or(RuntimeError::AllocationFailed("dense host tensor"))?;
    let metadata = tensor.metadata().clone();
    Ok(TensorHandle::new(
        exec_ctx.host().host_device().clone(),
        metadata,
        AsyncValueRef::available(HostTensor::Dense(tensor)),
    ))
}

/// Materializes a string constant tensor. A single value broadcasts to
/// every element.
pub fn const_string_tensor(
    exec_ctx: &ExecutionContext,
    shape: &[i64],
    values: &[String],
) -> Result<TensorHandle, RuntimeError> {
    let mut tensor = StringHostTensor::new(TensorShape::new(shape.to_vec()))
        .ok_or(RuntimeError::AllocationFailed("string host tensor"))?;
    if values.len() == 1 {
        for slot in tensor.strings_mut() {
            slot.clone_from(&values[0]);
        }
    } else {
        debug_assert_eq!(values.len(), tensor.strings().len());
        for (slot, value) in tensor.strings_mut().iter_mut().zip(values) {
            slot.clone_from(value);
        }
    }
    let metadata = tensor.metadata().clone();
    Ok(TensorHandle::new(
        exec_ctx.host().host_device().clone(),
        metadata,
        AsyncValueRef::available(HostTensor::Str(tensor)),
    ))
}

/// Materializes a dense tensor from typed elements.
pub fn create_dense_tensor<T: DenseElement>(
    exec_ctx: &ExecutionContext,
    shape: &[i64],
    values: &[T],
) -> Result<TensorHandle, RuntimeError> {
    let tensor = DenseHostTensor::from_values(TensorShape::new(shape.to_vec()), values)
        .ok_or(RuntimeError::AllocationFailed("dense host tensor"))?;
    let metadata = tensor.metadata().clone();
    Ok(TensorHandle::new(
        exec_ctx.host().host_device().clone(),
        metadata,
        AsyncValueRef::available(HostTensor::Dense(tensor)),
    ))
}

// ---------------------------------------------------------------------------
// Op handlers.

/// Looks up an op handler on the core runtime.
pub fn get_op_handler_sync(
    exec_ctx: &ExecutionContext,
    name: &str,
) -> Result<Arc<dyn OpHandler>, RuntimeError> {
    exec_ctx
        .host()
        .core_runtime()
        .get_op_handler(name)
        .ok_or_else(|| RuntimeError::OpHandlerNotFound(name.to_string()))
}

/// [`get_op_handler_sync`] behind a chain, for sequencing against dynamic
/// registration.
pub fn get_op_handler(
    exec_ctx: &ExecutionContext,
    _in_chain: &AsyncValueRef<Chain>,
    name: &str,
) -> Result<Arc<dyn OpHandler>, RuntimeError> {
    get_op_handler_sync(exec_ctx, name)
}

/// Registers an op handler on the core runtime.
pub fn register_op_handler_sync(
    exec_ctx: &ExecutionContext,
    name: &str,
    root: Arc<dyn OpHandler>,
) {
    exec_ctx.host().core_runtime().register_op_handler(name, root);
}

/// [`register_op_handler_sync`] returning a chain for sequencing.
pub fn register_op_handler(
    exec_ctx: &ExecutionContext,
    name: &str,
    root: Arc<dyn OpHandler>,
) -> Chain {
    register_op_handler_sync(exec_ctx, name, root);
    Chain
}

/// Wraps a function body as a callable composite op.
pub fn make_composite_op(body: Arc<dyn Function>) -> CoreRuntimeOp {
    CoreRuntimeOp::composite(body)
}

/// Moves a tensor handle to another device. The tensor type name selects
/// the destination representation.
pub fn transfer(
    exec_ctx: &ExecutionContext,
    th: &TensorHandle,
    device_name: &str,
    dst_tensor_type: &str,
) -> Result<TensorHandle, RuntimeError> {
    let device = exec_ctx
        .host()
        .devices()
        .get(device_name)
        .ok_or_else(|| RuntimeError::DeviceNotFound(device_name.to_string()))?;
    match dst_tensor_type {
        "dense" | "string" => {}
        other => {
            return Err(RuntimeError::Message(format!(
                "unknown destination tensor type '{other}'"
            )))
        }
    }
    Ok(th.with_device(device))
}

// ---------------------------------------------------------------------------
// Op dispatch.

/// Shared dispatch path. `in_chain` (when present) sequences the dispatch:
/// it is awaited before the op runs, and an error in it poisons every
/// result. The returned chain resolves once the op's effects are visible.
fn execute_op_impl(
    exec_ctx: &ExecutionContext,
    op: &CoreRuntimeOp,
    args: &[Arc<AsyncValue>],
    in_chain: Option<&AsyncValueRef<Chain>>,
    attrs: &OpAttrs,
    results: &[Arc<AsyncValue>],
) -> AsyncValueRef<Chain> {
    if let Some(chain) = in_chain {
        if !chain.is_available() {
            let done = AsyncValueRef::<Chain>::indirect();
            let forwarded = done.clone();
            let chain_moved = chain.clone();
            let ctx = exec_ctx.clone();
            let op = op.clone();
            let args = args.to_vec();
            let attrs = attrs.clone();
            let results = results.to_vec();
            chain.and_then(move || {
                let completed =
                    dispatch_now(&ctx, &op, &args, Some(&chain_moved), &attrs, &results);
                forwarded.forward(completed);
            });
            return done;
        }
    }
    dispatch_now(exec_ctx, op, args, in_chain, attrs, results)
}

fn dispatch_now(
    exec_ctx: &ExecutionContext,
    op: &CoreRuntimeOp,
    args: &[Arc<AsyncValue>],
    in_chain: Option<&AsyncValueRef<Chain>>,
    attrs: &OpAttrs,
    results: &[Arc<AsyncValue>],
) -> AsyncValueRef<Chain> {
    exec_ctx.trace_dispatch(op.name());

    let fail = |error_value: Arc<AsyncValue>| {
        for result in results {
            poison(result, &error_value);
        }
        AsyncValueRef::<Chain>::from_value(error_value)
    };

    if let Some(chain) = in_chain {
        if chain.is_error() {
            return fail(chain.value().clone());
        }
    }
    for arg in args {
        if arg.is_error() {
            return fail(arg.clone());
        }
    }

    match &op.kind {
        OpKind::Native(dispatch) => {
            let handles: Vec<TensorHandle> =
                args.iter().map(|a| a.get::<TensorHandle>().clone()).collect();
            let output = dispatch(exec_ctx, &handles, attrs, results.len());
            debug_assert_eq!(output.results.len(), results.len(), "op result arity");
            for (result, produced) in results.iter().zip(output.results) {
                result.clone().forward_to(produced);
            }
            output.chain
        }
        OpKind::Composite(body) => {
            let produced = body.execute(exec_ctx, args);
            debug_assert_eq!(produced.len(), results.len(), "composite result arity");
            for (result, value) in results.iter().zip(&produced) {
                result.clone().forward_to(value.clone());
            }
            // The composite's effects are visible once its results are.
            let done = AsyncValueRef::<Chain>::unavailable();
            let done_setter = done.clone();
            let deps = produced.clone();
            when_all(&produced, move || {
                match deps.iter().find(|v| v.is_error()) {
                    Some(err) => done_setter.value().set_error_arc(err.get_error()),
                    None => done_setter.emplace(Chain),
                }
            });
            done
        }
    }
}

/// Looks up `op_name` on the handler and dispatches it. Arguments must be
/// resolved tensor handles (the executor invokes this kernel strictly);
/// results are filled through the supplied indirect cells.
pub fn execute_op(
    exec_ctx: &ExecutionContext,
    op_handler: &Arc<dyn OpHandler>,
    args: &[Arc<AsyncValue>],
    attrs: &OpAttrs,
    op_name: &str,
    results: &[Arc<AsyncValue>],
    handler: &KernelErrorHandler<'_>,
) {
    let op = match exec_ctx.host().core_runtime().make_op(op_name, op_handler) {
        Ok(op) => op,
        Err(error) => return handler.report_error(error),
    };
    let _ = execute_op_impl(exec_ctx, &op, args, None, attrs, results);
}

/// Executes an already-materialized core-runtime op (e.g. a composite op).
pub fn execute_crt_op(
    exec_ctx: &ExecutionContext,
    op: &CoreRuntimeOp,
    args: &[Arc<AsyncValue>],
    attrs: &OpAttrs,
    results: &[Arc<AsyncValue>],
) {
    let _ = execute_op_impl(exec_ctx, op, args, None, attrs, results);
}

/// Chain-sequenced op execution.
///
/// Fast path: when the handler and all tensor arguments are already
/// concrete, dispatch immediately (the chain itself is awaited inside the
/// dispatch). Otherwise register one waiter on the unresolved subset and
/// dispatch when it drains. Any input error — handler, chain, or argument
/// — is forwarded to every result and to the out-chain. The out-chain
/// resolves only after the op's own chain does.
pub fn execute_op_seq(
    exec_ctx: &ExecutionContext,
    op_handler_value: &Arc<AsyncValue>,
    in_chain: &AsyncValueRef<Chain>,
    args: &[Arc<AsyncValue>],
    attrs: &OpAttrs,
    op_name: &str,
    num_results: usize,
) -> (AsyncValueRef<Chain>, Vec<Arc<AsyncValue>>) {
    let results = allocate_indirect_results(num_results);
    let out_chain = AsyncValueRef::<Chain>::indirect();

    let mut pending: SmallVec<[Arc<AsyncValue>; 4]> = SmallVec::new();
    if !op_handler_value.is_available() {
        pending.push(op_handler_value.clone());
    }
    for arg in args {
        if !arg.is_available() {
            pending.push(arg.clone());
        }
    }

    if pending.is_empty() {
        run_op_seq(
            exec_ctx,
            op_handler_value,
            in_chain,
            args,
            attrs,
            op_name,
            &results,
            &out_chain,
        );
        return (out_chain, results);
    }

    debug!(op = op_name, waiting = pending.len(), "deferring sequenced dispatch");
    let ctx = exec_ctx.clone();
    let op_handler_value = op_handler_value.clone();
    let in_chain = in_chain.clone();
    let args: Vec<Arc<AsyncValue>> = args.to_vec();
    let attrs = attrs.clone();
    let op_name = op_name.to_string();
    let results_for_waiter = results.clone();
    let out_chain_for_waiter = out_chain.clone();
    when_all(&pending, move || {
        run_op_seq(
            &ctx,
            &op_handler_value,
            &in_chain,
            &args,
            &attrs,
            &op_name,
            &results_for_waiter,
            &out_chain_for_waiter,
        );
    });
    (out_chain, results)
}

#[allow(clippy::too_many_arguments)]
fn run_op_seq(
    exec_ctx: &ExecutionContext,
    op_handler_value: &Arc<AsyncValue>,
    in_chain: &AsyncValueRef<Chain>,
    args: &[Arc<AsyncValue>],
    attrs: &OpAttrs,
    op_name: &str,
    results: &[Arc<AsyncValue>],
    out_chain: &AsyncValueRef<Chain>,
) {
    let propagate = |error_value: Arc<AsyncValue>| {
        for result in results {
            poison(result, &error_value);
        }
        out_chain.value().clone().forward_to(error_value);
    };

    if op_handler_value.is_error() {
        return propagate(op_handler_value.clone());
    }
    if in_chain.is_error() {
        return propagate(in_chain.value().clone());
    }
    for arg in args {
        if arg.is_error() {
            return propagate(arg.clone());
        }
    }

    let handler_ref = op_handler_value.get::<Arc<dyn OpHandler>>();
    match exec_ctx.host().core_runtime().make_op(op_name, handler_ref) {
        Ok(op) => {
            let done = execute_op_impl(exec_ctx, &op, args, Some(in_chain), attrs, results);
            out_chain.forward(done);
        }
        Err(error) => propagate(exec_ctx.emit_error(error)),
    }
}

/// Synchronous op execution: never suspends, fails by returning.
///
/// The dispatched op must complete synchronously; an op that leaves a
/// result unresolved is reported as an error.
pub fn execute_op_sync(
    exec_ctx: &ExecutionContext,
    op_handler: &Arc<dyn OpHandler>,
    args: &[TensorHandle],
    attrs: &OpAttrs,
    op_name: &str,
    num_results: usize,
) -> Result<Vec<TensorHandle>, RuntimeError> {
    let op = exec_ctx.host().core_runtime().make_op(op_name, op_handler)?;
    let OpKind::Native(dispatch) = &op.kind else {
        return Err(RuntimeError::Message(format!(
            "op '{}' cannot be dispatched synchronously",
            op.name()
        )));
    };
    exec_ctx.trace_dispatch(op.name());
    let output = dispatch(exec_ctx, args, attrs, num_results);

    let mut handles = Vec::with_capacity(output.results.len());
    for value in &output.results {
        if value.is_error() {
            return Err(RuntimeError::Message(value.get_error().to_string()));
        }
        if !value.is_concrete() {
            return Err(RuntimeError::Message(format!(
                "op '{}' did not complete synchronously",
                op.name()
            )));
        }
        handles.push(value.get::<TensorHandle>().clone());
    }
    if output.chain.is_error() {
        return Err(RuntimeError::Message(output.chain.get_error().to_string()));
    }
    Ok(handles)
}

// ---------------------------------------------------------------------------
// Control flow.

/// Conditional dispatch: invokes `true_fn` or `false_fn` with `args[1..]`
/// once the predicate tensor handle (`args[0]`) resolves.
///
/// Non-strict: safe to invoke before any argument is ready. Results must
/// be indirect cells; each is forwarded to the chosen branch's matching
/// result, or to the error that interrupted predicate evaluation.
pub fn cond(
    exec_ctx: &ExecutionContext,
    args: &[Arc<AsyncValue>],
    true_fn: &Arc<dyn Function>,
    false_fn: &Arc<dyn Function>,
    results: &[Arc<AsyncValue>],
) {
    assert!(!args.is_empty(), "cond requires a predicate argument");
    assert_eq!(
        true_fn.num_arguments(),
        args.len() - 1,
        "argument count mismatch"
    );
    assert_eq!(
        true_fn.num_arguments(),
        false_fn.num_arguments(),
        "true and false functions must agree on arguments"
    );
    assert_eq!(true_fn.num_results(), results.len(), "result count mismatch");
    assert_eq!(
        false_fn.num_results(),
        results.len(),
        "result count mismatch"
    );

    let ctx = exec_ctx.clone();
    let args: Vec<Arc<AsyncValue>> = args.to_vec();
    let results: Vec<Arc<AsyncValue>> = results.to_vec();
    let true_fn = true_fn.clone();
    let false_fn = false_fn.clone();

    let predicate = args[0].clone();
    let predicate_observed = predicate.clone();
    predicate.and_then(move || {
        if return_after_handling_error(&predicate_observed, &results) {
            return;
        }
        let th = predicate_observed.get::<TensorHandle>().clone();
        // The predicate is read from the host-device view of the tensor.
        let tensor = th.async_tensor().clone();
        let tensor_observed = tensor.clone();
        tensor.and_then(move || {
            if return_after_handling_error(tensor_observed.value(), &results) {
                return;
            }
            match tensor_predicate(tensor_observed.get()) {
                Err(error) => {
                    let error_value = ctx.emit_error(error);
                    for result in &results {
                        poison(result, &error_value);
                    }
                }
                Ok(taken) => {
                    let branch = if taken { &true_fn } else { &false_fn };
                    trace!(predicate = taken, branch = branch.name(), "cond resolved");
                    let produced = branch.execute(&ctx, &args[1..]);
                    for (result, value) in results.iter().zip(produced) {
                        result.clone().forward_to(value);
                    }
                }
            }
        });
    });
}

/// While loop: `results = args; while cond_fn(results) { results = body_fn(results) }`.
///
/// `cond_fn` returns `(chain, predicate_th)`; the predicate handle must
/// live on a CPU device. Each iteration checks cancellation first; once
/// cancellation is observed every result is forwarded to the cancel value.
/// Results must be indirect cells.
pub fn while_loop(
    exec_ctx: &ExecutionContext,
    args: &[Arc<AsyncValue>],
    cond_fn: &Arc<dyn Function>,
    body_fn: &Arc<dyn Function>,
    results: &[Arc<AsyncValue>],
) {
    assert!(!args.is_empty(), "while requires loop-carried arguments");
    assert_eq!(
        body_fn.num_arguments(),
        body_fn.num_results(),
        "body argument and result types must match"
    );
    assert_eq!(
        body_fn.num_arguments(),
        cond_fn.num_arguments(),
        "body and cond argument types must line up"
    );
    assert_eq!(body_fn.num_arguments(), args.len(), "argument count mismatch");
    assert_eq!(results.len(), args.len(), "result count mismatch");

    while_iteration(
        exec_ctx.clone(),
        cond_fn.clone(),
        body_fn.clone(),
        args.to_vec(),
        results.to_vec(),
    );
}

/// Runs the condition and at most one body invocation, then tail-calls
/// itself through the work queue.
fn while_iteration(
    ctx: ExecutionContext,
    cond_fn: Arc<dyn Function>,
    body_fn: Arc<dyn Function>,
    args: Vec<Arc<AsyncValue>>,
    results: Vec<Arc<AsyncValue>>,
) {
    if let Some(cancel) = ctx.cancel_async_value() {
        debug!("while loop observed cancellation");
        let cancel = cancel.clone();
        for result in &results {
            poison(result, &cancel);
        }
        return;
    }

    let cond_out = cond_fn.execute(&ctx, &args);
    debug_assert_eq!(cond_out.len(), 2, "cond function must return (chain, predicate)");

    let deps = cond_out.clone();
    when_all(&deps, move || {
        let chain = &cond_out[0];
        let predicate_th = &cond_out[1];
        if chain.is_error() {
            for result in &results {
                poison(result, chain);
            }
            return;
        }
        if return_after_handling_error(predicate_th, &results) {
            return;
        }

        let th = predicate_th.get::<TensorHandle>().clone();
        if !th.device().is_cpu() {
            let error_value = ctx.emit_error(RuntimeError::NonCpuCondition);
            for result in &results {
                poison(result, &error_value);
            }
            return;
        }

        let tensor = th.async_tensor().clone();
        let tensor_observed = tensor.clone();
        tensor.and_then(move || {
            if return_after_handling_error(tensor_observed.value(), &results) {
                return;
            }
            match tensor_predicate(tensor_observed.get()) {
                Err(error) => {
                    let error_value = ctx.emit_error(error);
                    for result in &results {
                        poison(result, &error_value);
                    }
                }
                Ok(false) => {
                    trace!("while loop finished");
                    for (result, arg) in results.iter().zip(&args) {
                        result.clone().forward_to(arg.clone());
                    }
                }
                Ok(true) => {
                    let next_args = body_fn.execute(&ctx, &args);
                    let host = ctx.host().clone();
                    host.enqueue_work(move || {
                        while_iteration(ctx, cond_fn, body_fn, next_args, results);
                    });
                }
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_value::ready_chain;
    use crate::context::HostContext;
    use crate::corert::OpDispatchOutput;
    use crate::tensor::TensorMetadata;
    use flowrt_ir::DType;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(HostContext::with_threads(2))
    }

    /// Handler with one op, `test.double`, doubling a scalar i32.
    struct DoubleHandler;

    impl OpHandler for DoubleHandler {
        fn name(&self) -> &str {
            "double"
        }

        fn make_op(&self, op_name: &str) -> Result<CoreRuntimeOp, RuntimeError> {
            if op_name != "test.double" {
                return Err(RuntimeError::OpNotFound(op_name.to_string()));
            }
            Ok(CoreRuntimeOp::native("test.double", |ctx, args, _attrs, n| {
                assert_eq!(n, 1);
                let input = args[0].async_tensor().get().as_dense().unwrap().clone();
                let doubled = input.element::<i32>(0).unwrap() * 2;
                let th = create_dense_tensor(ctx, &[], &[doubled]).unwrap();
                OpDispatchOutput {
                    chain: ready_chain(),
                    results: vec![AsyncValue::concrete(th)],
                }
            }))
        }
    }

    fn scalar_handle(ctx: &ExecutionContext, value: i32) -> TensorHandle {
        create_dense_tensor(ctx, &[], &[value]).unwrap()
    }

    fn read_scalar(th: &TensorHandle) -> i32 {
        th.async_tensor()
            .get()
            .as_dense()
            .unwrap()
            .element::<i32>(0)
            .unwrap()
    }

    #[test]
    fn const_dense_tensor_materializes() {
        let ctx = ctx();
        let attr = DenseAttr::new(DType::I32, vec![1], vec![7, 0, 0, 0]).unwrap();
        let th = const_dense_tensor(&ctx, &attr).unwrap();
        assert!(th.is_metadata_available());
        assert_eq!(th.metadata().unwrap().dtype, DType::I32);
        assert_eq!(
            th.async_tensor().get().as_dense().unwrap().element::<i32>(0),
            Some(7)
        );
    }

    #[test]
    fn const_string_tensor_broadcasts() {
        let ctx = ctx();
        let th = const_string_tensor(&ctx, &[2], &["a".to_string()]).unwrap();
        match th.async_tensor().get() {
            HostTensor::Str(t) => assert_eq!(t.strings(), &["a".to_string(), "a".to_string()]),
            HostTensor::Dense(_) => panic!("expected string tensor"),
        }
    }

    #[test]
    fn shape_kernel_fast_path() {
        let ctx = ctx();
        let th = scalar_handle(&ctx, 3);
        let shape = tensorhandle_to_shape(&th);
        assert!(shape.is_concrete());
        assert_eq!(shape.get::<TensorShape>().rank(), 0);
    }

    #[test]
    fn shape_kernel_async_path() {
        let md_ref = AsyncValueRef::<TensorMetadata>::unavailable();
        let ctx = ctx();
        let tensor = scalar_handle(&ctx, 1).async_tensor().clone();
        let th = TensorHandle::new_with_async_metadata(
            ctx.host().host_device().clone(),
            md_ref.clone(),
            tensor,
        );
        let shape = tensorhandle_to_shape(&th);
        assert!(!shape.is_available());
        md_ref.emplace(TensorMetadata::new(DType::I32, TensorShape::new(vec![4])));
        assert!(shape.is_concrete());
        assert_eq!(shape.get::<TensorShape>().dims(), &[4]);
    }

    #[test]
    fn handler_registry_kernels() {
        let ctx = ctx();
        register_op_handler_sync(&ctx, "double", Arc::new(DoubleHandler));
        assert!(get_op_handler_sync(&ctx, "double").is_ok());
        let err = get_op_handler_sync(&ctx, "missing").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn execute_op_fills_results() {
        let ctx = ctx();
        let handler: Arc<dyn OpHandler> = Arc::new(DoubleHandler);
        let args = vec![AsyncValue::concrete(scalar_handle(&ctx, 21))];
        let results = allocate_indirect_results(1);
        let handler_param = KernelErrorHandler::new(&ctx, &results);
        execute_op(
            &ctx,
            &handler,
            &args,
            &OpAttrs::new(),
            "test.double",
            &results,
            &handler_param,
        );
        ctx.host().await_value(&results[0]);
        assert_eq!(read_scalar(results[0].get::<TensorHandle>()), 42);
    }

    #[test]
    fn execute_op_reports_missing_op() {
        let ctx = ctx();
        let handler: Arc<dyn OpHandler> = Arc::new(DoubleHandler);
        let results = allocate_indirect_results(1);
        let handler_param = KernelErrorHandler::new(&ctx, &results);
        execute_op(
            &ctx,
            &handler,
            &[],
            &OpAttrs::new(),
            "test.absent",
            &results,
            &handler_param,
        );
        assert!(results[0].is_error());
    }

    #[test]
    fn execute_op_sync_returns_handles() {
        let ctx = ctx();
        let handler: Arc<dyn OpHandler> = Arc::new(DoubleHandler);
        let out = execute_op_sync(
            &ctx,
            &handler,
            &[scalar_handle(&ctx, 5)],
            &OpAttrs::new(),
            "test.double",
            1,
        )
        .unwrap();
        assert_eq!(read_scalar(&out[0]), 10);
    }

    #[test]
    fn transfer_unknown_device_fails() {
        let ctx = ctx();
        let th = scalar_handle(&ctx, 1);
        let err = transfer(&ctx, &th, "tpu0", "dense").unwrap_err();
        assert!(err.to_string().contains("tpu0"));
    }

    #[test]
    fn op_attrs_kernels_chain() {
        let mut attrs = create_op_attrs();
        let _c = op_attrs_set_bool(&mut attrs, "flag", true);
        let _c = op_attrs_set_i32(&mut attrs, "axis", 3);
        let _c = op_attrs_set_string(&mut attrs, "name", "conv");
        assert_eq!(attrs.get_bool("flag"), Some(true));
        assert_eq!(attrs.get_i32("axis"), Some(3));
        assert_eq!(attrs.get_str("name"), Some("conv"));
    }
}

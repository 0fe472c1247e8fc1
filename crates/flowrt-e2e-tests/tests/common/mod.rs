//! Shared helpers for the end-to-end suites.

use std::sync::Arc;

use flowrt_host::kernels;
use flowrt_host::{
    ready_chain, AsyncValue, CoreRuntimeOp, ExecutionContext, HostContext, OpDispatchOutput,
    OpHandler, RuntimeError, TensorHandle,
};

/// A fresh execution context backed by a small worker pool.
#[allow(dead_code)]
pub fn new_ctx() -> ExecutionContext {
    ExecutionContext::new(HostContext::with_threads(4))
}

/// A scalar i32 tensor handle on the host device.
#[allow(dead_code)]
pub fn scalar_handle(ctx: &ExecutionContext, value: i32) -> TensorHandle {
    kernels::create_dense_tensor(ctx, &[], &[value]).expect("scalar allocation")
}

/// Reads a scalar i32 back out of a resolved tensor handle.
#[allow(dead_code)]
pub fn read_scalar(th: &TensorHandle) -> i32 {
    th.async_tensor()
        .get()
        .as_dense()
        .expect("dense tensor")
        .element::<i32>(0)
        .expect("i32 scalar")
}

/// An op handler that serves exactly one pre-built op.
#[allow(dead_code)]
pub struct SingleOpHandler {
    op: CoreRuntimeOp,
}

impl SingleOpHandler {
    #[allow(dead_code)]
    pub fn new(op: CoreRuntimeOp) -> Arc<Self> {
        Arc::new(Self { op })
    }
}

impl OpHandler for SingleOpHandler {
    fn name(&self) -> &str {
        "test"
    }

    fn make_op(&self, op_name: &str) -> Result<CoreRuntimeOp, RuntimeError> {
        if op_name == self.op.name() {
            Ok(self.op.clone())
        } else {
            Err(RuntimeError::OpNotFound(op_name.to_string()))
        }
    }
}

/// `test.double`: doubles a scalar i32.
#[allow(dead_code)]
pub fn double_op() -> CoreRuntimeOp {
    CoreRuntimeOp::native("test.double", |ctx, args, _attrs, num_results| {
        assert_eq!(num_results, 1);
        let doubled = read_scalar(&args[0]) * 2;
        let th = kernels::create_dense_tensor(ctx, &[], &[doubled]).expect("alloc");
        OpDispatchOutput {
            chain: ready_chain(),
            results: vec![AsyncValue::concrete(th)],
        }
    })
}

/// `test.add`: adds two scalar i32 tensors.
#[allow(dead_code)]
pub fn add_op() -> CoreRuntimeOp {
    CoreRuntimeOp::native("test.add", |ctx, args, _attrs, num_results| {
        assert_eq!(num_results, 1);
        let sum = read_scalar(&args[0]) + read_scalar(&args[1]);
        let th = kernels::create_dense_tensor(ctx, &[], &[sum]).expect("alloc");
        OpDispatchOutput {
            chain: ready_chain(),
            results: vec![AsyncValue::concrete(th)],
        }
    })
}

/// Blocks until `value` is terminal.
#[allow(dead_code)]
pub fn await_value(ctx: &ExecutionContext, value: &Arc<AsyncValue>) {
    ctx.host().await_value(value);
}

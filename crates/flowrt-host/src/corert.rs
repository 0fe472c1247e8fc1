//! Core-runtime dispatch seams.
//!
//! High-level ops are bound by name to an [`OpHandler`], which materializes
//! executable [`CoreRuntimeOp`]s. Handlers are registered on the
//! [`CoreRuntime`], which lives on the host context — there is no
//! process-wide registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::async_value::{AsyncValue, AsyncValueRef, Chain};
use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::op_attrs::OpAttrs;
use crate::tensor_handle::TensorHandle;

/// An executable function body.
///
/// The interpreter that would produce these from a compiled image is an
/// external collaborator; composite ops, conditionals, and loops only rely
/// on this interface. `execute` must return exactly `num_results` async
/// values and must not block.
pub trait Function: Send + Sync {
    /// The function's symbol name.
    fn name(&self) -> &str;

    /// Number of arguments the function expects.
    fn num_arguments(&self) -> usize;

    /// Number of results the function produces.
    fn num_results(&self) -> usize;

    /// Starts the function. Results may be unresolved async values.
    fn execute(
        &self,
        exec_ctx: &ExecutionContext,
        args: &[Arc<AsyncValue>],
    ) -> Vec<Arc<AsyncValue>>;
}

type NativeBody =
    Box<dyn Fn(&ExecutionContext, &[Arc<AsyncValue>]) -> Vec<Arc<AsyncValue>> + Send + Sync>;

/// A [`Function`] backed by a Rust closure.
pub struct NativeFunction {
    name: String,
    num_arguments: usize,
    num_results: usize,
    body: NativeBody,
}

impl NativeFunction {
    /// Wraps a closure as a function.
    pub fn new(
        name: impl Into<String>,
        num_arguments: usize,
        num_results: usize,
        body: impl Fn(&ExecutionContext, &[Arc<AsyncValue>]) -> Vec<Arc<AsyncValue>>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            num_arguments,
            num_results,
            body: Box::new(body),
        })
    }
}

impl Function for NativeFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_arguments(&self) -> usize {
        self.num_arguments
    }

    fn num_results(&self) -> usize {
        self.num_results
    }

    fn execute(
        &self,
        exec_ctx: &ExecutionContext,
        args: &[Arc<AsyncValue>],
    ) -> Vec<Arc<AsyncValue>> {
        let results = (self.body)(exec_ctx, args);
        debug_assert_eq!(results.len(), self.num_results, "function result arity");
        results
    }
}

/// What a native op dispatch produces: per-output async values plus a
/// chain that resolves once the op's side effects are visible.
pub struct OpDispatchOutput {
    /// Resolves (or errors) when the op's effects are complete.
    pub chain: AsyncValueRef<Chain>,
    /// One async value per op output, typically `TensorHandle`s.
    pub results: Vec<Arc<AsyncValue>>,
}

type DispatchFn = dyn Fn(&ExecutionContext, &[TensorHandle], &OpAttrs, usize) -> OpDispatchOutput
    + Send
    + Sync;

#[derive(Clone)]
pub(crate) enum OpKind {
    Native(Arc<DispatchFn>),
    Composite(Arc<dyn Function>),
}

/// A reference-counted executable op: either a native dispatch closure or
/// a composite wrapping a function body.
#[derive(Clone)]
pub struct CoreRuntimeOp {
    name: String,
    pub(crate) kind: OpKind,
}

impl CoreRuntimeOp {
    /// Creates a native op from a dispatch closure. The closure receives
    /// resolved argument tensor handles, the op attributes, and the output
    /// count.
    pub fn native(
        name: impl Into<String>,
        dispatch: impl Fn(&ExecutionContext, &[TensorHandle], &OpAttrs, usize) -> OpDispatchOutput
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind: OpKind::Native(Arc::new(dispatch)),
        }
    }

    /// Wraps a function body as a composite op.
    pub fn composite(body: Arc<dyn Function>) -> Self {
        Self {
            name: body.name().to_string(),
            kind: OpKind::Composite(body),
        }
    }

    /// The op's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for CoreRuntimeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            OpKind::Native(_) => "native",
            OpKind::Composite(_) => "composite",
        };
        f.debug_struct("CoreRuntimeOp")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// A named dispatcher to which high-level ops are bound.
pub trait OpHandler: Send + Sync {
    /// The handler's registered name (e.g. `"cpu"`).
    fn name(&self) -> &str;

    /// Materializes the op with the given name.
    fn make_op(&self, op_name: &str) -> Result<CoreRuntimeOp, RuntimeError>;
}

impl std::fmt::Debug for dyn OpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpHandler").field("name", &self.name()).finish()
    }
}

/// The op-handler registry, owned by the host context.
#[derive(Default)]
pub struct CoreRuntime {
    op_handlers: RwLock<HashMap<String, Arc<dyn OpHandler>>>,
}

impl CoreRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an op handler under `name`.
    pub fn register_op_handler(&self, name: impl Into<String>, handler: Arc<dyn OpHandler>) {
        self.op_handlers.write().insert(name.into(), handler);
    }

    /// Looks up a registered op handler.
    pub fn get_op_handler(&self, name: &str) -> Option<Arc<dyn OpHandler>> {
        self.op_handlers.read().get(name).cloned()
    }

    /// Materializes `op_name` on `handler`.
    pub fn make_op(
        &self,
        op_name: &str,
        handler: &Arc<dyn OpHandler>,
    ) -> Result<CoreRuntimeOp, RuntimeError> {
        handler.make_op(op_name)
    }
}

impl std::fmt::Debug for CoreRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreRuntime")
            .field("op_handlers", &self.op_handlers.read().len())
            .finish()
    }
}

/// An op handler that logs each op it materializes, then delegates to a
/// fallback handler.
pub struct LoggingOpHandler {
    fallback: Arc<dyn OpHandler>,
}

impl LoggingOpHandler {
    /// Wraps `fallback` in a logging handler.
    pub fn new(fallback: Arc<dyn OpHandler>) -> Arc<Self> {
        Arc::new(Self { fallback })
    }
}

impl OpHandler for LoggingOpHandler {
    fn name(&self) -> &str {
        "logging"
    }

    fn make_op(&self, op_name: &str) -> Result<CoreRuntimeOp, RuntimeError> {
        info!(op = op_name, fallback = self.fallback.name(), "making op");
        self.fallback.make_op(op_name)
    }
}

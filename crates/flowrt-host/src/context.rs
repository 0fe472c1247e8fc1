//! The host context and per-invocation execution context.
//!
//! [`HostContext`] owns the process-level runtime state: the work queue,
//! the device manager, and the core-runtime op-handler registry. There are
//! no process-wide globals; kernels reach everything through the
//! [`ExecutionContext`] threaded into every invocation.

use std::sync::Arc;

use tracing::{error, trace};

use crate::async_value::AsyncValue;
use crate::corert::CoreRuntime;
use crate::device::{Device, DeviceManager, DeviceType};
use crate::error::RuntimeError;

/// Process-level runtime state shared by all executions.
pub struct HostContext {
    pool: rayon::ThreadPool,
    devices: DeviceManager,
    host_device: Arc<Device>,
    runtime: CoreRuntime,
}

impl HostContext {
    /// Creates a host context with the default worker-thread count.
    pub fn new() -> Arc<Self> {
        Self::with_threads(0)
    }

    /// Creates a host context with `num_threads` workers (0 picks the
    /// default).
    pub fn with_threads(num_threads: usize) -> Arc<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("flowrt-worker-{i}"))
            .build()
            .unwrap_or_else(|e| panic!("failed to build the host work queue: {e}"));

        let devices = DeviceManager::new();
        let host_device = devices.register(Device::new("cpu", DeviceType::Cpu));
        Arc::new(Self {
            pool,
            devices,
            host_device,
            runtime: CoreRuntime::new(),
        })
    }

    /// The host CPU device.
    pub fn host_device(&self) -> &Arc<Device> {
        &self.host_device
    }

    /// The device registry.
    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    /// The core-runtime op-handler registry.
    pub fn core_runtime(&self) -> &CoreRuntime {
        &self.runtime
    }

    /// Enqueues work onto the execution engine's work queue. Kernels use
    /// this to re-enter iteration (while-loop tails) instead of recursing
    /// on the completing thread.
    pub fn enqueue_work(&self, work: impl FnOnce() + Send + 'static) {
        self.pool.spawn(work);
    }

    /// Blocks the calling thread until `value` reaches a terminal state.
    ///
    /// For embedders and tests at the runtime boundary; kernels never
    /// block.
    pub fn await_value(&self, value: &Arc<AsyncValue>) {
        if value.is_available() {
            return;
        }
        let (tx, rx) = std::sync::mpsc::channel();
        value.and_then(move || {
            let _ = tx.send(());
        });
        let _ = rx.recv();
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

/// Per-invocation context handed to every kernel: the host, plus an
/// optional cancellation value set by the embedder.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    host: Arc<HostContext>,
    cancel: Option<Arc<AsyncValue>>,
}

impl ExecutionContext {
    /// Creates a context without cancellation.
    pub fn new(host: Arc<HostContext>) -> Self {
        Self { host, cancel: None }
    }

    /// Attaches a cancellation async value. Once the value becomes
    /// available, long-running kernels forward their results to it and
    /// stop.
    pub fn with_cancel_value(mut self, cancel: Arc<AsyncValue>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The host context.
    pub fn host(&self) -> &Arc<HostContext> {
        &self.host
    }

    /// The cancel value, if cancellation has been signalled. `None` while
    /// the embedder has not resolved it (or never attached one).
    pub fn cancel_async_value(&self) -> Option<&Arc<AsyncValue>> {
        self.cancel.as_ref().filter(|v| v.is_available())
    }

    /// Reports a runtime failure: logs it and wraps it in an error async
    /// value for propagation.
    pub fn emit_error(&self, error: RuntimeError) -> Arc<AsyncValue> {
        error!(%error, "runtime error");
        AsyncValue::error(error)
    }

    /// Trace hook used by dispatch paths.
    pub(crate) fn trace_dispatch(&self, op_name: &str) {
        trace!(op = op_name, "dispatching op");
    }
}

//! Runtime error taxonomy.

/// Errors surfaced by the host runtime.
///
/// Async kernels deliver these through error async values; sync kernels
/// return them directly. There is no exception mechanism: an error reaching
/// an async value propagates transitively to every downstream result.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A tensor buffer could not be allocated.
    #[error("failed to allocate {0}")]
    AllocationFailed(&'static str),

    /// No device with the given name is registered.
    #[error("failed to find device with name: {0}")]
    DeviceNotFound(String),

    /// The named op handler is not registered with the core runtime.
    #[error("op handler '{0}' not found")]
    OpHandlerNotFound(String),

    /// The op handler does not implement the named op.
    #[error("op '{0}' not found on op handler")]
    OpNotFound(String),

    /// A predicate tensor had an element type the predicate rules do not
    /// cover.
    #[error("tensor predicate does not support type {0}")]
    UnsupportedPredicateType(String),

    /// A predicate tensor held more than one element.
    #[error("tensor predicate requires a single element, found {0}")]
    PredicateNotScalar(u64),

    /// A loop condition tensor lived on a non-CPU device.
    #[error("non-cpu device for condition tensor handle")]
    NonCpuCondition,

    /// Execution was cancelled by the embedder.
    #[error("execution cancelled")]
    Cancelled,

    /// A failure reported by an op implementation.
    #[error("{0}")]
    Message(String),
}

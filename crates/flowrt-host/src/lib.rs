#![warn(missing_docs)]
//! Asynchronous host runtime for kernel-graph programs.
//!
//! The unit of dataflow is the [`AsyncValue`]: a reference-counted
//! single-assignment future holding a typed payload or an error. Kernels
//! ([`kernels`]) receive an [`ExecutionContext`], never block, and express
//! every wait as a callback; the host's work queue re-enters long-running
//! control flow (loop tails) cooperatively.
//!
//! The executor that would drive these kernels from a compiled image is an
//! external collaborator; embedders (and the test suites) invoke kernels
//! directly against a [`HostContext`].

mod async_value;
mod context;
mod corert;
mod device;
mod error;
pub mod kernels;
mod op_attrs;
mod tensor;
mod tensor_handle;

pub use async_value::{ready_chain, when_all, AsyncValue, AsyncValueRef, Chain, Outcome};
pub use context::{ExecutionContext, HostContext};
pub use corert::{
    CoreRuntime, CoreRuntimeOp, Function, LoggingOpHandler, NativeFunction, OpDispatchOutput,
    OpHandler,
};
pub use device::{Device, DeviceManager, DeviceType};
pub use error::RuntimeError;
pub use op_attrs::{OpAttr, OpAttrs};
pub use tensor::{
    tensor_predicate, DenseElement, DenseHostTensor, HostTensor, StringHostTensor, TensorMetadata,
    TensorShape,
};
pub use tensor_handle::TensorHandle;

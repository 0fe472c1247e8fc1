#![warn(missing_docs)]
//! flowrt intermediate representation.
//!
//! A region-structured IR for host programs expressed as typed kernel
//! graphs. A [`Module`] holds a list of top-level operations (function
//! definitions and at most one compiled-module container); operations carry
//! SSA operands/results, named attributes, nested regions, and source
//! locations. The front-end that produces this IR is out of scope here;
//! [`ModuleBuilder`] offers a programmatic construction API for embedders
//! and tests.

pub mod arena;
mod attr;
mod builder;
mod display;
mod error;
mod module;
mod types;

pub use arena::{Arena, Handle, UniqueArena};
pub use attr::{Attribute, DenseAttr};
pub use builder::{BlockBuilder, FuncFlags, ModuleBuilder, OpBuilder};
pub use display::{dump_module, dump_op};
pub use error::IrError;
pub use module::{Block, Location, Module, Operation, Region, Value};
pub use types::{DType, Type};

/// Operation name of a function definition.
pub const FUNC_OP: &str = "flow.func";
/// Operation name of the region terminator.
pub const RETURN_OP: &str = "flow.return";
/// Operation name of the compiled-module container. Operations inside it are
/// not compiled directly; symbol references into it become compilation-unit
/// attributes.
pub const COMPILED_MODULE_OP: &str = "flow.compiled_module";

/// Attribute carrying a function's symbol name on a [`FUNC_OP`].
pub const FUNC_NAME_ATTR: &str = "name";
/// Unit marker attribute: the function is externally defined native code.
pub const NATIVE_ATTR: &str = "flow.native";
/// Unit marker attribute: the function executes synchronously.
pub const SYNC_ATTR: &str = "flow.sync";
/// Type-array attribute declaring a native function's input types.
pub const NATIVE_INPUTS_ATTR: &str = "inputs";
/// Type-array attribute declaring a native function's result types.
pub const NATIVE_RESULTS_ATTR: &str = "results";
/// Unit marker attribute: the operation may fire before all operands resolve.
pub const NON_STRICT_ATTR: &str = "bef.nonstrict";
/// Scheduling-cost attribute, ignored at execution time and excluded from
/// the attribute pool.
pub const COST_ATTR: &str = "_tfrt_cost";

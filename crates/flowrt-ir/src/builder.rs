//! Programmatic IR construction.
//!
//! The textual front-end is an external collaborator; embedders and tests
//! build modules through [`ModuleBuilder`]. Value ids are allocated by the
//! module builder so they stay unique across nested regions.

use crate::arena::Handle;
use crate::attr::Attribute;
use crate::module::{Block, Location, Module, Operation, Region, Value};
use crate::types::Type;
use crate::{
    FUNC_NAME_ATTR, FUNC_OP, NATIVE_ATTR, NATIVE_INPUTS_ATTR, NATIVE_RESULTS_ATTR, RETURN_OP,
    SYNC_ATTR,
};

/// Marker flags for a function definition.
#[derive(Clone, Copy, Debug, Default)]
pub struct FuncFlags {
    /// Externally-defined native function (no body).
    pub native: bool,
    /// Synchronous function.
    pub sync: bool,
}

impl FuncFlags {
    /// Flags for an asynchronous function with a body.
    pub fn async_fn() -> Self {
        Self::default()
    }

    /// Flags for a synchronous function.
    pub fn sync_fn() -> Self {
        Self {
            sync: true,
            ..Self::default()
        }
    }

    /// Flags for a native (externally-defined) function.
    pub fn native_fn() -> Self {
        Self {
            native: true,
            ..Self::default()
        }
    }
}

/// Builds a [`Module`]: allocates SSA values, interns types, and collects
/// top-level operations.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
    next_value: u32,
}

impl ModuleBuilder {
    /// Creates an empty module builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh SSA value id.
    pub fn new_value(&mut self) -> Value {
        let v = Value(self.next_value);
        self.next_value += 1;
        v
    }

    /// Interns a type by its textual form.
    pub fn intern_type(&mut self, text: &str) -> Handle<Type> {
        self.module.types.insert(Type::new(text))
    }

    /// Adds a function definition with the given body region.
    ///
    /// Native functions should pass an empty region; their signature is
    /// taken from `inputs`/`results`. For non-native functions the block's
    /// arguments are the signature inputs and the terminator's operands are
    /// the signature results; `inputs`/`results` here only declare the
    /// signature of native functions.
    pub fn add_func(&mut self, name: &str, flags: FuncFlags, region: Region) {
        self.add_func_at(name, flags, region, Location::default(), &[], &[]);
    }

    /// [`ModuleBuilder::add_func`] with an explicit location and, for
    /// native functions, a declared signature.
    pub fn add_func_at(
        &mut self,
        name: &str,
        flags: FuncFlags,
        region: Region,
        location: Location,
        native_inputs: &[Handle<Type>],
        native_results: &[Handle<Type>],
    ) {
        let mut op = Operation::new(FUNC_OP);
        op.location = location;
        op.attributes
            .push((FUNC_NAME_ATTR.into(), Attribute::String(name.into())));
        if flags.native {
            // Native functions have no body; their signature is declared
            // through type-array attributes.
            op.attributes.push((NATIVE_ATTR.into(), Attribute::Unit));
            let type_array = |types: &[Handle<Type>], module: &Module| {
                Attribute::Array(
                    types
                        .iter()
                        .map(|&h| Attribute::Type(module.type_text(h).to_string()))
                        .collect(),
                )
            };
            op.attributes.push((
                NATIVE_INPUTS_ATTR.into(),
                type_array(native_inputs, &self.module),
            ));
            op.attributes.push((
                NATIVE_RESULTS_ATTR.into(),
                type_array(native_results, &self.module),
            ));
        } else {
            if flags.sync {
                op.attributes.push((SYNC_ATTR.into(), Attribute::Unit));
            }
            op.regions.push(region);
        }
        self.module.ops.push(op);
    }

    /// Adds an arbitrary top-level operation (e.g. a compiled-module
    /// container).
    pub fn add_top_level(&mut self, op: Operation) {
        self.module.ops.push(op);
    }

    /// Finishes the build and returns the module.
    pub fn finish(self) -> Module {
        self.module
    }
}

/// Fluent construction of a single [`Operation`].
#[derive(Debug)]
pub struct OpBuilder {
    op: Operation,
}

impl OpBuilder {
    /// Starts an operation with the given kernel name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            op: Operation::new(name),
        }
    }

    /// Appends an operand.
    pub fn operand(mut self, value: Value) -> Self {
        self.op.operands.push(value);
        self
    }

    /// Appends several operands.
    pub fn operands(mut self, values: &[Value]) -> Self {
        self.op.operands.extend_from_slice(values);
        self
    }

    /// Appends a named attribute.
    pub fn attr(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.op.attributes.push((name.into(), value));
        self
    }

    /// Appends a nested region.
    pub fn region(mut self, region: Region) -> Self {
        self.op.regions.push(region);
        self
    }

    /// Sets the source location.
    pub fn location(mut self, location: Location) -> Self {
        self.op.location = location;
        self
    }

    /// Sets the debug name.
    pub fn debug_name(mut self, name: impl Into<String>) -> Self {
        self.op.debug_name = Some(name.into());
        self
    }

    /// Returns the finished operation (without results; result values are
    /// allocated when the op is emitted into a block).
    pub fn build(self) -> Operation {
        self.op
    }
}

/// Builds a single-block region operation by operation.
#[derive(Debug, Default)]
pub struct BlockBuilder {
    block: Block,
}

impl BlockBuilder {
    /// Creates an empty block builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a typed block argument and returns its value.
    pub fn arg(&mut self, mb: &mut ModuleBuilder, ty: Handle<Type>) -> Value {
        let v = mb.new_value();
        self.block.args.push((v, ty));
        v
    }

    /// Emits an operation, allocating one result value per entry of
    /// `result_types`. Returns the result values.
    pub fn emit(
        &mut self,
        mb: &mut ModuleBuilder,
        op: OpBuilder,
        result_types: &[Handle<Type>],
    ) -> Vec<Value> {
        let mut op = op.build();
        let mut results = Vec::with_capacity(result_types.len());
        for &ty in result_types {
            let v = mb.new_value();
            op.results.push((v, ty));
            results.push(v);
        }
        self.block.ops.push(op);
        results
    }

    /// Emits the region terminator returning `operands`.
    pub fn ret(&mut self, operands: &[Value]) {
        let mut op = Operation::new(RETURN_OP);
        op.operands.extend_from_slice(operands);
        self.block.ops.push(op);
    }

    /// Finishes the block into a single-block region.
    pub fn into_region(self) -> Region {
        Region {
            blocks: vec![self.block],
        }
    }
}

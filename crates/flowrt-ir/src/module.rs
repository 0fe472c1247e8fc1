//! Modules, operations, regions, and SSA values.

use crate::arena::{Handle, UniqueArena};
use crate::attr::Attribute;
use crate::types::Type;

/// An SSA value id, unique within its module.
///
/// Values are defined either as block arguments or as operation results;
/// operands refer to them by id. Ids carry no scope information of their
/// own — the compiler checks region containment during its first pass.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Value(pub u32);

/// A source location: file, line, column.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct Location {
    /// Source file name; empty when unknown.
    pub filename: String,
    /// 1-based line, or 0 when unknown.
    pub line: u32,
    /// 1-based column, or 0 when unknown.
    pub col: u32,
}

impl Location {
    /// Creates a location.
    pub fn new(filename: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            filename: filename.into(),
            line,
            col,
        }
    }
}

/// A single operation: a named kernel invocation with SSA operands and
/// results, named attributes, and optional nested regions.
#[derive(Clone, Debug)]
pub struct Operation {
    /// The kernel/opcode name, e.g. `"corert.executeop"`.
    pub name: String,
    /// Operand value ids, in order.
    pub operands: Vec<Value>,
    /// Result values with their types, in order.
    pub results: Vec<(Value, Handle<Type>)>,
    /// Named attributes in insertion order.
    pub attributes: Vec<(String, Attribute)>,
    /// Nested regions. A region on a non-function operation is compiled as
    /// an anonymous function.
    pub regions: Vec<Region>,
    /// Source location.
    pub location: Location,
    /// Optional debug name, emitted to the debug-info section.
    pub debug_name: Option<String>,
}

impl Operation {
    /// Creates an operation with no operands, results, attributes, or
    /// regions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operands: Vec::new(),
            results: Vec::new(),
            attributes: Vec::new(),
            regions: Vec::new(),
            location: Location::default(),
            debug_name: None,
        }
    }

    /// Looks up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a)
    }

    /// Returns `true` if the named unit-marker attribute is present.
    pub fn has_marker(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }
}

/// A region: a list of blocks. Only single-block regions can be compiled.
#[derive(Clone, Debug, Default)]
pub struct Region {
    /// The blocks of this region.
    pub blocks: Vec<Block>,
}

impl Region {
    /// Returns the single block of this region, if it has exactly one.
    pub fn single_block(&self) -> Option<&Block> {
        match self.blocks.as_slice() {
            [block] => Some(block),
            _ => None,
        }
    }
}

/// A basic block: typed arguments and a list of operations.
#[derive(Clone, Debug, Default)]
pub struct Block {
    /// Block arguments with their types.
    pub args: Vec<(Value, Handle<Type>)>,
    /// Operations in program order.
    pub ops: Vec<Operation>,
}

/// A compiled unit of IR: an interned type pool plus top-level operations
/// (function definitions and at most one compiled-module container).
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// Interned type descriptors referenced by the operations.
    pub types: UniqueArena<Type>,
    /// Top-level operations.
    pub ops: Vec<Operation>,
}

impl Module {
    /// Returns the textual form of a type handle.
    pub fn type_text(&self, handle: Handle<Type>) -> &str {
        self.types[handle].text()
    }
}

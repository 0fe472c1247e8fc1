#![warn(missing_docs)]
//! Compiler from flowrt IR to the Binary Executable Format (BEF).
//!
//! BEF is a compact, aligned, position-independent image of a kernel-graph
//! program, consumed by an executor at runtime. The compiler runs three
//! passes over a module:
//!
//! 1. **Collect** ([`entities`]): one pre-order walk interns strings,
//!    types, attributes, kernel names, functions, and locations, and
//!    enforces IR well-formedness.
//! 2. **Emit entities** ([`attrs`], string/type/kernel sections): encodes
//!    the pools and records every entity's byte offset in the
//!    [`index::EntityIndex`].
//! 3. **Emit functions** ([`functions`]): per-function register tables and
//!    aligned kernel records with precomputed use lists; stream ids come
//!    from `flowrt-analysis`.
//!
//! The function index references function offsets that are only known
//! after the bodies are emitted, yet it precedes them in the file; both
//! sections are buffered and written index-first.

mod attrs;
pub mod emitter;
pub mod encoding;
mod entities;
mod functions;
mod index;
pub mod layout;

use tracing::debug;

use flowrt_ir::Module;

use emitter::Emitter;
use encoding::{SectionId, BEF_MAGIC_1, BEF_MAGIC_2, BEF_VERSION_0};
use entities::EntityTable;
use functions::FunctionEmitter;
use index::EntityIndex;

pub use encoding::FunctionKind;

/// Options controlling compilation.
#[derive(Clone, Copy, Debug, Default)]
pub struct BefOptions {
    /// Skip the attribute-types, attribute-names, and register-types
    /// sections. Executors do not need them; debuggers do.
    pub disable_optional_sections: bool,
}

/// Fatal conditions detected while compiling a module.
///
/// The compiler stops at the first fatal condition; no partial image is
/// produced.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// A terminator appeared before the end of its block.
    #[error("return op must be at the end of its block")]
    ReturnNotAtEnd,

    /// An operand referenced a value defined in an enclosing region.
    #[error("op '{op}': references to outer regions not supported")]
    CrossRegionReference {
        /// The operation with the offending operand.
        op: String,
    },

    /// A function region had more than one block.
    #[error("function '{name}': multi-block regions cannot be compiled")]
    MultiBlockRegion {
        /// The function's symbol name (empty for anonymous regions).
        name: String,
    },

    /// A non-native function had no body.
    #[error("function '{name}' has no body; only native functions may be externally defined")]
    ExternalFunction {
        /// The function's symbol name.
        name: String,
    },

    /// A function body did not end with the return terminator.
    #[error("function '{name}' must end with flow.return")]
    MissingTerminator {
        /// The function's symbol name (empty for anonymous regions).
        name: String,
    },

    /// A sync function returned one of its own arguments.
    #[error("return value {index} is an argument in a sync function '{func}'")]
    SyncReturnsArgument {
        /// The function's symbol name.
        func: String,
        /// Position of the offending return operand.
        index: usize,
    },

    /// A sync function returned the same value twice.
    #[error("return value {index} is duplicated in a sync function '{func}'")]
    SyncReturnsDuplicate {
        /// The function's symbol name.
        func: String,
        /// Position of the offending return operand.
        index: usize,
    },

    /// An attribute cannot be encoded into the attribute pool.
    #[error("cannot encode the '{attr}' attribute on '{op}'")]
    UnsupportedAttribute {
        /// The operation carrying the attribute.
        op: String,
        /// The attribute name (or offending payload).
        attr: String,
    },

    /// A symbol reference did not resolve to a function.
    #[error("function {name} not defined")]
    FunctionNotDefined {
        /// The unresolved symbol.
        name: String,
    },

    /// A function definition without a name attribute.
    #[error("function definition is missing a name")]
    MissingFunctionName,

    /// Two functions shared a symbol name.
    #[error("function '{name}' is defined twice")]
    FunctionRedefined {
        /// The duplicated symbol name.
        name: String,
    },
}

/// Compiles a module into a BEF image.
///
/// The output is a deterministic function of the module: compiling the
/// same IR twice yields byte-identical images.
pub fn compile(module: &Module, options: &BefOptions) -> Result<Vec<u8>, CompileError> {
    let collect_optional = !options.disable_optional_sections;
    let entities = EntityTable::collect(module, collect_optional)?;
    let mut index = EntityIndex::default();

    let mut file = Emitter::new();
    file.emit_bytes(&[BEF_MAGIC_1, BEF_MAGIC_2, BEF_VERSION_0]);

    // Location file names, NUL-separated.
    let mut filenames = Emitter::new();
    for name in entities.location_filenames.iter() {
        filenames.emit_bytes(name.as_bytes());
        filenames.emit_byte(0);
    }
    file.emit_section(SectionId::LocationFilenames, &filenames);

    // Location positions; offsets recorded per op.
    let mut positions = Emitter::new();
    for (&op_id, &(filename, line, col)) in entities.location_positions.iter() {
        index.add_location_offset(op_id, positions.len() as u32);
        positions.emit_vbr(u64::from(filename));
        positions.emit_vbr(u64::from(line));
        positions.emit_vbr(u64::from(col));
    }
    file.emit_section(SectionId::LocationPositions, &positions);

    // Debug names, NUL-terminated.
    let mut debug_section = Emitter::new();
    for (&op_id, name) in entities.debug_info.iter() {
        index.add_debug_offset(op_id, debug_section.len() as u32);
        debug_section.emit_bytes(name.as_bytes());
        debug_section.emit_byte(0);
    }
    file.emit_section(SectionId::DebugInfo, &debug_section);

    // Strings, sorted lexicographically, NUL-terminated.
    let mut strings = Emitter::new();
    for s in &entities.strings {
        index.add_string(s, strings.len() as u32);
        strings.emit_bytes(s.as_bytes());
        strings.emit_byte(0);
    }
    file.emit_section(SectionId::Strings, &strings);

    // Attributes (+ optional sidecar).
    let mut attribute_types = collect_optional.then(Emitter::new);
    let (attr_section, attr_offsets) =
        attrs::emit_attributes(module, &entities, attribute_types.as_mut())?;
    index.set_attribute_offsets(attr_offsets);
    file.emit_section(SectionId::Attributes, &attr_section);

    // Kernel names, as string offsets.
    let mut kernels = Emitter::new();
    kernels.emit_vbr(entities.kernels.len() as u64);
    for name in entities.kernels.iter() {
        kernels.emit_vbr(u64::from(index.string_offset(name)));
    }
    file.emit_section(SectionId::Kernels, &kernels);

    // Types, as string offsets.
    let mut types = Emitter::new();
    types.emit_vbr(entities.types.len() as u64);
    for text in entities.types.iter() {
        types.emit_vbr(u64::from(index.string_offset(text)));
    }
    file.emit_section(SectionId::Types, &types);

    // Function bodies are buffered so the index can precede them in the
    // file even though it records their offsets.
    let mut functions_section = Emitter::new();
    let mut attribute_names = collect_optional.then(Emitter::new);
    let mut register_types = collect_optional.then(Emitter::new);
    if let Some(names) = attribute_names.as_mut() {
        names.emit_vbr(entities.functions.len() as u64);
    }
    if let Some(regs) = register_types.as_mut() {
        regs.emit_vbr(entities.functions.len() as u64);
    }

    let mut function_offsets = Vec::with_capacity(entities.functions.len());
    let mut function_emitter = FunctionEmitter::new(&entities, &index);
    for entry in &entities.functions {
        function_offsets.push(functions_section.len() as u32);
        if let Some(body) = &entry.body {
            function_emitter.emit_function(
                body,
                &mut functions_section,
                attribute_names.as_mut(),
                register_types.as_mut(),
            )?;
        }
    }

    let mut function_index = Emitter::new();
    function_index.emit_vbr(entities.functions.len() as u64);
    for (entry, &offset) in entities.functions.iter().zip(&function_offsets) {
        function_index.emit_byte(entry.kind as u8);
        function_index.emit_vbr(u64::from(offset));
        function_index.emit_vbr(u64::from(index.string_offset(&entry.name)));
        function_index.emit_vbr(entry.inputs.len() as u64);
        for &ty in &entry.inputs {
            function_index.emit_vbr(u64::from(ty));
        }
        function_index.emit_vbr(entry.results.len() as u64);
        for &ty in &entry.results {
            function_index.emit_vbr(u64::from(ty));
        }
    }
    file.emit_section(SectionId::FunctionIndex, &function_index);
    file.emit_section(SectionId::Functions, &functions_section);

    if let Some(section) = &attribute_types {
        file.emit_section(SectionId::AttributeTypes, section);
    }
    if let Some(section) = &attribute_names {
        file.emit_section(SectionId::AttributeNames, section);
    }
    if let Some(section) = &register_types {
        file.emit_section(SectionId::RegisterTypes, section);
    }

    debug!(bytes = file.len(), "module compiled");
    Ok(file.into_bytes())
}

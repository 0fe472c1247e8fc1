//! Pass 2, attribute section: encodes the pooled attributes.
//!
//! Every pooled attribute is encoded once and its byte offset recorded.
//! Aggregates emit their leaves first and finish with a `(count, offsets)`
//! table, so a reader can index children without backpatching. Dense
//! payloads are aligned to their element size relative to the section
//! start; the section framing preserves that alignment in the file.

use flowrt_ir::{dump_op, Attribute, DType, Module, COMPILED_MODULE_OP};

use crate::emitter::Emitter;
use crate::encoding::AttrTypeTag;
use crate::entities::EntityTable;
use crate::CompileError;

/// The sidecar tag describing an attribute's encoding.
pub(crate) fn attribute_tag(attr: &Attribute) -> AttrTypeTag {
    match attr {
        Attribute::Unit => AttrTypeTag::Unit,
        Attribute::Bool(_) => AttrTypeTag::Bool,
        Attribute::I8(_) => AttrTypeTag::I8,
        Attribute::I32(_) => AttrTypeTag::I32,
        Attribute::I64(_) => AttrTypeTag::I64,
        Attribute::F32(_) => AttrTypeTag::F32,
        Attribute::F64(_) => AttrTypeTag::F64,
        Attribute::String(_) => AttrTypeTag::String,
        Attribute::Type(_) => AttrTypeTag::Type,
        Attribute::Shape(_) => AttrTypeTag::Shape,
        Attribute::Dense(_) => AttrTypeTag::Dense,
        Attribute::Array(_) => AttrTypeTag::Array,
        Attribute::Aggregate(_) => AttrTypeTag::Aggregate,
        Attribute::SymbolRef(_) => AttrTypeTag::CompilationUnit,
    }
}

/// Encodes the attribute pool. Returns the section emitter and the offset
/// of each pooled attribute, in pool order. When `attribute_types` is
/// given, the `(offset, tag)` sidecar body is appended to it.
pub(crate) fn emit_attributes(
    module: &Module,
    entities: &EntityTable<'_>,
    attribute_types: Option<&mut Emitter>,
) -> Result<(Emitter, Vec<u32>), CompileError> {
    let mut section = Emitter::new();
    let mut offsets = Vec::with_capacity(entities.attributes.len());
    let mut sidecar = Emitter::new();

    for attr in entities.attributes.iter() {
        let offset = emit_attribute(&mut section, module, attr)?;
        offsets.push(offset);
        sidecar.emit_vbr(u64::from(offset));
        sidecar.emit_vbr(attribute_tag(attr) as u64);
    }

    if let Some(types_section) = attribute_types {
        types_section.emit_vbr(entities.attributes.len() as u64);
        types_section.emit_emitter(&sidecar);
    }
    Ok((section, offsets))
}

/// Encodes one attribute, returning its offset within the section.
fn emit_attribute(
    section: &mut Emitter,
    module: &Module,
    attr: &Attribute,
) -> Result<u32, CompileError> {
    let offset = match attr {
        Attribute::Unit => section.len(),
        Attribute::Bool(v) => {
            let offset = section.len();
            section.emit_byte(u8::from(*v));
            offset
        }
        Attribute::I8(v) => {
            let offset = section.len();
            section.emit_byte(*v as u8);
            offset
        }
        Attribute::I32(v) => {
            section.emit_alignment(4);
            let offset = section.len();
            section.emit_bytes(&v.to_le_bytes());
            offset
        }
        Attribute::I64(v) => {
            section.emit_alignment(8);
            let offset = section.len();
            section.emit_bytes(&v.to_le_bytes());
            offset
        }
        Attribute::F32(v) => {
            section.emit_alignment(4);
            let offset = section.len();
            section.emit_bytes(&v.to_bits().to_le_bytes());
            offset
        }
        Attribute::F64(v) => {
            section.emit_alignment(8);
            let offset = section.len();
            section.emit_bytes(&v.to_bits().to_le_bytes());
            offset
        }
        Attribute::String(s) => {
            let offset = section.len();
            section.emit_vbr(s.len() as u64);
            section.emit_bytes(s.as_bytes());
            offset
        }
        Attribute::Type(text) => {
            let dtype = DType::parse(text).ok_or_else(|| CompileError::UnsupportedAttribute {
                op: String::new(),
                attr: text.clone(),
            })?;
            let offset = section.len();
            section.emit_byte(dtype.tag());
            offset
        }
        Attribute::Shape(dims) => {
            let offset = section.len();
            section.emit_vbr(dims.len() as u64);
            for &dim in dims {
                // Two's-complement wrap keeps dynamic (-1) dimensions intact.
                section.emit_vbr(dim as u64);
            }
            offset
        }
        Attribute::Dense(dense) => {
            let offset = section.len();
            section.emit_byte(dense.dtype().tag());
            section.emit_vbr(dense.shape().len() as u64);
            for &dim in dense.shape() {
                section.emit_vbr(dim as u64);
            }
            section.emit_vbr(dense.num_elements());
            section.emit_alignment(dense.dtype().size_in_bytes().max(1));
            section.emit_bytes(dense.data());
            offset
        }
        Attribute::Array(elems) => emit_array(section, elems)?,
        Attribute::Aggregate(elems) => {
            let mut child_offsets = Vec::with_capacity(elems.len());
            for elem in elems {
                child_offsets.push(emit_attribute(section, module, elem)?);
            }
            let offset = section.len();
            section.emit_vbr(elems.len() as u64);
            for child in child_offsets {
                section.emit_vbr(u64::from(child));
            }
            offset
        }
        Attribute::SymbolRef(symbol) => emit_compilation_unit(section, module, symbol)?,
    };
    Ok(offset as u32)
}

/// A homogeneous element array: element tag, count, packed elements.
fn emit_array(section: &mut Emitter, elems: &[Attribute]) -> Result<usize, CompileError> {
    let element_tag = elems.first().map_or(AttrTypeTag::Unit, attribute_tag);
    let element_align = match elems.first() {
        Some(Attribute::I32(_)) | Some(Attribute::F32(_)) => 4,
        Some(Attribute::I64(_)) | Some(Attribute::F64(_)) => 8,
        _ => 1,
    };

    let offset = section.len();
    section.emit_byte(element_tag as u8);
    section.emit_vbr(elems.len() as u64);
    section.emit_alignment(element_align);
    for elem in elems {
        match elem {
            Attribute::Bool(v) => section.emit_byte(u8::from(*v)),
            Attribute::I8(v) => section.emit_byte(*v as u8),
            Attribute::I32(v) => section.emit_bytes(&v.to_le_bytes()),
            Attribute::I64(v) => section.emit_bytes(&v.to_le_bytes()),
            Attribute::F32(v) => section.emit_bytes(&v.to_bits().to_le_bytes()),
            Attribute::F64(v) => section.emit_bytes(&v.to_bits().to_le_bytes()),
            Attribute::String(s) => {
                section.emit_vbr(s.len() as u64);
                section.emit_bytes(s.as_bytes());
            }
            Attribute::Type(text) => {
                let dtype =
                    DType::parse(text).ok_or_else(|| CompileError::UnsupportedAttribute {
                        op: String::new(),
                        attr: text.clone(),
                    })?;
                section.emit_byte(dtype.tag());
            }
            other => {
                return Err(CompileError::UnsupportedAttribute {
                    op: String::new(),
                    attr: format!("{other:?}"),
                })
            }
        }
    }
    Ok(offset)
}

/// A symbol reference into the compiled module: the serialized module text
/// plus the NUL-terminated symbol name, both length-prefixed.
fn emit_compilation_unit(
    section: &mut Emitter,
    module: &Module,
    symbol: &str,
) -> Result<usize, CompileError> {
    let container = module
        .ops
        .iter()
        .find(|op| op.name == COMPILED_MODULE_OP)
        .ok_or_else(|| CompileError::FunctionNotDefined {
            name: symbol.to_string(),
        })?;
    let serialized = dump_op(module, container);

    let offset = section.len();
    section.emit_vbr(symbol.len() as u64);
    section.emit_vbr(serialized.len() as u64);
    section.emit_bytes(symbol.as_bytes());
    section.emit_byte(0);
    section.emit_bytes(serialized.as_bytes());
    Ok(offset)
}

//! BEF encoding constants.
//!
//! Byte-level tags shared by the emitter and the layout reader. The file
//! layout is little-endian throughout; variable-length integers are
//! big-endian 7-bit groups with a continuation bit on every group but the
//! last.

/// First magic byte of a BEF file.
pub const BEF_MAGIC_1: u8 = 0xEF;
/// Second magic byte of a BEF file.
pub const BEF_MAGIC_2: u8 = 0xAB;
/// Format version byte, third byte of the file.
pub const BEF_VERSION_0: u8 = 0xAF;

/// Opcode of the pseudo-entry kernel record.
pub const PSEUDO_KERNEL_CODE: u32 = 0xABAB_ABAB;
/// Location field of the pseudo-entry kernel record.
pub const PSEUDO_KERNEL_LOCATION: u32 = 0xCDCD_CDCD;

/// Alignment of kernel records within a function body.
pub const KERNEL_ENTRY_ALIGNMENT: usize = 4;

/// Bits OR'd into a kernel record's `special_flags` header field.
pub mod special_flags {
    /// The kernel fires as soon as any operand resolves.
    pub const NON_STRICT: u32 = 0x1;
    /// A debug-info offset trails the kernel record body.
    pub const HAS_DEBUG_INFO: u32 = 0x2;
}

/// Section identifiers, in the order sections appear in the file (debug
/// info is emitted right after the location sections).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionId {
    /// NUL-separated location file names.
    LocationFilenames = 0,
    /// Per-operation `(filename-index, line, col)` triples.
    LocationPositions = 1,
    /// Sorted NUL-terminated string pool.
    Strings = 2,
    /// Encoded attribute pool.
    Attributes = 3,
    /// Kernel name table (string offsets).
    Kernels = 4,
    /// Type table (string offsets).
    Types = 5,
    /// Function index: kind, offset, name, signature per function.
    FunctionIndex = 6,
    /// Concatenated function bodies.
    Functions = 7,
    /// Optional `(offset, type-tag)` sidecar for the attribute pool.
    AttributeTypes = 8,
    /// Optional per-kernel attribute-name string offsets.
    AttributeNames = 9,
    /// Optional per-register type indices.
    RegisterTypes = 10,
    /// NUL-terminated debug name strings.
    DebugInfo = 11,
}

impl SectionId {
    /// Decodes a section id byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::LocationFilenames,
            1 => Self::LocationPositions,
            2 => Self::Strings,
            3 => Self::Attributes,
            4 => Self::Kernels,
            5 => Self::Types,
            6 => Self::FunctionIndex,
            7 => Self::Functions,
            8 => Self::AttributeTypes,
            9 => Self::AttributeNames,
            10 => Self::RegisterTypes,
            11 => Self::DebugInfo,
            _ => return None,
        })
    }

    /// Human-readable section name.
    pub fn name(self) -> &'static str {
        match self {
            Self::LocationFilenames => "LocationFilenames",
            Self::LocationPositions => "LocationPositions",
            Self::Strings => "Strings",
            Self::Attributes => "Attributes",
            Self::Kernels => "Kernels",
            Self::Types => "Types",
            Self::FunctionIndex => "FunctionIndex",
            Self::Functions => "Functions",
            Self::AttributeTypes => "AttributeTypes",
            Self::AttributeNames => "AttributeNames",
            Self::RegisterTypes => "RegisterTypes",
            Self::DebugInfo => "DebugInfo",
        }
    }
}

/// How a function executes, recorded in the function index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionKind {
    /// An asynchronous BEF function with a body.
    Bef = 0,
    /// A synchronous BEF function with a body.
    SyncBef = 1,
    /// An externally-defined native function; no body is emitted.
    Native = 2,
}

impl FunctionKind {
    /// Decodes a function kind byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Bef,
            1 => Self::SyncBef,
            2 => Self::Native,
            _ => return None,
        })
    }
}

/// Type tags recorded in the attribute-types sidecar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AttrTypeTag {
    /// Marker attribute with no payload.
    Unit = 1,
    /// One-byte boolean.
    Bool = 2,
    /// Signed 8-bit integer.
    I8 = 3,
    /// Signed 32-bit integer.
    I32 = 4,
    /// Signed 64-bit integer.
    I64 = 5,
    /// Single-precision float.
    F32 = 6,
    /// Double-precision float.
    F64 = 7,
    /// Length-prefixed byte string.
    String = 8,
    /// Tensor element type.
    Type = 9,
    /// Tensor shape.
    Shape = 10,
    /// Dense tensor constant.
    Dense = 11,
    /// Homogeneous element array.
    Array = 12,
    /// Heterogeneous aggregate with an offsets table.
    Aggregate = 13,
    /// Serialized compilation unit plus symbol name.
    CompilationUnit = 14,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_id_round_trip() {
        for raw in 0u8..=11 {
            let id = SectionId::from_u8(raw).unwrap();
            assert_eq!(id as u8, raw);
            assert!(!id.name().is_empty());
        }
        assert!(SectionId::from_u8(12).is_none());
    }

    #[test]
    fn function_kind_round_trip() {
        assert_eq!(FunctionKind::from_u8(0), Some(FunctionKind::Bef));
        assert_eq!(FunctionKind::from_u8(1), Some(FunctionKind::SyncBef));
        assert_eq!(FunctionKind::from_u8(2), Some(FunctionKind::Native));
        assert_eq!(FunctionKind::from_u8(3), None);
    }
}

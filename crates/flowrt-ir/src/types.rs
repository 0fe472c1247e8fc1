//! Types and tensor element kinds.

use std::fmt;

/// An opaque type descriptor, identified by its textual form.
///
/// The compiler does not interpret types; it interns their text into the
/// string pool and numbers them in first-encounter order. Examples:
/// `"i32"`, `"!flow.chain"`, `"!corert.tensorhandle"`.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Type {
    text: String,
}

impl Type {
    /// Creates a type from its textual form.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Returns the textual form of this type.
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Element type of a tensor.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum DType {
    /// Boolean, one byte per element.
    Bool,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// Brain floating point, 16 bits.
    BF16,
    /// IEEE half precision.
    F16,
    /// IEEE single precision.
    F32,
    /// IEEE double precision.
    F64,
    /// Variable-length string elements.
    String,
}

impl DType {
    /// Size of one element in bytes. Strings are variably sized and report 0.
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 | Self::BF16 | Self::F16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::String => 0,
        }
    }

    /// Returns `true` for fixed-width element types.
    pub fn is_fixed_width(self) -> bool {
        !matches!(self, Self::String)
    }

    /// Parses a textual element-type name (the inverse of `Display`).
    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "bool" | "i1" => Self::Bool,
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "u8" | "ui8" => Self::U8,
            "u16" | "ui16" => Self::U16,
            "u32" | "ui32" => Self::U32,
            "u64" | "ui64" => Self::U64,
            "bf16" => Self::BF16,
            "f16" => Self::F16,
            "f32" => Self::F32,
            "f64" => Self::F64,
            "str" => Self::String,
            _ => return None,
        })
    }

    /// Stable wire tag used by the dense-attribute encoding.
    pub fn tag(self) -> u8 {
        match self {
            Self::Bool => 0,
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 => 3,
            Self::I64 => 4,
            Self::U8 => 5,
            Self::U16 => 6,
            Self::U32 => 7,
            Self::U64 => 8,
            Self::BF16 => 9,
            Self::F16 => 10,
            Self::F32 => 11,
            Self::F64 => 12,
            Self::String => 13,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::BF16 => "bf16",
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::String => "str",
        })
    }
}

//! Attribute values.
//!
//! Attributes compare by structural identity so that the compiler's
//! attribute pool can collapse duplicates to a single offset. Floats
//! therefore compare by bit pattern, not by IEEE equality.

use std::hash::{Hash, Hasher};

use crate::error::IrError;
use crate::types::DType;

/// A constant attribute value attached to an operation.
#[derive(Clone, Debug)]
pub enum Attribute {
    /// Unit marker; carries no payload.
    Unit,
    /// Boolean.
    Bool(bool),
    /// Signed 8-bit integer.
    I8(i8),
    /// Signed 32-bit integer.
    I32(i32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Single-precision float.
    F32(f32),
    /// Double-precision float.
    F64(f64),
    /// Byte string.
    String(String),
    /// A reference to a type by its textual form.
    Type(String),
    /// A tensor shape; `-1` marks a dynamic dimension.
    Shape(Vec<i64>),
    /// A dense tensor constant.
    Dense(DenseAttr),
    /// A homogeneous array of attributes.
    Array(Vec<Attribute>),
    /// A heterogeneous aggregate of attributes.
    Aggregate(Vec<Attribute>),
    /// A reference to a function symbol by name.
    SymbolRef(String),
}

impl Attribute {
    /// Returns the symbol name if this is a [`Attribute::SymbolRef`].
    pub fn as_symbol_ref(&self) -> Option<&str> {
        match self {
            Self::SymbolRef(name) => Some(name),
            _ => None,
        }
    }

    /// Returns `true` if this is an array whose elements are all symbol
    /// references (a function-array attribute).
    pub fn is_symbol_ref_array(&self) -> bool {
        match self {
            Self::Array(elems) => {
                !elems.is_empty()
                    && elems
                        .iter()
                        .all(|a| matches!(a, Attribute::SymbolRef(_)))
            }
            _ => false,
        }
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        use Attribute::*;
        match (self, other) {
            (Unit, Unit) => true,
            (Bool(a), Bool(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (F32(a), F32(b)) => a.to_bits() == b.to_bits(),
            (F64(a), F64(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (Type(a), Type(b)) => a == b,
            (Shape(a), Shape(b)) => a == b,
            (Dense(a), Dense(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Aggregate(a), Aggregate(b)) => a == b,
            (SymbolRef(a), SymbolRef(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Attribute {}

impl Hash for Attribute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use Attribute::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Unit => {}
            Bool(v) => v.hash(state),
            I8(v) => v.hash(state),
            I32(v) => v.hash(state),
            I64(v) => v.hash(state),
            F32(v) => v.to_bits().hash(state),
            F64(v) => v.to_bits().hash(state),
            String(v) | Type(v) | SymbolRef(v) => v.hash(state),
            Shape(v) => v.hash(state),
            Dense(v) => v.hash(state),
            Array(v) | Aggregate(v) => v.hash(state),
        }
    }
}

/// A dense tensor constant: element type, shape, and little-endian element
/// bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DenseAttr {
    dtype: DType,
    shape: Vec<i64>,
    data: Vec<u8>,
}

impl DenseAttr {
    /// Creates a dense attribute, validating that `data` holds exactly one
    /// element's worth of bytes per shape element.
    pub fn new(dtype: DType, shape: Vec<i64>, data: Vec<u8>) -> Result<Self, IrError> {
        if !dtype.is_fixed_width() {
            return Err(IrError::DenseElementType { dtype });
        }
        let num_elements: i64 = shape.iter().product();
        let expected = num_elements as usize * dtype.size_in_bytes();
        if shape.iter().any(|&d| d < 0) || data.len() != expected {
            return Err(IrError::DenseDataMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// The element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// The tensor shape.
    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// The raw little-endian element bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Total number of elements.
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().map(|&d| d as u64).product()
    }
}

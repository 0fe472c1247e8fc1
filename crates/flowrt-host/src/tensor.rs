//! Host tensors and metadata.
//!
//! The runtime moves tensors around as [`HostTensor`] payloads inside
//! async values. Dense tensors hold raw little-endian element bytes;
//! string tensors hold owned strings. Scalar predicate extraction for the
//! control-flow kernels lives here too.

use std::fmt;

use flowrt_ir::{DType, DenseAttr};

use crate::error::RuntimeError;

/// A tensor shape. Dimensions are non-negative at runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TensorShape(Vec<i64>);

impl TensorShape {
    /// Creates a shape from its dimensions.
    pub fn new(dims: Vec<i64>) -> Self {
        Self(dims)
    }

    /// The dimensions.
    pub fn dims(&self) -> &[i64] {
        &self.0
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total element count.
    pub fn num_elements(&self) -> u64 {
        self.0.iter().map(|&d| d.max(0) as u64).product()
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

/// Element type plus shape: everything known about a tensor before its
/// payload resolves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorMetadata {
    /// Element type.
    pub dtype: DType,
    /// Shape.
    pub shape: TensorShape,
}

impl TensorMetadata {
    /// Creates metadata.
    pub fn new(dtype: DType, shape: TensorShape) -> Self {
        Self { dtype, shape }
    }
}

impl fmt::Display for TensorMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.dtype, self.shape)
    }
}

/// A fixed-width element type storable in a [`DenseHostTensor`].
pub trait DenseElement: Copy + Send + Sync + 'static {
    /// The runtime element type.
    const DTYPE: DType;

    /// Appends this element's little-endian bytes.
    fn write_le(&self, out: &mut Vec<u8>);

    /// Reads one element from little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! dense_element {
    ($ty:ty, $dtype:expr) => {
        impl DenseElement for $ty {
            const DTYPE: DType = $dtype;

            fn write_le(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                <$ty>::from_le_bytes(buf)
            }
        }
    };
}

dense_element!(i8, DType::I8);
dense_element!(i16, DType::I16);
dense_element!(i32, DType::I32);
dense_element!(i64, DType::I64);
dense_element!(u8, DType::U8);
dense_element!(u16, DType::U16);
dense_element!(u32, DType::U32);
dense_element!(u64, DType::U64);
dense_element!(f32, DType::F32);
dense_element!(f64, DType::F64);

impl DenseElement for bool {
    const DTYPE: DType = DType::Bool;

    fn write_le(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// A dense tensor in host memory: metadata plus raw little-endian bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseHostTensor {
    metadata: TensorMetadata,
    data: Vec<u8>,
}

impl DenseHostTensor {
    /// Allocates a zero-filled tensor. Returns `None` if the byte size
    /// overflows addressable memory.
    pub fn new(metadata: TensorMetadata) -> Option<Self> {
        let size = metadata
            .shape
            .num_elements()
            .checked_mul(metadata.dtype.size_in_bytes() as u64)?;
        let size = usize::try_from(size).ok()?;
        Some(Self {
            metadata,
            data: vec![0; size],
        })
    }

    /// Builds a tensor from typed elements.
    pub fn from_values<T: DenseElement>(shape: TensorShape, values: &[T]) -> Option<Self> {
        if shape.num_elements() != values.len() as u64 {
            return None;
        }
        let mut data = Vec::with_capacity(values.len() * T::DTYPE.size_in_bytes());
        for v in values {
            v.write_le(&mut data);
        }
        Some(Self {
            metadata: TensorMetadata::new(T::DTYPE, shape),
            data,
        })
    }

    /// Builds a tensor from a dense constant attribute.
    pub fn from_attr(attr: &DenseAttr) -> Option<Self> {
        let metadata = TensorMetadata::new(attr.dtype(), TensorShape::new(attr.shape().to_vec()));
        Some(Self {
            metadata,
            data: attr.data().to_vec(),
        })
    }

    /// The tensor's metadata.
    pub fn metadata(&self) -> &TensorMetadata {
        &self.metadata
    }

    /// The raw little-endian element bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the element bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Total element count.
    pub fn num_elements(&self) -> u64 {
        self.metadata.shape.num_elements()
    }

    /// Reads element `index` as `T`; `None` on type mismatch or out of
    /// range.
    pub fn element<T: DenseElement>(&self, index: usize) -> Option<T> {
        if self.metadata.dtype != T::DTYPE {
            return None;
        }
        let width = T::DTYPE.size_in_bytes();
        let start = index.checked_mul(width)?;
        let bytes = self.data.get(start..start + width)?;
        Some(T::read_le(bytes))
    }

    /// Interprets a single-element tensor as a boolean: nonzero is true.
    fn predicate_value(&self) -> Result<bool, RuntimeError> {
        if self.num_elements() != 1 {
            return Err(RuntimeError::PredicateNotScalar(self.num_elements()));
        }
        let dtype = self.metadata.dtype;
        let truth = match dtype {
            DType::Bool | DType::I8 | DType::U8 => self.data[0] != 0,
            DType::I16 | DType::U16 => u16::read_le(&self.data) != 0,
            DType::I32 | DType::U32 => u32::read_le(&self.data) != 0,
            DType::I64 | DType::U64 => u64::read_le(&self.data) != 0,
            DType::F32 => f32::read_le(&self.data) != 0.0,
            DType::F64 => f64::read_le(&self.data) != 0.0,
            // Half-precision floats: false iff +0.0 or -0.0.
            DType::F16 | DType::BF16 => u16::read_le(&self.data) & 0x7FFF != 0,
            DType::String => {
                return Err(RuntimeError::UnsupportedPredicateType(dtype.to_string()))
            }
        };
        Ok(truth)
    }
}

impl fmt::Display for DenseHostTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DenseHostTensor<{}>({} bytes)",
            self.metadata,
            self.data.len()
        )
    }
}

/// A tensor of owned strings in host memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringHostTensor {
    metadata: TensorMetadata,
    strings: Vec<String>,
}

impl StringHostTensor {
    /// Allocates a tensor of empty strings for the given shape.
    pub fn new(shape: TensorShape) -> Option<Self> {
        let count = usize::try_from(shape.num_elements()).ok()?;
        Some(Self {
            metadata: TensorMetadata::new(DType::String, shape),
            strings: vec![String::new(); count],
        })
    }

    /// The tensor's metadata.
    pub fn metadata(&self) -> &TensorMetadata {
        &self.metadata
    }

    /// The string elements.
    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Mutable access to the string elements.
    pub fn strings_mut(&mut self) -> &mut [String] {
        &mut self.strings
    }
}

impl fmt::Display for StringHostTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StringHostTensor{}(", self.metadata.shape)?;
        for (i, s) in self.strings.iter().take(8).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{s:?}")?;
        }
        if self.strings.len() > 8 {
            write!(f, ", ...")?;
        }
        write!(f, ")")
    }
}

/// A tensor resident in host memory.
#[derive(Clone, Debug)]
pub enum HostTensor {
    /// Dense fixed-width elements.
    Dense(DenseHostTensor),
    /// Variable-length string elements.
    Str(StringHostTensor),
}

impl HostTensor {
    /// The tensor's metadata.
    pub fn metadata(&self) -> &TensorMetadata {
        match self {
            Self::Dense(t) => t.metadata(),
            Self::Str(t) => t.metadata(),
        }
    }

    /// The dense tensor, if this is one.
    pub fn as_dense(&self) -> Option<&DenseHostTensor> {
        match self {
            Self::Dense(t) => Some(t),
            Self::Str(_) => None,
        }
    }
}

impl fmt::Display for HostTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dense(t) => t.fmt(f),
            Self::Str(t) => t.fmt(f),
        }
    }
}

/// Evaluates a tensor as a branch predicate.
///
/// Dense single-element tensors are true iff the element is nonzero.
/// String tensors are false iff empty or their first element is the empty
/// string. Anything else is an error.
pub fn tensor_predicate(tensor: &HostTensor) -> Result<bool, RuntimeError> {
    match tensor {
        HostTensor::Dense(dense) => dense.predicate_value(),
        HostTensor::Str(strings) => Ok(strings
            .strings()
            .first()
            .is_some_and(|s| !s.is_empty())),
    }
}

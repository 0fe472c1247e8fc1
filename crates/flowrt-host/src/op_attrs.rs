//! Typed op-attribute dictionaries.
//!
//! Kernels build these incrementally (chained through `Chain` values) and
//! op dispatchers read them by key. Unlike IR attributes, these never
//! leave the process; they are plain host values.

use std::collections::HashMap;

use flowrt_ir::{DType, DenseAttr};

/// One attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum OpAttr {
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// Tensor element type.
    DType(DType),
    /// String.
    Str(String),
    /// Tensor shape.
    Shape(Vec<i64>),
    /// Dense tensor constant.
    Dense(DenseAttr),
    /// Nested attribute list.
    Aggregate(Vec<OpAttr>),
    /// Array of 32-bit integers.
    ArrayI32(Vec<i32>),
    /// Array of 64-bit integers.
    ArrayI64(Vec<i64>),
    /// Array of 32-bit floats.
    ArrayF32(Vec<f32>),
}

/// A mutable dictionary of named op attributes.
#[derive(Clone, Debug, Default)]
pub struct OpAttrs {
    entries: HashMap<String, OpAttr>,
}

impl OpAttrs {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no attributes are set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets an attribute, replacing any previous value under the key.
    pub fn set(&mut self, key: impl Into<String>, value: OpAttr) {
        self.entries.insert(key.into(), value);
    }

    /// Reads an attribute.
    pub fn get(&self, key: &str) -> Option<&OpAttr> {
        self.entries.get(key)
    }

    /// Reads a boolean attribute.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(OpAttr::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Reads a 32-bit integer attribute.
    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.get(key) {
            Some(OpAttr::I32(v)) => Some(*v),
            _ => None,
        }
    }

    /// Reads a 64-bit integer attribute.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(OpAttr::I64(v)) => Some(*v),
            _ => None,
        }
    }

    /// Reads a 32-bit float attribute.
    pub fn get_f32(&self, key: &str) -> Option<f32> {
        match self.get(key) {
            Some(OpAttr::F32(v)) => Some(*v),
            _ => None,
        }
    }

    /// Reads a string attribute.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(OpAttr::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// Reads an element-type attribute.
    pub fn get_dtype(&self, key: &str) -> Option<DType> {
        match self.get(key) {
            Some(OpAttr::DType(v)) => Some(*v),
            _ => None,
        }
    }

    /// Reads a shape attribute.
    pub fn get_shape(&self, key: &str) -> Option<&[i64]> {
        match self.get(key) {
            Some(OpAttr::Shape(v)) => Some(v),
            _ => None,
        }
    }

    /// Reads a dense-constant attribute.
    pub fn get_dense(&self, key: &str) -> Option<&DenseAttr> {
        match self.get(key) {
            Some(OpAttr::Dense(v)) => Some(v),
            _ => None,
        }
    }
}

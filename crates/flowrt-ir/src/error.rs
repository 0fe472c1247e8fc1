//! Error types for IR construction.

use crate::types::DType;

/// Errors that can occur when constructing IR values.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// A dense attribute's payload does not match its shape and dtype.
    #[error("dense attribute payload is {actual} bytes, expected {expected}")]
    DenseDataMismatch {
        /// Required payload size in bytes.
        expected: usize,
        /// Provided payload size in bytes.
        actual: usize,
    },

    /// A dense attribute was built with a variably-sized element type.
    #[error("dense attribute element type {dtype} is not fixed-width")]
    DenseElementType {
        /// The offending element type.
        dtype: DType,
    },
}

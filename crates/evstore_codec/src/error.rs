//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode an event to its binary form.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// The CBOR item parsed but does not have the event shape.
    #[error("invalid event structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// A hex string did not decode to the expected number of bytes.
    #[error("invalid hex: expected {expected} bytes")]
    InvalidHex {
        /// Expected decoded length in bytes.
        expected: usize,
    },

    /// An integer field does not fit its target type.
    #[error("integer overflow in field {field}")]
    IntegerOverflow {
        /// Name of the offending field.
        field: &'static str,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}

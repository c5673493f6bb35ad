//! # Error Types
//!
//! Errors raised while encoding facts or moving frames over a stream.

use thiserror::Error;

/// Errors produced by the shared types layer.
#[derive(Debug, Error)]
pub enum TypesError {
    /// A fact or envelope could not be (de)serialized.
    #[error("Codec error: {0}")]
    Codec(String),

    /// A frame header announced more bytes than we accept.
    #[error("Frame too large: {len} bytes (max: {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// The peer replied with something other than the expected acknowledgment.
    #[error("Unexpected acknowledgment: expected {expected:?}, got {actual:?}")]
    UnexpectedAck { expected: String, actual: String },

    /// Underlying stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for TypesError {
    fn from(err: bincode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

//! Error types for proxima.

use crate::Tag;

/// Errors surfaced by index, store, and persistence operations.
///
/// Library-level operations return errors to the caller rather than
/// terminating the process; only allocation failure is fatal.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// File size/shape mismatch or unsupported on-disk content.
    #[error("format error: {0}")]
    Format(String),

    /// Insert requested beyond configured capacity with no free slots and
    /// growth disabled.
    #[error("capacity exhausted: {0}")]
    Capacity(String),

    /// Delete or lookup of a tag that is not live in the index.
    #[error("unknown tag {0}")]
    UnknownTag(Tag),

    /// Insert of a tag that is already live in the index.
    #[error("tag {0} already exists")]
    DuplicateTag(Tag),

    /// Query or input vector dimension does not match the index.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Internal adjacency referencing an invalid slot; fatal for the
    /// current consolidation pass but does not corrupt repaired slots.
    #[error("graph consistency error: {0}")]
    Consistency(String),

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failure during save or load.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for proxima operations.
pub type Result<T> = std::result::Result<T, IndexError>;

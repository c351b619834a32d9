use thiserror::Error;

use super::checksum::Checksum;
use super::entry::{BufferId, BufferKind};

/// Errors surfaced by buffer operations.
///
/// Unknown ids on reads are not errors: reads return `None`.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer `{0}` not found")]
    NotFound(BufferId),
    #[error("buffer `{id}` failed integrity check (expected {expected}, computed {actual})")]
    IntegrityMismatch {
        id: BufferId,
        expected: Checksum,
        actual: Checksum,
    },
    #[error("buffer `{id}` holds {actual} payload, not {expected}")]
    KindMismatch {
        id: BufferId,
        expected: BufferKind,
        actual: BufferKind,
    },
    #[error("patch for buffer `{id}` rejected: {reason}")]
    InvalidPatch { id: BufferId, reason: String },
    #[error("failed to serialize buffer payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown buffer kind `{0}`")]
pub struct UnknownBufferKind(pub String);

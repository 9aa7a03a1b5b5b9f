//! Error types for the engine crate.

use tern_codec::CodecError;
use tern_store::StoreError;

/// Errors surfaced by the [`Labeler`](crate::Labeler).
#[derive(Debug, thiserror::Error)]
pub enum LabelerError {
    /// The caller's input was rejected before touching the log.
    #[error("{0}")]
    Validation(String),

    /// A query pattern used a wildcard inside an `at://` URI. Kept apart
    /// from plain validation because the external contract maps it to a
    /// dedicated status code.
    #[error("unsupported pattern {0:?}")]
    UnsupportedPattern(String),

    /// Concurrent writers kept colliding on the same identity tuple and
    /// the retry budget ran out.
    #[error("write conflict persisted after retries")]
    Conflict,

    /// Durable store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Key or signing failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

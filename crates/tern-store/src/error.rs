//! Error types for the store crate.

/// Errors that can occur during log store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A concurrent writer inserted an entry with the same identity tuple
    /// between the caller's read and its append. Retryable.
    #[error("conflicting write for the same label identity")]
    Conflict,

    /// Bulk import was attempted on a non-empty store.
    #[error("store is not empty")]
    NotEmpty,

    /// A sequence key failed to decode.
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<postcard::Error> for StoreError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

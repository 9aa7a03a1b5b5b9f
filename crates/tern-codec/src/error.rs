//! Error types for the codec crate.

use std::convert::Infallible;

/// Errors that can occur while encoding or signing labels.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The configured private key could not be parsed.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// The signing operation itself failed.
    #[error("signing failed: {0}")]
    Signing(#[from] k256::ecdsa::signature::Error),

    /// CBOR encoding failed.
    #[error("cbor encoding failed: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
}

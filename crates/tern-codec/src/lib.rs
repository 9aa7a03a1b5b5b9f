//! Wire encoding and signing for the tern labeler.
//!
//! Three concerns live here:
//!
//! - **Canonical record encoding**: the deterministic CBOR form of a label
//!   that signatures are computed over. Byte-for-byte compatibility with
//!   the ATProto `LabelDefs.Label` canonical form is part of the contract,
//!   so the maps are written by hand instead of via derived serializers.
//! - **Framed stream envelope**: the header+body binary frames emitted on
//!   the subscription stream, including the `FutureCursor` error frame.
//! - **Signing**: SHA-256 over the canonical encoding, ECDSA secp256k1 in
//!   compact 64-byte low-S form, plus private key parsing and the
//!   `did:key` publication form of the public key.
//!
//! Signatures are never persisted; they are produced at emission time from
//! the canonical encoding, so a key change takes effect on the next emit.

mod cbor;
mod error;
mod sign;

pub use cbor::{encode_label, future_cursor_frame, labels_frame};
pub use error::CodecError;
pub use sign::LabelSigner;

//! Label signing with a secp256k1 key.

use k256::ecdsa::signature::DigestSigner;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256};
use tern_types::Entry;

use crate::cbor::encode_label;
use crate::error::CodecError;

/// Multicodec `secp256k1-pub` (0xE7) as an unsigned varint.
const SECP256K1_PUB_MULTICODEC: [u8; 2] = [0xe7, 0x01];

/// Holds the labeler's signing key. Created once at startup and shared
/// read-only for the process lifetime.
pub struct LabelSigner {
    key: SigningKey,
}

impl LabelSigner {
    /// Parse a hex-encoded secp256k1 private key.
    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(s.trim()).map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        let key =
            SigningKey::from_slice(&bytes).map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Sign the canonical encoding of `entry`.
    ///
    /// SHA-256 over the canonical CBOR (without a `sig` field), ECDSA
    /// secp256k1, compact 64-byte form with a normalized (low) `s`.
    pub fn sign_entry(&self, entry: &Entry) -> Result<Vec<u8>, CodecError> {
        let canonical = encode_label(entry, None)?;
        let sig: Signature = self
            .key
            .try_sign_digest(Sha256::new_with_prefix(&canonical))?;
        let sig = sig.normalize_s().unwrap_or(sig);
        Ok(sig.to_bytes().to_vec())
    }

    /// The public key corresponding to the signing key.
    pub fn verifying_key(&self) -> VerifyingKey {
        *self.key.verifying_key()
    }

    /// The `did:key` form of the compressed public key: multibase
    /// base58btc over the multicodec prefix plus the 33-byte SEC1 point.
    pub fn did_key(&self) -> String {
        let point = self.key.verifying_key().to_encoded_point(true);
        let mut bytes = Vec::with_capacity(SECP256K1_PUB_MULTICODEC.len() + point.len());
        bytes.extend_from_slice(&SECP256K1_PUB_MULTICODEC);
        bytes.extend_from_slice(point.as_bytes());
        format!(
            "did:key:{}",
            multibase::encode(multibase::Base::Base58Btc, bytes)
        )
    }
}

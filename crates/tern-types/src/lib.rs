//! Shared data model for the tern labeler.
//!
//! Two representations of a label exist side by side:
//!
//! - [`Entry`] is the persisted log record. All optional fields use empty
//!   sentinels (`cid == ""` means "applies to the whole subject",
//!   `exp == ""` means "never expires") so the record is a flat row.
//! - [`Label`] is the wire form: the JSON shape used by the query endpoint,
//!   the admin ingress, and the legacy database values. Optional fields are
//!   `Option`s and absent fields are omitted from the serialized output.
//!
//! The identity of a label for deduplication and negation purposes is the
//! tuple `(src, val, uri, cid)` — see [`Entry::identity`].

use serde::{Deserialize, Serialize};

/// Protocol version stamped on every emitted label.
pub const LABEL_VERSION: i64 = 1;

/// One record in the append-only label log.
///
/// Entries are immutable once appended: they are created by the writer,
/// never mutated, never deleted. Negations and expiration updates are
/// expressed as *new* entries; the effective label set is recovered by
/// collapsing the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Position in the log. Strictly increasing, assigned exactly once,
    /// never reused. Doubles as the subscription cursor.
    pub seq: i64,
    /// Creation timestamp (RFC3339), assigned by the writer at admission.
    pub cts: String,
    /// Issuer DID.
    pub src: String,
    /// Subject URI (`did:...` or `at://...`).
    pub uri: String,
    /// Label value.
    pub val: String,
    /// Content hash this label is scoped to. Empty means the label applies
    /// to the whole subject; a non-empty `cid` is a distinct identity.
    pub cid: String,
    /// Expiration timestamp (RFC3339). Empty means no expiration. Expired
    /// entries stay in the log and are still emitted; filtering is the
    /// consumer's concern.
    pub exp: String,
    /// Negation: retracts the most recent non-negated entry with the same
    /// identity tuple.
    pub neg: bool,
}

/// The `(src, val, uri, cid)` tuple that identifies a label for
/// deduplication and negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity<'a> {
    pub src: &'a str,
    pub val: &'a str,
    pub uri: &'a str,
    pub cid: &'a str,
}

impl Entry {
    /// Build an [`Entry`] from the wire form, at the given log position.
    pub fn from_label(seq: i64, label: &Label) -> Self {
        Self {
            seq,
            cts: label.cts.clone(),
            src: label.src.clone(),
            uri: label.uri.clone(),
            val: label.val.clone(),
            cid: label.cid.clone().unwrap_or_default(),
            exp: label.exp.clone().unwrap_or_default(),
            neg: label.neg.unwrap_or(false),
        }
    }

    /// The identity tuple of this entry.
    pub fn identity(&self) -> Identity<'_> {
        Identity {
            src: &self.src,
            val: &self.val,
            uri: &self.uri,
            cid: &self.cid,
        }
    }

    /// Convert to the wire form, without a signature.
    ///
    /// Empty sentinels become absent fields; `ver` is always 1.
    pub fn to_label(&self) -> Label {
        Label {
            ver: Some(LABEL_VERSION),
            src: self.src.clone(),
            uri: self.uri.clone(),
            cid: (!self.cid.is_empty()).then(|| self.cid.clone()),
            val: self.val.clone(),
            neg: self.neg.then_some(true),
            cts: self.cts.clone(),
            exp: (!self.exp.is_empty()).then(|| self.exp.clone()),
            sig: None,
        }
    }

    /// Convert to the wire form carrying the given signature.
    pub fn signed_label(&self, sig: Vec<u8>) -> Label {
        let mut label = self.to_label();
        label.sig = Some(SigBytes { bytes: sig });
        label
    }
}

/// Wire form of a label: what goes over the query endpoint, the admin
/// ingress, and the subscription stream (in its CBOR rendering).
///
/// Field order mirrors the lexicon definition. Absent optionals are
/// omitted on output and default on input, so a partially populated
/// admin POST body deserializes cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ver: Option<i64>,
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default)]
    pub val: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neg: Option<bool>,
    #[serde(default)]
    pub cts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<SigBytes>,
}

/// Signature bytes in their JSON rendering: `{"$bytes": "<base64>"}`
/// (standard alphabet, no padding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigBytes {
    #[serde(rename = "$bytes", with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD_NO_PAD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD_NO_PAD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

//! Canonical CBOR encoding of label records and stream frames.
//!
//! The canonical form is a definite-length map whose keys appear in the
//! RFC 7049 canonical order (shorter keys first, then bytewise). All label
//! field names are three bytes, so the order is plain bytewise:
//! `cid, cts, exp, neg, sig, src, uri, val, ver`. Absent optional fields
//! are omitted entirely — an empty `cid` or `exp`, or `neg == false`,
//! contributes no map pair.

use minicbor::Encoder;
use tern_types::{Entry, LABEL_VERSION};

use crate::error::CodecError;

/// Encode the canonical CBOR form of a label record.
///
/// With `sig == None` this is the exact byte sequence signatures are
/// computed over. With a signature, it is the form embedded in stream
/// frames.
pub fn encode_label(entry: &Entry, sig: Option<&[u8]>) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    let mut e = Encoder::new(&mut buf);

    let mut pairs = 5u64; // cts, src, uri, val, ver
    if !entry.cid.is_empty() {
        pairs += 1;
    }
    if !entry.exp.is_empty() {
        pairs += 1;
    }
    if entry.neg {
        pairs += 1;
    }
    if sig.is_some() {
        pairs += 1;
    }

    e.map(pairs)?;
    if !entry.cid.is_empty() {
        e.str("cid")?.str(&entry.cid)?;
    }
    e.str("cts")?.str(&entry.cts)?;
    if !entry.exp.is_empty() {
        e.str("exp")?.str(&entry.exp)?;
    }
    if entry.neg {
        e.str("neg")?.bool(true)?;
    }
    if let Some(sig) = sig {
        e.str("sig")?.bytes(sig)?;
    }
    e.str("src")?.str(&entry.src)?;
    e.str("uri")?.str(&entry.uri)?;
    e.str("val")?.str(&entry.val)?;
    e.str("ver")?.i64(LABEL_VERSION)?;

    Ok(buf)
}

/// Encode one subscription stream frame: the `{t:"#labels", op:1}` header
/// followed by a `{seq, labels:[label]}` body carrying a single signed
/// record.
pub fn labels_frame(seq: i64, entry: &Entry, sig: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    let mut e = Encoder::new(&mut buf);

    // Header. "t" sorts before "op" (canonical order is length-first).
    e.map(2)?.str("t")?.str("#labels")?.str("op")?.i64(1)?;
    // Body prefix, up to the single-element labels array.
    e.map(2)?.str("seq")?.i64(seq)?.str("labels")?.array(1)?;

    buf.extend_from_slice(&encode_label(entry, Some(sig))?);
    Ok(buf)
}

/// Encode the `FutureCursor` error frame: an `{op:-1}` header followed by
/// `{error:"FutureCursor"}`. Sent once, after which the connection closes.
pub fn future_cursor_frame() -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    let mut e = Encoder::new(&mut buf);
    e.map(1)?.str("op")?.i64(-1)?;
    e.map(1)?.str("error")?.str("FutureCursor")?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_entry() -> Entry {
        Entry {
            seq: 1,
            cts: "t".to_string(),
            src: "s".to_string(),
            uri: "u".to_string(),
            val: "a".to_string(),
            cid: String::new(),
            exp: String::new(),
            neg: false,
        }
    }

    #[test]
    fn test_canonical_encoding_minimal() {
        // {"cts":"t","src":"s","uri":"u","val":"a","ver":1}
        let expected = concat!(
            "a5",       // map(5)
            "63637473", // "cts"
            "6174",     // "t"
            "63737263", // "src"
            "6173",     // "s"
            "63757269", // "uri"
            "6175",     // "u"
            "6376616c", // "val"
            "6161",     // "a"
            "63766572", // "ver"
            "01",       // 1
        );
        let encoded = encode_label(&minimal_entry(), None).unwrap();
        assert_eq!(hex::encode(encoded), expected);
    }

    #[test]
    fn test_canonical_encoding_full() {
        // All optional fields present: cid, exp, neg sort before src.
        let mut entry = minimal_entry();
        entry.cid = "c".to_string();
        entry.exp = "e".to_string();
        entry.neg = true;
        let expected = concat!(
            "a8",       // map(8)
            "63636964", // "cid"
            "6163",     // "c"
            "63637473", // "cts"
            "6174",     // "t"
            "63657870", // "exp"
            "6165",     // "e"
            "636e6567", // "neg"
            "f5",       // true
            "63737263", // "src"
            "6173",     // "s"
            "63757269", // "uri"
            "6175",     // "u"
            "6376616c", // "val"
            "6161",     // "a"
            "63766572", // "ver"
            "01",       // 1
        );
        let encoded = encode_label(&entry, None).unwrap();
        assert_eq!(hex::encode(encoded), expected);
    }

    #[test]
    fn test_signature_slot_sorts_between_neg_and_src() {
        let encoded = encode_label(&minimal_entry(), Some(&[0xAB; 4])).unwrap();
        let expected = concat!(
            "a6",       // map(6)
            "63637473", "6174", // cts: "t"
            "63736967", // "sig"
            "44abababab", // bytes(4)
            "63737263", "6173", // src: "s"
            "63757269", "6175", // uri: "u"
            "6376616c", "6161", // val: "a"
            "63766572", "01",   // ver: 1
        );
        assert_eq!(hex::encode(encoded), expected);
    }

    #[test]
    fn test_labels_frame_header_bytes() {
        let frame = labels_frame(3, &minimal_entry(), &[0u8; 64]).unwrap();
        // {op:1, t:"#labels"} in canonical order.
        assert_eq!(
            hex::encode(&frame[..15]),
            "a2617467236c6162656c73626f7001"
        );
    }

    #[test]
    fn test_labels_frame_body_shape() {
        let frame = labels_frame(42, &minimal_entry(), &[7u8; 64]).unwrap();
        let mut d = minicbor::Decoder::new(&frame[15..]);
        assert_eq!(d.map().unwrap(), Some(2));
        assert_eq!(d.str().unwrap(), "seq");
        assert_eq!(d.i64().unwrap(), 42);
        assert_eq!(d.str().unwrap(), "labels");
        assert_eq!(d.array().unwrap(), Some(1));
        // The array element is the signed canonical label.
        let label = encode_label(&minimal_entry(), Some(&[7u8; 64])).unwrap();
        assert_eq!(&frame[frame.len() - label.len()..], &label[..]);
    }

    #[test]
    fn test_future_cursor_frame_bytes() {
        let frame = future_cursor_frame().unwrap();
        assert_eq!(
            hex::encode(frame),
            concat!(
                "a1626f7020",                               // {op:-1}
                "a1656572726f726c467574757265437572736f72", // {error:"FutureCursor"}
            )
        );
    }
}

//! Ordered, durable label log.
//!
//! The log is a single ordered map from sequence number to [`Entry`]
//! (`tern_types::Entry`), backed either by a Fjall database on disk or by a
//! pure in-memory map for tests. A secondary keyspace indexes entries by
//! their `(uri, val, src, cid)` identity tuple so that subject queries and
//! the writer's conflict checks avoid full log scans.
//!
//! Sequence numbers are encoded as length-prefixed minimal big-endian
//! integers ([`encode_seq`]), which keeps the byte order of keys identical
//! to the numeric order of sequence numbers.

mod error;
mod keys;
mod legacy;
mod store;

pub use error::StoreError;
pub use keys::{decode_seq, encode_seq};
pub use legacy::LegacyLog;
pub use store::LogStore;

/// Entries handed out per [`LogStore::scan_after`] batch on the
/// subscription catch-up path.
pub const SCAN_BATCH: usize = 100;

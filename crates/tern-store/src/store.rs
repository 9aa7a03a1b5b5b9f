//! Log storage backend (Fjall disk or pure in-memory).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use tern_types::Entry;

use crate::error::StoreError;
use crate::keys::{decode_seq, encode_seq};

type Result<T> = std::result::Result<T, StoreError>;

/// Inner backend: either Fjall-backed (disk) or pure in-memory.
enum Backend {
    Fjall {
        #[allow(dead_code)]
        db: Database,
        /// Encoded seq → postcard-encoded [`Entry`].
        log: Keyspace,
        /// Identity key (`uri \0 val \0 src \0 cid \0 seq`) → empty.
        idx: Keyspace,
    },
    Memory(Box<MemoryBackend>),
}

/// Pure in-memory storage, mirroring the two Fjall keyspaces.
struct MemoryBackend {
    log: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    idx: RwLock<BTreeMap<Vec<u8>, ()>>,
}

/// The ordered label log.
///
/// Entries are keyed by their encoded sequence number. A secondary
/// keyspace maps `(uri, val, src, cid)` identity tuples (NUL-separated;
/// identity fields must not contain NUL bytes) plus the encoded seq back
/// to the log, serving subject queries and the writer's conflict checks.
///
/// All writes go through a single append lock, so sequence numbers are
/// assigned exactly once and the log plus its index move together.
pub struct LogStore {
    backend: Backend,
    append_lock: Mutex<()>,
}

fn storage_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// Identity portion of an index key.
fn identity_prefix(uri: &str, val: &str, src: &str, cid: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(uri.len() + val.len() + src.len() + cid.len() + 4);
    for field in [uri, val, src, cid] {
        key.extend_from_slice(field.as_bytes());
        key.push(0);
    }
    key
}

/// Extract the sequence number from a full index key.
fn idx_key_seq(key: &[u8]) -> Result<i64> {
    let mut rest = key;
    for _ in 0..4 {
        let pos = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(StoreError::InvalidKey("malformed index key"))?;
        rest = &rest[pos + 1..];
    }
    decode_seq(rest)
}

impl LogStore {
    /// Open a persistent store at the given path (Fjall backend).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open().map_err(storage_err)?;
        Self::init_fjall(db)
    }

    /// Open a temporary disk-backed store (cleaned up on drop).
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(storage_err)?;
        let db = Database::builder(tmp.path())
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::init_fjall(db)
    }

    /// Create a pure in-memory store.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Box::new(MemoryBackend {
                log: RwLock::new(BTreeMap::new()),
                idx: RwLock::new(BTreeMap::new()),
            })),
            append_lock: Mutex::new(()),
        }
    }

    fn init_fjall(db: Database) -> Result<Self> {
        let log = db
            .keyspace("log", KeyspaceCreateOptions::default)
            .map_err(storage_err)?;
        let idx = db
            .keyspace("idx", KeyspaceCreateOptions::default)
            .map_err(storage_err)?;
        Ok(Self {
            backend: Backend::Fjall { db, log, idx },
            append_lock: Mutex::new(()),
        })
    }

    // ----- Reads -----

    /// Highest assigned sequence number, or 0 if the log is empty.
    pub fn max_seq(&self) -> Result<i64> {
        match &self.backend {
            Backend::Fjall { log, .. } => match log.last_key_value() {
                Some(guard) => {
                    let (key, _) = guard.into_inner().map_err(storage_err)?;
                    decode_seq(&key)
                }
                None => Ok(0),
            },
            Backend::Memory(m) => {
                let log = m.log.read().unwrap();
                match log.last_key_value() {
                    Some((key, _)) => decode_seq(key),
                    None => Ok(0),
                }
            }
        }
    }

    /// Whether the log holds no entries at all.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.max_seq()? == 0)
    }

    /// Entry at an exact sequence number.
    pub fn get_seq(&self, seq: i64) -> Result<Option<Entry>> {
        let key = encode_seq(seq);
        let bytes = match &self.backend {
            Backend::Fjall { log, .. } => {
                log.get(&key).map_err(storage_err)?.map(|v| v.to_vec())
            }
            Backend::Memory(m) => m.log.read().unwrap().get(&key).cloned(),
        };
        match bytes {
            Some(b) => Ok(Some(postcard::from_bytes(&b)?)),
            None => Ok(None),
        }
    }

    /// Entries with `seq > from_exclusive`, ascending, at most `limit`.
    ///
    /// New appends become visible to subsequent batches, so callers can
    /// page through a log that is being written to concurrently.
    pub fn scan_after(&self, from_exclusive: i64, limit: usize) -> Result<Vec<Entry>> {
        let start = encode_seq(from_exclusive.saturating_add(1));
        let mut entries = Vec::new();

        match &self.backend {
            Backend::Fjall { log, .. } => {
                for guard in log.range(start..) {
                    if entries.len() == limit {
                        break;
                    }
                    let (_, value) = guard.into_inner().map_err(storage_err)?;
                    entries.push(postcard::from_bytes(&value)?);
                }
            }
            Backend::Memory(m) => {
                let log = m.log.read().unwrap();
                for (_, value) in log.range(start..).take(limit) {
                    entries.push(postcard::from_bytes(value)?);
                }
            }
        }

        Ok(entries)
    }

    /// Number of entries with `seq >= from_inclusive`. Used to validate
    /// subscription cursors.
    pub fn count_from(&self, from_inclusive: i64) -> Result<i64> {
        let start = encode_seq(from_inclusive.max(1));
        match &self.backend {
            Backend::Fjall { log, .. } => {
                let mut count = 0i64;
                for guard in log.range(start..) {
                    guard.key().map_err(storage_err)?;
                    count += 1;
                }
                Ok(count)
            }
            Backend::Memory(m) => Ok(m.log.read().unwrap().range(start..).count() as i64),
        }
    }

    /// All entries whose `uri` is exactly one of `subjects` (and, when
    /// `sources` is non-empty, whose `src` is one of `sources`), ascending
    /// by seq. Subjects are matched exactly — no patterns.
    pub fn get_for_subjects(&self, subjects: &[String], sources: &[String]) -> Result<Vec<Entry>> {
        let mut seqs = Vec::new();
        for subject in subjects {
            let mut prefix = Vec::with_capacity(subject.len() + 1);
            prefix.extend_from_slice(subject.as_bytes());
            prefix.push(0);
            self.idx_seqs_with_prefix(&prefix, &mut seqs)?;
        }
        seqs.sort_unstable();
        seqs.dedup();

        let mut entries = Vec::with_capacity(seqs.len());
        for seq in seqs {
            let entry = self
                .get_seq(seq)?
                .ok_or(StoreError::InvalidKey("index points at missing entry"))?;
            if sources.is_empty() || sources.contains(&entry.src) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// All entries with the given label value, ascending by seq.
    ///
    /// Walks the whole log; the identity index is keyed by `uri` first and
    /// cannot serve a value-only lookup.
    pub fn get_by_val(&self, val: &str) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut from = 0i64;
        loop {
            let batch = self.scan_after(from, crate::SCAN_BATCH)?;
            let Some(last) = batch.last() else {
                return Ok(entries);
            };
            from = last.seq;
            entries.extend(batch.into_iter().filter(|e| e.val == val));
        }
    }

    /// The newest entry sharing `entry`'s identity tuple with
    /// `seq <= max_inclusive`, if any.
    pub fn latest_with_identity(&self, entry: &Entry, max_inclusive: i64) -> Result<Option<Entry>> {
        let prefix = identity_prefix(&entry.uri, &entry.val, &entry.src, &entry.cid);
        let mut seqs = Vec::new();
        self.idx_seqs_with_prefix(&prefix, &mut seqs)?;

        match seqs.into_iter().filter(|s| *s <= max_inclusive).max() {
            Some(seq) => self.get_seq(seq),
            None => Ok(None),
        }
    }

    fn idx_seqs_with_prefix(&self, prefix: &[u8], seqs: &mut Vec<i64>) -> Result<()> {
        match &self.backend {
            Backend::Fjall { idx, .. } => {
                for guard in idx.prefix(prefix) {
                    let key = guard.key().map_err(storage_err)?;
                    seqs.push(idx_key_seq(&key)?);
                }
            }
            Backend::Memory(m) => {
                let idx = m.idx.read().unwrap();
                for (key, _) in idx.range(prefix.to_vec()..) {
                    if !key.starts_with(prefix) {
                        break;
                    }
                    seqs.push(idx_key_seq(key)?);
                }
            }
        }
        Ok(())
    }

    // ----- Writes -----

    /// Append `entry` at `max + 1`. The read of the current maximum and
    /// the insert happen under the append lock: either both happen or
    /// neither.
    pub fn append(&self, mut entry: Entry) -> Result<Entry> {
        let _guard = self.append_lock.lock().unwrap();
        entry.seq = self.max_seq()? + 1;
        self.insert_entry(&entry)?;
        Ok(entry)
    }

    /// Append `entry` at `max + 1` unless another entry with the same
    /// identity tuple landed at a seq in `(observed_max, max]` — i.e. a
    /// concurrent writer got there first — in which case
    /// [`StoreError::Conflict`] is returned and nothing is written.
    pub fn append_guarded(&self, mut entry: Entry, observed_max: i64) -> Result<Entry> {
        let _guard = self.append_lock.lock().unwrap();
        let max = self.max_seq()?;

        if max > observed_max {
            let prefix = identity_prefix(&entry.uri, &entry.val, &entry.src, &entry.cid);
            let mut seqs = Vec::new();
            self.idx_seqs_with_prefix(&prefix, &mut seqs)?;
            if seqs.iter().any(|s| *s > observed_max && *s <= max) {
                return Err(StoreError::Conflict);
            }
        }

        entry.seq = max + 1;
        self.insert_entry(&entry)?;
        Ok(entry)
    }

    /// Populate an empty store with pre-assigned sequence numbers.
    ///
    /// Fails with [`StoreError::NotEmpty`] if any entry already exists.
    /// Each entry is written at the seq given by its map key.
    pub fn bulk_import(&self, entries: &BTreeMap<i64, Entry>) -> Result<()> {
        let _guard = self.append_lock.lock().unwrap();
        if self.max_seq()? != 0 {
            return Err(StoreError::NotEmpty);
        }
        for (seq, entry) in entries {
            if *seq < 1 {
                return Err(StoreError::InvalidKey("imported seq must be positive"));
            }
            let mut entry = entry.clone();
            entry.seq = *seq;
            self.insert_entry(&entry)?;
        }
        Ok(())
    }

    fn insert_entry(&self, entry: &Entry) -> Result<()> {
        let log_key = encode_seq(entry.seq);
        let mut idx_key = identity_prefix(&entry.uri, &entry.val, &entry.src, &entry.cid);
        idx_key.extend_from_slice(&log_key);
        let bytes = postcard::to_allocvec(entry)?;

        match &self.backend {
            Backend::Fjall { log, idx, .. } => {
                log.insert(&log_key, bytes).map_err(storage_err)?;
                idx.insert(&idx_key, []).map_err(storage_err)?;
            }
            Backend::Memory(m) => {
                m.log.write().unwrap().insert(log_key, bytes);
                m.idx.write().unwrap().insert(idx_key, ());
            }
        }
        Ok(())
    }
}

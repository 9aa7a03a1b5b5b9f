//! Read access to the legacy label database layout.
//!
//! Older deployments kept one JSON label per log position in a single
//! `labels` keyspace, keyed with the same length-prefixed big-endian seq
//! encoding used today. Zero-length values are padding sentinels (written
//! when an existing labeler was migrated onto this software) and carry no
//! label.
//!
//! This module only reads that layout; the import into the current store
//! goes through [`LogStore::bulk_import`](crate::LogStore::bulk_import).

use std::collections::BTreeMap;
use std::path::Path;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use tern_types::{Entry, Label};
use tracing::debug;

use crate::error::StoreError;
use crate::keys::decode_seq;

type Result<T> = std::result::Result<T, StoreError>;

fn storage_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// A read-only handle on a legacy label database.
pub struct LegacyLog {
    #[allow(dead_code)]
    db: Database,
    labels: Keyspace,
}

impl LegacyLog {
    /// Open the legacy database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open().map_err(storage_err)?;
        let labels = db
            .keyspace("labels", KeyspaceCreateOptions::default)
            .map_err(storage_err)?;
        Ok(Self { db, labels })
    }

    /// Highest allocated sequence number, or 0 if empty. Padding
    /// sentinels count — they occupy a log position.
    pub fn last_seq(&self) -> Result<i64> {
        match self.labels.last_key_value() {
            Some(guard) => {
                let (key, _) = guard.into_inner().map_err(storage_err)?;
                decode_seq(&key)
            }
            None => Ok(0),
        }
    }

    /// Read every label entry, keyed by its sequence number. Padding
    /// sentinels are skipped.
    pub fn entries(&self) -> Result<BTreeMap<i64, Entry>> {
        let mut entries = BTreeMap::new();
        let mut skipped = 0usize;

        for guard in self.labels.iter() {
            let (key, value) = guard.into_inner().map_err(storage_err)?;
            if value.is_empty() {
                skipped += 1;
                continue;
            }
            let seq = decode_seq(&key)?;
            let label: Label = serde_json::from_slice(&value)?;
            entries.insert(seq, Entry::from_label(seq, &label));
        }

        if skipped > 0 {
            debug!(skipped, "skipped padding sentinels in legacy log");
        }
        Ok(entries)
    }
}

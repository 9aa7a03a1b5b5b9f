//! One-shot import of a legacy label database into the current store.

use std::path::Path;

use tern_store::{LegacyLog, LogStore};
use tracing::info;

use crate::error::LabelerError;

/// Import entries from a legacy database directory into `store`, keeping
/// their sequence numbers. Runs before the service starts taking traffic.
///
/// - If the legacy log has nothing newer than the store, this is a no-op
///   (the contents are not compared — positions only).
/// - If the store already has entries *and* the legacy log is ahead of it,
///   there is no safe way to proceed and an error is returned.
///
/// Returns the number of imported entries.
pub fn migrate_legacy(store: &LogStore, legacy_path: &Path) -> Result<usize, LabelerError> {
    let legacy = LegacyLog::open(legacy_path)?;
    let last_legacy = legacy.last_seq()?;
    let last_current = store.max_seq()?;

    if last_legacy <= last_current {
        return Ok(0);
    }
    if last_current != 0 {
        return Err(LabelerError::Validation(
            "store is not empty but the legacy database has more entries".to_string(),
        ));
    }

    let entries = legacy.entries()?;
    let count = entries.len();
    store.bulk_import(&entries)?;
    info!(count, last_seq = last_legacy, "imported legacy label log");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjall::{Database, KeyspaceCreateOptions};
    use tern_store::encode_seq;
    use tern_types::Label;

    fn write_legacy(path: &Path, records: &[(i64, Option<Label>)]) {
        let db = Database::builder(path).open().unwrap();
        let labels = db
            .keyspace("labels", KeyspaceCreateOptions::default)
            .unwrap();
        for (seq, label) in records {
            let value = match label {
                Some(label) => serde_json::to_vec(label).unwrap(),
                None => Vec::new(),
            };
            labels.insert(encode_seq(*seq), value).unwrap();
        }
    }

    fn label(val: &str) -> Label {
        Label {
            src: "did:example:labeler".to_string(),
            uri: "did:foo".to_string(),
            val: val.to_string(),
            cts: "2024-05-01T12:00:00Z".to_string(),
            ..Label::default()
        }
    }

    #[test]
    fn test_migrates_into_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        write_legacy(
            dir.path(),
            &[(1, Some(label("a"))), (2, None), (3, Some(label("b")))],
        );

        let store = LogStore::in_memory();
        let imported = migrate_legacy(&store, dir.path()).unwrap();
        assert_eq!(imported, 2);
        assert_eq!(store.max_seq().unwrap(), 3);

        let entries = store.scan_after(0, 100).unwrap();
        assert_eq!(entries.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(entries[1].val, "b");
    }

    #[test]
    fn test_noop_when_store_is_ahead() {
        let dir = tempfile::tempdir().unwrap();
        write_legacy(dir.path(), &[(1, Some(label("a")))]);

        let store = LogStore::in_memory();
        for val in ["x", "y"] {
            store
                .append(tern_types::Entry::from_label(0, &label(val)))
                .unwrap();
        }

        assert_eq!(migrate_legacy(&store, dir.path()).unwrap(), 0);
        assert_eq!(store.max_seq().unwrap(), 2);
    }

    #[test]
    fn test_rejects_diverged_stores() {
        let dir = tempfile::tempdir().unwrap();
        write_legacy(
            dir.path(),
            &[(1, Some(label("a"))), (2, Some(label("b")))],
        );

        let store = LogStore::in_memory();
        store
            .append(tern_types::Entry::from_label(0, &label("x")))
            .unwrap();

        let err = migrate_legacy(&store, dir.path()).unwrap_err();
        assert!(matches!(err, LabelerError::Validation(_)));
    }
}

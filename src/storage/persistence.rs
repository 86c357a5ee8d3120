//! File-backed store: committed tables snapshotted to disk after every commit.

use super::{InMemoryStore, PersistenceStore, StoreTxId, TableRows};
use crate::core::{EntityId, Row, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{Level, event};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub written_at: DateTime<Utc>,
    pub next_id: i64,
    pub tables: TableRows,
}

impl StoreSnapshot {
    pub fn row_count(&self) -> usize {
        self.tables.values().map(|rows| rows.len()).sum()
    }

    /// Reads a snapshot file; `None` when the file does not exist yet.
    pub fn read(path: &Path) -> StoreResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        let snapshot: StoreSnapshot = rmp_serde::from_slice(&data).map_err(|e| {
            StoreError::Serialization(format!("Failed to deserialize snapshot: {}", e))
        })?;
        if snapshot.version != SNAPSHOT_FORMAT_VERSION {
            return Err(StoreError::Serialization(format!(
                "Unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        Ok(Some(snapshot))
    }

    /// Replaces `path` atomically: readers see the old or the new snapshot,
    /// never a partial write.
    pub fn write(&self, path: &Path) -> StoreResult<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let serialized = rmp_serde::to_vec(self).map_err(|e| {
            StoreError::Serialization(format!("Failed to serialize snapshot: {}", e))
        })?;
        let mut temp = NamedTempFile::new_in(&dir)?;
        temp.write_all(&serialized)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| StoreError::Io(e.error.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// File Store
// ============================================================================

/// [`InMemoryStore`] whose committed state survives process restarts.
///
/// Transactions run entirely in memory. A commit writes the snapshot of the
/// resulting tables first and only then makes them visible, so a commit that
/// fails to reach disk leaves no trace in memory either.
pub struct FileStore {
    path: PathBuf,
    inner: InMemoryStore,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = match StoreSnapshot::read(&path)? {
            Some(snapshot) => {
                event!(
                    Level::INFO,
                    path = %path.display(),
                    rows = snapshot.row_count(),
                    "file store loaded"
                );
                InMemoryStore::from_parts(snapshot.tables, snapshot.next_id)
            }
            None => InMemoryStore::new(),
        };

        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory view of the committed data.
    pub fn memory(&self) -> &InMemoryStore {
        &self.inner
    }

    pub fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        Ok(self.snapshot_of(self.inner.committed_tables()?))
    }

    fn snapshot_of(&self, tables: TableRows) -> StoreSnapshot {
        StoreSnapshot {
            version: SNAPSHOT_FORMAT_VERSION,
            written_at: Utc::now(),
            next_id: self.inner.next_id(),
            tables,
        }
    }
}

impl PersistenceStore for FileStore {
    fn begin(&self) -> StoreResult<StoreTxId> {
        self.inner.begin()
    }

    fn insert(&self, tx: StoreTxId, entity_type: &str, row: Row) -> StoreResult<EntityId> {
        self.inner.insert(tx, entity_type, row)
    }

    fn update(
        &self,
        tx: StoreTxId,
        entity_type: &str,
        id: EntityId,
        delta: Row,
    ) -> StoreResult<()> {
        self.inner.update(tx, entity_type, id, delta)
    }

    fn load(&self, tx: StoreTxId, entity_type: &str, id: EntityId) -> StoreResult<Option<Row>> {
        self.inner.load(tx, entity_type, id)
    }

    fn commit(&self, tx: StoreTxId) -> StoreResult<()> {
        self.inner.commit_with(tx, |staged| {
            let snapshot = self.snapshot_of(staged.clone());
            snapshot.write(&self.path)?;
            event!(
                Level::DEBUG,
                path = %self.path.display(),
                rows = snapshot.row_count(),
                "file store snapshot written"
            );
            Ok(())
        })
    }

    fn rollback(&self, tx: StoreTxId) -> StoreResult<()> {
        self.inner.rollback(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use tempfile::tempdir;

    fn row(at: &str) -> Row {
        let mut row = Row::new();
        row.insert(
            "created_on".into(),
            Value::Timestamp(at.parse().unwrap()),
        );
        row.insert("edited".into(), Value::Boolean(true));
        row
    }

    #[test]
    fn test_reopen_restores_committed_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mpk");

        let id = {
            let store = FileStore::open(&path).unwrap();
            let tx = store.begin().unwrap();
            let id = store.insert(tx, "Stamped", row("2020-01-10T10:00:00Z")).unwrap();
            store.commit(tx).unwrap();

            let tx = store.begin().unwrap();
            store.insert(tx, "Stamped", row("2021-01-01T00:00:00Z")).unwrap();
            store.rollback(tx).unwrap();
            id
        };

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.memory().row_count("Stamped").unwrap(), 1);
        assert_eq!(
            reopened.memory().committed_row("Stamped", id).unwrap(),
            Some(row("2020-01-10T10:00:00Z"))
        );
        // The identity burned by the rolled-back insert is not handed out again.
        assert_eq!(reopened.memory().next_id(), 3);
    }

    #[test]
    fn test_missing_file_opens_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("nested").join("store.mpk")).unwrap();
        assert_eq!(store.memory().row_count("Stamped").unwrap(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_corrupt_snapshot_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mpk");
        fs::write(&path, b"not a snapshot").unwrap();

        assert!(matches!(
            FileStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }
}

use super::{PersistenceStore, StoreTxId};
use crate::core::{EntityId, Row, StoreError, StoreResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use tracing::{Level, event};

/// Committed rows of every table, keyed by entity type then identity.
pub type TableRows = BTreeMap<String, BTreeMap<EntityId, Row>>;

/// A write recorded under an open transaction, replayed on commit.
#[derive(Debug, Clone)]
enum PendingWrite {
    Insert {
        entity_type: String,
        id: EntityId,
        row: Row,
    },
    Update {
        entity_type: String,
        id: EntityId,
        delta: Row,
    },
}

impl PendingWrite {
    fn targets(&self, entity_type: &str, id: EntityId) -> bool {
        match self {
            Self::Insert {
                entity_type: t,
                id: i,
                ..
            }
            | Self::Update {
                entity_type: t,
                id: i,
                ..
            } => t == entity_type && *i == id,
        }
    }

    fn apply_to(&self, row: &mut Option<Row>) {
        match self {
            Self::Insert { row: inserted, .. } => *row = Some(inserted.clone()),
            Self::Update { delta, .. } => {
                if let Some(existing) = row.as_mut() {
                    existing.extend(delta.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }
    }
}

/// Counters of calls that reached the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub inserts: u64,
    pub updates: u64,
    pub loads: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

#[derive(Default)]
struct Counters {
    inserts: AtomicU64,
    updates: AtomicU64,
    loads: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// Process-local store with read-committed isolation.
///
/// Each transaction keeps its writes in a private log; loads under that
/// transaction replay the log over the committed row, and commit replays it
/// into the shared tables under one write lock. Updates are merged column by
/// column, so concurrent scopes touching different columns do not clobber
/// each other.
pub struct InMemoryStore {
    tables: RwLock<TableRows>,
    pending: Mutex<HashMap<StoreTxId, Vec<PendingWrite>>>,
    next_id: AtomicI64,
    next_tx: AtomicU64,
    counters: Counters,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::from_tables(TableRows::new())
    }

    /// Rebuild a store from committed rows; new identities continue after the
    /// highest one present.
    pub fn from_tables(tables: TableRows) -> Self {
        let max_id = tables
            .values()
            .flat_map(|rows| rows.keys())
            .map(EntityId::as_i64)
            .max()
            .unwrap_or(0);
        Self::from_parts(tables, max_id + 1)
    }

    pub(crate) fn from_parts(tables: TableRows, next_id: i64) -> Self {
        Self {
            tables: RwLock::new(tables),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(next_id.max(1)),
            next_tx: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    /// Identity the next insert will receive.
    pub fn next_id(&self) -> i64 {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn committed_tables(&self) -> StoreResult<TableRows> {
        Ok(self.tables.read()?.clone())
    }

    pub fn row_count(&self, entity_type: &str) -> StoreResult<usize> {
        Ok(self
            .tables
            .read()?
            .get(entity_type)
            .map(BTreeMap::len)
            .unwrap_or(0))
    }

    /// Committed row, ignoring every open transaction.
    pub fn committed_row(&self, entity_type: &str, id: EntityId) -> StoreResult<Option<Row>> {
        Ok(self
            .tables
            .read()?
            .get(entity_type)
            .and_then(|rows| rows.get(&id))
            .cloned())
    }

    pub fn open_transactions(&self) -> StoreResult<usize> {
        Ok(self.pending.lock()?.len())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            commits: self.counters.commits.load(Ordering::Relaxed),
            rollbacks: self.counters.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// Commits `tx`, calling `publish` with the resulting tables before they
    /// become visible. Nothing is applied when any write fails validation or
    /// `publish` returns an error; the transaction is finished either way.
    pub(crate) fn commit_with<F>(&self, tx: StoreTxId, publish: F) -> StoreResult<()>
    where
        F: FnOnce(&TableRows) -> StoreResult<()>,
    {
        let writes = self
            .pending
            .lock()?
            .remove(&tx)
            .ok_or(StoreError::TransactionNotFound(tx.0))?;

        let mut tables = self.tables.write()?;
        let staged = match Self::stage(&tables, &writes).and_then(|staged| {
            publish(&staged)?;
            Ok(staged)
        }) {
            Ok(staged) => staged,
            Err(err) => {
                event!(Level::WARN, tx = %tx, error = %err, "store commit rejected, writes discarded");
                return Err(err);
            }
        };
        *tables = staged;

        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        event!(Level::TRACE, tx = %tx, writes = writes.len(), "store transaction committed");
        Ok(())
    }

    /// Committed tables with `writes` replayed on top. Every update target is
    /// checked before anything is copied.
    fn stage(tables: &TableRows, writes: &[PendingWrite]) -> StoreResult<TableRows> {
        for (index, write) in writes.iter().enumerate() {
            if let PendingWrite::Update {
                entity_type, id, ..
            } = write
            {
                let committed = tables
                    .get(entity_type)
                    .is_some_and(|rows| rows.contains_key(id));
                let inserted_earlier = writes[..index].iter().any(|earlier| {
                    matches!(earlier, PendingWrite::Insert { .. })
                        && earlier.targets(entity_type, *id)
                });
                if !committed && !inserted_earlier {
                    return Err(StoreError::NotFound {
                        entity_type: entity_type.clone(),
                        id: *id,
                    });
                }
            }
        }

        let mut staged = tables.clone();
        for write in writes {
            match write {
                PendingWrite::Insert {
                    entity_type,
                    id,
                    row,
                } => {
                    staged
                        .entry(entity_type.clone())
                        .or_default()
                        .insert(*id, row.clone());
                }
                PendingWrite::Update {
                    entity_type,
                    id,
                    delta,
                } => {
                    if let Some(row) = staged.get_mut(entity_type).and_then(|rows| rows.get_mut(id)) {
                        row.extend(delta.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                }
            }
        }
        Ok(staged)
    }

    fn visible_row(
        &self,
        writes: &[PendingWrite],
        entity_type: &str,
        id: EntityId,
    ) -> StoreResult<Option<Row>> {
        let mut row = self.committed_row(entity_type, id)?;
        for write in writes.iter().filter(|w| w.targets(entity_type, id)) {
            write.apply_to(&mut row);
        }
        Ok(row)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceStore for InMemoryStore {
    fn begin(&self) -> StoreResult<StoreTxId> {
        let tx = StoreTxId(self.next_tx.fetch_add(1, Ordering::SeqCst));
        self.pending.lock()?.insert(tx, Vec::new());
        event!(Level::TRACE, tx = %tx, "store transaction opened");
        Ok(tx)
    }

    fn insert(&self, tx: StoreTxId, entity_type: &str, row: Row) -> StoreResult<EntityId> {
        let mut pending = self.pending.lock()?;
        let writes = pending
            .get_mut(&tx)
            .ok_or(StoreError::TransactionNotFound(tx.0))?;

        // Identities are handed out immediately and never reused, even when
        // the transaction later rolls back.
        let id = EntityId(self.next_id.fetch_add(1, Ordering::SeqCst));
        writes.push(PendingWrite::Insert {
            entity_type: entity_type.to_string(),
            id,
            row,
        });
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn update(
        &self,
        tx: StoreTxId,
        entity_type: &str,
        id: EntityId,
        delta: Row,
    ) -> StoreResult<()> {
        let mut pending = self.pending.lock()?;
        let writes = pending
            .get_mut(&tx)
            .ok_or(StoreError::TransactionNotFound(tx.0))?;

        if self.visible_row(writes, entity_type, id)?.is_none() {
            return Err(StoreError::NotFound {
                entity_type: entity_type.to_string(),
                id,
            });
        }

        writes.push(PendingWrite::Update {
            entity_type: entity_type.to_string(),
            id,
            delta,
        });
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn load(&self, tx: StoreTxId, entity_type: &str, id: EntityId) -> StoreResult<Option<Row>> {
        let pending = self.pending.lock()?;
        let writes = pending
            .get(&tx)
            .ok_or(StoreError::TransactionNotFound(tx.0))?;
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        self.visible_row(writes, entity_type, id)
    }

    fn commit(&self, tx: StoreTxId) -> StoreResult<()> {
        self.commit_with(tx, |_| Ok(()))
    }

    fn rollback(&self, tx: StoreTxId) -> StoreResult<()> {
        let discarded = self
            .pending
            .lock()?
            .remove(&tx)
            .ok_or(StoreError::TransactionNotFound(tx.0))?;
        self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
        event!(Level::TRACE, tx = %tx, discarded = discarded.len(), "store transaction rolled back");
        Ok(())
    }
}

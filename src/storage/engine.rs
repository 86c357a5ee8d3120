use crate::core::{EntityId, Row, StoreResult};
use std::fmt;

/// Handle of one store-level transaction, opened per session scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreTxId(pub u64);

impl StoreTxId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stx_{}", self.0)
    }
}

/// Durable backing store for entity rows - allows pluggable backends.
///
/// Each operation must be atomic for a single row and linearizable per
/// identity. Writes made under a transaction are visible to loads under the
/// same transaction and to nobody else until [`PersistenceStore::commit`].
pub trait PersistenceStore: Send + Sync {
    /// Open a transaction scope
    fn begin(&self) -> StoreResult<StoreTxId>;

    /// Insert a new row and return the identity assigned to it
    fn insert(&self, tx: StoreTxId, entity_type: &str, row: Row) -> StoreResult<EntityId>;

    /// Merge `delta` into an existing row
    fn update(&self, tx: StoreTxId, entity_type: &str, id: EntityId, delta: Row)
    -> StoreResult<()>;

    /// Read a row as seen by `tx`; `None` when no such row exists
    fn load(&self, tx: StoreTxId, entity_type: &str, id: EntityId) -> StoreResult<Option<Row>>;

    /// Make every write of `tx` durable and visible
    fn commit(&self, tx: StoreTxId) -> StoreResult<()>;

    /// Discard every write of `tx`
    fn rollback(&self, tx: StoreTxId) -> StoreResult<()>;
}

use crate::core::EntityId;
use crate::session::EntityKey;
use thiserror::Error;

/// Failures raised by a [`PersistenceStore`](crate::storage::PersistenceStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Row {id} of '{entity_type}' not found")]
    NotFound { entity_type: String, id: EntityId },

    #[error("Store transaction {0} not found or already finished")]
    TransactionNotFound(u64),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum OrmError {
    #[error("Entity '{entity_type}' with id {id} is already managed by this session")]
    AlreadyManaged { entity_type: String, id: EntityId },

    #[error("Entity type '{0}' is not mapped")]
    UnmappedType(String),

    #[error("Field '{field}' is not mapped on entity '{entity_type}'")]
    UnknownField { entity_type: String, field: String },

    #[error("Identifier field '{field}' of '{entity_type}' cannot be written by the application")]
    IdentityImmutable { entity_type: String, field: String },

    #[error("No managed entity for key {0}")]
    UnknownEntity(EntityKey),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session was aborted by an earlier store failure and must be rolled back")]
    SessionAborted,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrmError {
    /// Store failures leave the owning scope unusable; everything else is
    /// reported without poisoning the session.
    pub fn aborts_scope(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, OrmError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_error_maps_to_lock() {
        let lock = std::sync::Mutex::new(0);
        let _ = std::panic::catch_unwind(|| {
            let _guard = lock.lock().unwrap();
            panic!("poison");
        });
        let err: StoreError = lock.lock().unwrap_err().into();
        assert!(matches!(err, StoreError::Lock(_)));
    }

    #[test]
    fn test_only_store_errors_abort_scope() {
        let store = OrmError::from(StoreError::Constraint("duplicate".into()));
        assert!(store.aborts_scope());

        let managed = OrmError::AlreadyManaged {
            entity_type: "Ticket".into(),
            id: EntityId(1),
        };
        assert!(!managed.aborts_scope());
        assert!(!OrmError::UnmappedType("Ghost".into()).aborts_scope());
    }
}

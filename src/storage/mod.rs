pub mod engine;
pub mod memory;
pub mod persistence;

pub use engine::{PersistenceStore, StoreTxId};
pub use memory::{InMemoryStore, StoreStats, TableRows};
pub use persistence::{FileStore, StoreSnapshot};

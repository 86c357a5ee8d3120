// ============================================================================
// memorm Library
// ============================================================================
//
// Entity lifecycle engine: mapped entity types, engine-generated field values
// (creation / modification timestamps), snapshot dirty checking and a
// unit-of-work session flushing into a pluggable persistence store.
//
// ============================================================================

pub mod config;
pub mod core;
pub mod facade;
pub mod generation;
pub mod mapping;
pub mod prelude;
pub mod session;
pub mod storage;

pub use config::{InsertGeneration, OrmConfig, UpdateTrigger};
pub use core::{EntityId, OrmError, Result, Row, StoreError, Value};
pub use facade::SessionFactory;
pub use generation::{Clock, FixedClock, SteppingClock, SystemClock, ValueGenerator, ValueResolver};
pub use mapping::{EntityMapping, EntityRegistry, FieldMapping, GenerationPolicy};
pub use session::{EntityInstance, EntityKey, FlushReport, Session, SessionState};
pub use storage::{FileStore, InMemoryStore, PersistenceStore, StoreTxId};

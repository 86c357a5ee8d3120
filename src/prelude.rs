//! Everything a unit of work usually needs in one import.

pub use crate::{
    EntityId, EntityInstance, EntityKey, EntityMapping, EntityRegistry, GenerationPolicy,
    OrmConfig, OrmError, Result, Session, SessionFactory, Value, ValueGenerator,
};

use crate::config::OrmConfig;
use crate::core::Result;
use crate::generation::{Clock, SystemClock, ValueResolver};
use crate::mapping::EntityRegistry;
use crate::session::Session;
use crate::storage::{InMemoryStore, PersistenceStore};
use std::sync::Arc;
use tracing::{Level, event};

/// Shared entry point: mapped types, the store, configuration and the clock
/// generated values are read from. Cheap to clone and safe to share across
/// threads; each thread opens its own sessions.
#[derive(Clone)]
pub struct SessionFactory {
    registry: Arc<EntityRegistry>,
    store: Arc<dyn PersistenceStore>,
    config: OrmConfig,
    clock: Arc<dyn Clock>,
}

impl SessionFactory {
    pub fn new(registry: EntityRegistry, store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            config: OrmConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Factory over a fresh [`InMemoryStore`].
    pub fn in_memory(registry: EntityRegistry) -> Self {
        Self::new(registry, Arc::new(InMemoryStore::new()))
    }

    pub fn with_config(mut self, config: OrmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn PersistenceStore> {
        &self.store
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    /// Opens a session over a new store transaction. The caller ends it with
    /// [`Session::commit`] or [`Session::rollback`]; dropping it rolls back.
    pub fn open_session(&self) -> Result<Session> {
        let resolver = ValueResolver::new(self.clock.clone(), self.config.insert_generation);
        Session::open(
            self.registry.clone(),
            self.store.clone(),
            resolver,
            self.config.clone(),
        )
    }

    /// Runs `work` in a fresh session and ends the scope on every path.
    ///
    /// If `work` returns `Ok`, the session is committed (flushing first);
    /// if it returns `Err` or the commit fails, nothing the scope wrote
    /// becomes visible. A panic inside `work` rolls back when the session is
    /// dropped during unwinding.
    pub fn in_transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        let mut session = self.open_session()?;
        match work(&mut session) {
            Ok(value) => {
                session.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback() {
                    event!(
                        Level::ERROR,
                        error = %rollback_err,
                        "rollback after failed unit of work also failed"
                    );
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("entity_types", &self.registry.entity_types())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrmError, Value};
    use crate::mapping::{EntityMapping, GenerationPolicy};
    use crate::session::EntityInstance;

    fn factory() -> (SessionFactory, Arc<InMemoryStore>) {
        let registry = EntityRegistry::builder()
            .register(
                EntityMapping::builder("Counter")
                    .field("count", GenerationPolicy::None)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let store = Arc::new(InMemoryStore::new());
        (SessionFactory::new(registry, store.clone()), store)
    }

    #[test]
    fn test_in_transaction_commits_on_ok() {
        let (factory, store) = factory();
        let id = factory
            .in_transaction(|session| {
                let key = session.persist(EntityInstance::new("Counter").with("count", 1))?;
                session.flush()?;
                Ok(session.entity(key)?.identity())
            })
            .unwrap()
            .unwrap();

        assert_eq!(
            store.committed_row("Counter", id).unwrap().unwrap().get("count"),
            Some(&Value::Integer(1))
        );
    }

    #[test]
    fn test_in_transaction_rolls_back_on_err() {
        let (factory, store) = factory();
        let result: Result<()> = factory.in_transaction(|session| {
            session.persist(EntityInstance::new("Counter").with("count", 1))?;
            session.flush()?;
            Err(OrmError::Config("abandon".into()))
        });

        assert!(matches!(result, Err(OrmError::Config(_))));
        assert_eq!(store.row_count("Counter").unwrap(), 0);
        assert_eq!(store.stats().rollbacks, 1);
    }

    #[test]
    fn test_in_transaction_propagates_unmapped_type() {
        let (factory, store) = factory();
        let result = factory.in_transaction(|session| {
            session.persist(EntityInstance::new("Ghost"))?;
            Ok(())
        });
        assert!(matches!(result, Err(OrmError::UnmappedType(name)) if name == "Ghost"));
        assert_eq!(store.open_transactions().unwrap(), 0);
    }
}

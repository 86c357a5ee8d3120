use super::EntityInstance;
use crate::config::{OrmConfig, UpdateTrigger};
use crate::core::{EntityId, OrmError, Result, StoreError, row_delta};
use crate::generation::{ValueResolver, WriteKind};
use crate::mapping::{EntityMapping, EntityRegistry};
use crate::storage::{PersistenceStore, StoreTxId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{Level, event, info_span};
use uuid::Uuid;

/// Handle of a managed instance inside one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(usize);

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Session lifecycle
///
/// ```text
/// Open ──commit/rollback──> Closed
///   │
///   └──store failure──> Aborted ──rollback──> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Aborted,
    Closed,
}

/// What one flush wrote.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl FlushReport {
    pub fn writes(&self) -> usize {
        self.inserted + self.updated
    }
}

struct Managed {
    instance: EntityInstance,
    mapping: Arc<EntityMapping>,
}

/// Unit of work over one store transaction.
///
/// Instances handed to [`Session::persist`] or produced by [`Session::find`]
/// are owned by the session until the scope ends; callers reach them through
/// the returned [`EntityKey`]. A session is driven by a single caller; every
/// mutating operation takes `&mut self`.
pub struct Session {
    id: Uuid,
    registry: Arc<EntityRegistry>,
    store: Arc<dyn PersistenceStore>,
    resolver: ValueResolver,
    config: OrmConfig,
    tx: StoreTxId,
    managed: Vec<Managed>,
    by_identity: HashMap<(String, EntityId), EntityKey>,
    state: SessionState,
}

impl Session {
    pub(crate) fn open(
        registry: Arc<EntityRegistry>,
        store: Arc<dyn PersistenceStore>,
        resolver: ValueResolver,
        config: OrmConfig,
    ) -> Result<Self> {
        let tx = store.begin()?;
        let id = Uuid::new_v4();
        event!(Level::DEBUG, session = %id, tx = %tx, "session opened");
        Ok(Self {
            id,
            registry,
            store,
            resolver,
            config,
            tx,
            managed: Vec::new(),
            by_identity: HashMap::new(),
            state: SessionState::Open,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_aborted(&self) -> bool {
        self.state == SessionState::Aborted
    }

    pub fn managed_count(&self) -> usize {
        self.managed.len()
    }

    /// Whether an instance with this identity is managed by the session.
    pub fn contains(&self, entity_type: &str, id: EntityId) -> bool {
        self.by_identity
            .contains_key(&(entity_type.to_string(), id))
    }

    pub fn entity(&self, key: EntityKey) -> Result<&EntityInstance> {
        self.managed
            .get(key.0)
            .map(|managed| &managed.instance)
            .ok_or(OrmError::UnknownEntity(key))
    }

    pub fn entity_mut(&mut self, key: EntityKey) -> Result<&mut EntityInstance> {
        self.ensure_open()?;
        self.managed
            .get_mut(key.0)
            .map(|managed| &mut managed.instance)
            .ok_or(OrmError::UnknownEntity(key))
    }

    pub fn is_dirty(&self, key: EntityKey) -> Result<bool> {
        Ok(self.entity(key)?.is_dirty())
    }

    /// Makes `entity` managed. No identity is assigned until the insert runs
    /// at the next flush.
    ///
    /// An instance that already carries an identity (detached from an earlier
    /// scope) is re-attached and dirty-checked against the snapshot it kept.
    /// Fails with [`OrmError::AlreadyManaged`] when that identity is already
    /// managed here; the session stays usable.
    pub fn persist(&mut self, mut entity: EntityInstance) -> Result<EntityKey> {
        self.ensure_open()?;
        let mapping = self.registry.lookup(entity.entity_type())?.clone();
        mapping.check_row(entity.fields())?;

        let identity_key = entity
            .identity()
            .map(|id| (mapping.entity_type().to_string(), id));
        if let Some(identity_key) = &identity_key {
            if self.by_identity.contains_key(identity_key) {
                return Err(OrmError::AlreadyManaged {
                    entity_type: identity_key.0.clone(),
                    id: identity_key.1,
                });
            }
        }

        entity.fill_missing(&mapping.empty_row());
        let key = EntityKey(self.managed.len());
        event!(
            Level::DEBUG,
            session = %self.id,
            entity_type = mapping.entity_type(),
            key = %key,
            reattached = identity_key.is_some(),
            "entity persisted"
        );
        if let Some(identity_key) = identity_key {
            self.by_identity.insert(identity_key, key);
        }
        self.managed.push(Managed {
            instance: entity,
            mapping,
        });
        Ok(key)
    }

    /// Loads `entity_type` row `id` as a managed instance.
    ///
    /// `Ok(None)` means no such row. Stored values are taken as they are;
    /// generators do not run on load. An identity already managed by this
    /// session resolves to the existing instance without reading the store.
    pub fn find(&mut self, entity_type: &str, id: EntityId) -> Result<Option<EntityKey>> {
        self.ensure_open()?;
        let mapping = self.registry.lookup(entity_type)?.clone();

        let identity_key = (mapping.entity_type().to_string(), id);
        if let Some(key) = self.by_identity.get(&identity_key) {
            return Ok(Some(*key));
        }

        let row = match self.store.load(self.tx, entity_type, id) {
            Ok(row) => row,
            Err(err) => return Err(self.abort(err)),
        };
        let Some(row) = row else {
            event!(Level::DEBUG, session = %self.id, entity_type, id = %id, "entity not found");
            return Ok(None);
        };

        let mut instance = EntityInstance::loaded(entity_type, id, row);
        instance.fill_missing(&mapping.empty_row());
        instance.refresh_snapshot();

        let key = EntityKey(self.managed.len());
        self.managed.push(Managed { instance, mapping });
        self.by_identity.insert(identity_key, key);
        event!(Level::DEBUG, session = %self.id, entity_type, id = %id, key = %key, "entity loaded");
        Ok(Some(key))
    }

    /// Writes pending state of every managed instance to the store, in the
    /// order the instances became managed.
    ///
    /// New instances are inserted after their generated fields are resolved.
    /// Persisted instances are updated when their fields differ from the
    /// snapshot (or, with [`UpdateTrigger::Always`], whenever they carry a
    /// field regenerated on update); only changed columns are written.
    pub fn flush(&mut self) -> Result<FlushReport> {
        self.ensure_open()?;
        let span = info_span!("session.flush", session = %self.id, managed = self.managed.len());
        let _enter = span.enter();

        // Mapping violations are caller errors: report them before anything
        // reaches the store so the scope stays usable.
        for managed in &self.managed {
            managed.mapping.check_row(managed.instance.fields())?;
        }

        let mut report = FlushReport::default();
        for index in 0..self.managed.len() {
            if self.managed[index].instance.is_new() {
                self.flush_insert(index)?;
                report.inserted += 1;
            } else if self.flush_update(index)? {
                report.updated += 1;
            } else {
                report.unchanged += 1;
            }
        }

        event!(
            Level::DEBUG,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            "flush complete"
        );
        Ok(report)
    }

    fn flush_insert(&mut self, index: usize) -> Result<()> {
        let managed = &mut self.managed[index];
        self.resolver.apply(
            &managed.mapping,
            managed.instance.fields_mut(),
            WriteKind::Insert,
        );
        let entity_type = managed.mapping.entity_type().to_string();
        let row = managed.instance.fields().clone();
        let columns = row.len();

        let id = match self.store.insert(self.tx, &entity_type, row) {
            Ok(id) => id,
            Err(err) => return Err(self.abort(err)),
        };

        let managed = &mut self.managed[index];
        managed.instance.assign_identity(id);
        managed.instance.refresh_snapshot();
        self.by_identity
            .insert((entity_type.clone(), id), EntityKey(index));
        self.log_write("insert", &entity_type, id, columns);
        Ok(())
    }

    fn flush_update(&mut self, index: usize) -> Result<bool> {
        let managed = &mut self.managed[index];
        let forced = self.config.update_trigger == UpdateTrigger::Always
            && managed.mapping.has_update_generated_fields();
        if !managed.instance.is_dirty() && !forced {
            return Ok(false);
        }

        self.resolver.apply(
            &managed.mapping,
            managed.instance.fields_mut(),
            WriteKind::Update,
        );
        let delta = match managed.instance.snapshot() {
            Some(snapshot) => row_delta(snapshot, managed.instance.fields()),
            None => managed.instance.fields().clone(),
        };
        if delta.is_empty() {
            managed.instance.refresh_snapshot();
            return Ok(false);
        }

        let entity_type = managed.mapping.entity_type().to_string();
        let Some(id) = managed.instance.identity() else {
            return Ok(false);
        };
        let columns = delta.len();

        if let Err(err) = self.store.update(self.tx, &entity_type, id, delta) {
            return Err(self.abort(err));
        }

        self.managed[index].instance.refresh_snapshot();
        self.log_write("update", &entity_type, id, columns);
        Ok(true)
    }

    /// Flushes, commits the store transaction and detaches every managed
    /// instance, handing them back to the caller.
    ///
    /// If anything fails the scope is rolled back instead and nothing it
    /// wrote becomes visible.
    pub fn commit(mut self) -> Result<Vec<EntityInstance>> {
        let span = info_span!("session.commit", session = %self.id);
        let _enter = span.enter();

        if self.state == SessionState::Aborted {
            self.close_with_rollback();
            return Err(OrmError::SessionAborted);
        }

        if let Err(err) = self.flush() {
            self.close_with_rollback();
            return Err(err);
        }

        let committed = self.store.commit(self.tx);
        self.state = SessionState::Closed;
        if let Err(err) = committed {
            event!(Level::ERROR, error = %err, "store commit failed");
            // The store may or may not have released the transaction.
            let _ = self.store.rollback(self.tx);
            return Err(err.into());
        }

        self.by_identity.clear();
        let detached: Vec<EntityInstance> = std::mem::take(&mut self.managed)
            .into_iter()
            .map(|managed| managed.instance)
            .collect();
        event!(Level::DEBUG, detached = detached.len(), "session committed");
        Ok(detached)
    }

    /// Discards every pending write of the scope without touching committed
    /// data. Valid on an aborted session.
    pub fn rollback(mut self) -> Result<()> {
        self.state = SessionState::Closed;
        self.managed.clear();
        self.by_identity.clear();
        self.store.rollback(self.tx)?;
        event!(Level::DEBUG, session = %self.id, "session rolled back");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Aborted => Err(OrmError::SessionAborted),
            SessionState::Closed => Err(OrmError::SessionClosed),
        }
    }

    fn abort(&mut self, err: StoreError) -> OrmError {
        event!(Level::ERROR, session = %self.id, error = %err, "store failure, aborting scope");
        self.state = SessionState::Aborted;
        OrmError::Store(err)
    }

    fn close_with_rollback(&mut self) {
        self.state = SessionState::Closed;
        self.managed.clear();
        self.by_identity.clear();
        if let Err(err) = self.store.rollback(self.tx) {
            event!(Level::ERROR, session = %self.id, error = %err, "rollback failed");
        }
    }

    fn log_write(&self, kind: &str, entity_type: &str, id: EntityId, columns: usize) {
        if self.config.show_writes {
            event!(Level::INFO, session = %self.id, kind, entity_type, id = %id, columns, "store write");
        } else {
            event!(Level::DEBUG, session = %self.id, kind, entity_type, id = %id, columns, "store write");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            event!(
                Level::WARN,
                session = %self.id,
                managed = self.managed.len(),
                "session dropped without commit, rolling back"
            );
            self.close_with_rollback();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("tx", &self.tx)
            .field("state", &self.state)
            .field("managed", &self.managed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::generation::{FixedClock, ValueGenerator};
    use crate::mapping::GenerationPolicy;
    use crate::storage::InMemoryStore;
    use chrono::{DateTime, Utc};

    fn instant(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn open(store: &Arc<InMemoryStore>, config: OrmConfig) -> Session {
        let registry = EntityRegistry::builder()
            .register(
                EntityMapping::builder("Note")
                    .generated(
                        "created_on",
                        GenerationPolicy::OnInsert,
                        ValueGenerator::CurrentTimestamp,
                    )
                    .field("body", GenerationPolicy::None)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let clock = Arc::new(FixedClock::new(instant("2024-03-01T12:00:00Z")));
        let resolver = ValueResolver::new(clock, config.insert_generation);
        Session::open(Arc::new(registry), store.clone(), resolver, config).unwrap()
    }

    #[test]
    fn test_persist_defers_identity_to_flush() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = open(&store, OrmConfig::default());

        let key = session.persist(EntityInstance::new("Note")).unwrap();
        assert!(session.entity(key).unwrap().identity().is_none());
        assert_eq!(store.stats().inserts, 0);

        let report = session.flush().unwrap();
        assert_eq!(report.inserted, 1);
        let entity = session.entity(key).unwrap();
        assert!(entity.identity().is_some());
        assert_eq!(
            entity.get("created_on"),
            &Value::Timestamp(instant("2024-03-01T12:00:00Z"))
        );
        assert!(!entity.is_dirty());
        session.rollback().unwrap();
    }

    #[test]
    fn test_unknown_field_rejected_without_aborting() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = open(&store, OrmConfig::default());

        let err = session
            .persist(EntityInstance::new("Note").with("title", "x"))
            .unwrap_err();
        assert!(matches!(err, OrmError::UnknownField { .. }));

        let key = session.persist(EntityInstance::new("Note")).unwrap();
        session.flush().unwrap();
        session.entity_mut(key).unwrap().set("id", 99);
        assert!(matches!(
            session.flush(),
            Err(OrmError::IdentityImmutable { .. })
        ));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_find_returns_same_key_for_managed_identity() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = open(&store, OrmConfig::default());
        let key = session.persist(EntityInstance::new("Note")).unwrap();
        session.flush().unwrap();
        let id = session.entity(key).unwrap().identity().unwrap();

        let loads_before = store.stats().loads;
        assert_eq!(session.find("Note", id).unwrap(), Some(key));
        assert_eq!(store.stats().loads, loads_before);
        assert!(session.contains("Note", id));
    }

    #[test]
    fn test_drop_rolls_back() {
        let store = Arc::new(InMemoryStore::new());
        {
            let mut session = open(&store, OrmConfig::default());
            session.persist(EntityInstance::new("Note")).unwrap();
            session.flush().unwrap();
        }
        assert_eq!(store.row_count("Note").unwrap(), 0);
        assert_eq!(store.open_transactions().unwrap(), 0);
        assert_eq!(store.stats().rollbacks, 1);
    }

    #[test]
    fn test_unknown_key() {
        let store = Arc::new(InMemoryStore::new());
        let session = open(&store, OrmConfig::default());
        assert!(matches!(
            session.entity(EntityKey(3)),
            Err(OrmError::UnknownEntity(_))
        ));
    }
}

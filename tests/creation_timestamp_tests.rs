/// Creation timestamp tests
///
/// An `ON_INSERT` timestamp is generated once at insert; afterwards the
/// application may overwrite it and the new value must reach the store,
/// whether the overwrite happens in the inserting scope or a later one.
/// Run with: cargo test --test creation_timestamp_tests

use chrono::{DateTime, Duration, Utc};
use memorm::{
    Clock, EntityId, EntityInstance, EntityMapping, EntityRegistry, FixedClock, GenerationPolicy,
    InMemoryStore, InsertGeneration, OrmConfig, SessionFactory, Value, ValueGenerator,
};
use std::sync::Arc;

const ENTITY: &str = "EntityWithCreationTimestamp";

fn instant(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn manual_time() -> DateTime<Utc> {
    instant("2020-01-10T10:00:00Z")
}

fn registry() -> EntityRegistry {
    EntityRegistry::builder()
        .register(
            EntityMapping::builder(ENTITY)
                .generated(
                    "created_on",
                    GenerationPolicy::OnInsert,
                    ValueGenerator::CurrentTimestamp,
                )
                .field("unrelated_property_edited", GenerationPolicy::None)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
}

fn setup(config: OrmConfig) -> (SessionFactory, Arc<InMemoryStore>, Arc<FixedClock>) {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(FixedClock::new(instant("2024-05-01T08:30:00Z")));
    let factory = SessionFactory::new(registry(), store.clone())
        .with_config(config)
        .with_clock(clock.clone());
    (factory, store, clock)
}

fn insert_fresh(factory: &SessionFactory) -> EntityId {
    factory
        .in_transaction(|session| {
            let key = session
                .persist(EntityInstance::new(ENTITY).with("unrelated_property_edited", false))?;
            session.flush()?;
            Ok(session.entity(key)?.identity())
        })
        .unwrap()
        .unwrap()
}

fn reload(factory: &SessionFactory, id: EntityId) -> EntityInstance {
    factory
        .in_transaction(|session| {
            let key = session.find(ENTITY, id)?.unwrap();
            Ok(session.entity(key)?.clone())
        })
        .unwrap()
}

#[test]
fn test_insert_generates_creation_timestamp() {
    let (factory, _store, clock) = setup(OrmConfig::default());
    let id = insert_fresh(&factory);

    let entity = reload(&factory, id);
    assert_eq!(entity.get("created_on"), &Value::Timestamp(clock.now()));
    assert_eq!(entity.get("unrelated_property_edited"), &Value::Boolean(false));
}

#[test]
fn test_overwrite_in_same_scope_is_persisted() {
    let (factory, store, _clock) = setup(OrmConfig::default());

    let id = factory
        .in_transaction(|session| {
            let key = session
                .persist(EntityInstance::new(ENTITY).with("unrelated_property_edited", false))?;
            session.flush()?;

            let entity = session.entity_mut(key)?;
            entity.set("unrelated_property_edited", true);
            entity.set("created_on", manual_time());
            Ok(entity.identity())
        })
        .unwrap()
        .unwrap();

    let entity = reload(&factory, id);
    assert_eq!(entity.get("unrelated_property_edited"), &Value::Boolean(true));
    assert_eq!(entity.get("created_on"), &Value::Timestamp(manual_time()));

    let stats = store.stats();
    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.updates, 1);
}

#[test]
fn test_overwrite_in_later_scope_is_persisted() {
    let (factory, store, _clock) = setup(OrmConfig::default());
    let id = insert_fresh(&factory);

    factory
        .in_transaction(|session| {
            let key = session.find(ENTITY, id)?.unwrap();
            let entity = session.entity_mut(key)?;
            entity.set("unrelated_property_edited", true);
            entity.set("created_on", manual_time());
            Ok(())
        })
        .unwrap();

    let entity = reload(&factory, id);
    assert_eq!(entity.get("unrelated_property_edited"), &Value::Boolean(true));
    assert_eq!(entity.get("created_on"), &Value::Timestamp(manual_time()));
    assert_eq!(
        store.committed_row(ENTITY, id).unwrap().unwrap().get("created_on"),
        Some(&Value::Timestamp(manual_time()))
    );
}

#[test]
fn test_update_leaves_creation_timestamp_alone() {
    let (factory, _store, clock) = setup(OrmConfig::default());
    let id = insert_fresh(&factory);
    let created = reload(&factory, id).get("created_on").clone();

    clock.advance(Duration::days(3));
    factory
        .in_transaction(|session| {
            let key = session.find(ENTITY, id)?.unwrap();
            session.entity_mut(key)?.set("unrelated_property_edited", true);
            Ok(())
        })
        .unwrap();

    let entity = reload(&factory, id);
    assert_eq!(entity.get("created_on"), &created);
    assert_eq!(entity.get("unrelated_property_edited"), &Value::Boolean(true));
}

#[test]
fn test_caller_value_kept_at_insert_by_default() {
    let (factory, _store, _clock) = setup(OrmConfig::default());

    let id = factory
        .in_transaction(|session| {
            let key = session.persist(
                EntityInstance::new(ENTITY)
                    .with("created_on", manual_time())
                    .with("unrelated_property_edited", false),
            )?;
            session.flush()?;
            Ok(session.entity(key)?.identity())
        })
        .unwrap()
        .unwrap();

    assert_eq!(
        reload(&factory, id).get("created_on"),
        &Value::Timestamp(manual_time())
    );
}

#[test]
fn test_always_generate_discards_caller_value_at_insert() {
    let config = OrmConfig::new().insert_generation(InsertGeneration::AlwaysGenerate);
    let (factory, _store, clock) = setup(config);

    let id = factory
        .in_transaction(|session| {
            let key = session.persist(
                EntityInstance::new(ENTITY)
                    .with("created_on", manual_time())
                    .with("unrelated_property_edited", false),
            )?;
            session.flush()?;
            Ok(session.entity(key)?.identity())
        })
        .unwrap()
        .unwrap();

    let entity = reload(&factory, id);
    assert_eq!(entity.get("created_on"), &Value::Timestamp(clock.now()));

    // Only the insert is forced; a later overwrite still wins.
    factory
        .in_transaction(|session| {
            let key = session.find(ENTITY, id)?.unwrap();
            session.entity_mut(key)?.set("created_on", manual_time());
            Ok(())
        })
        .unwrap();
    assert_eq!(
        reload(&factory, id).get("created_on"),
        &Value::Timestamp(manual_time())
    );
}

#[test]
fn test_clearing_creation_timestamp_is_persisted() {
    let (factory, _store, _clock) = setup(OrmConfig::default());
    let id = insert_fresh(&factory);

    factory
        .in_transaction(|session| {
            let key = session.find(ENTITY, id)?.unwrap();
            session.entity_mut(key)?.set("created_on", Value::Null);
            Ok(())
        })
        .unwrap();

    assert!(reload(&factory, id).get("created_on").is_null());
}

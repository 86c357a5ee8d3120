use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use memorm::storage::StoreSnapshot;
use memorm::{
    EntityId, EntityInstance, EntityMapping, EntityRegistry, FileStore, GenerationPolicy,
    InMemoryStore, InsertGeneration, OrmConfig, OrmError, PersistenceStore, SessionFactory,
    StoreError, Value, ValueGenerator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const CREATION_ENTITY: &str = "EntityWithCreationTimestamp";
const UPDATE_ENTITY: &str = "EntityWithUpdateTimestamp";
const MANUAL_CREATION_TIME: &str = "2020-01-10T10:00:00Z";

#[derive(Parser)]
#[command(name = "memorm")]
#[command(about = "Generated-value lifecycle scenarios against an in-memory or file store")]
struct Cli {
    /// Log every store write
    #[arg(long, global = true)]
    show_writes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run lifecycle scenarios and report whether they hold
    Scenario {
        #[arg(value_enum, default_value_t = ScenarioName::All)]
        name: ScenarioName,
        /// Snapshot file to use instead of a throwaway in-memory store
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long, default_value_t = InsertGeneration::PreferProvided)]
        insert_generation: InsertGeneration,
    },
    /// Print the committed rows of a snapshot file as JSON
    Dump {
        #[arg(long)]
        store: PathBuf,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScenarioName {
    /// Overwrite the creation timestamp in the scope that inserted the row
    SameScope,
    /// Overwrite the creation timestamp in a later scope
    SeparateScopes,
    /// Manual value of an update timestamp is discarded on update
    UpdateTimestamp,
    All,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.show_writes { "memorm=info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.parse()?))
        .init();

    match cli.command {
        Command::Scenario {
            name,
            store,
            insert_generation,
        } => {
            let config = OrmConfig::new()
                .insert_generation(insert_generation)
                .show_writes(cli.show_writes);
            run_scenarios(name, store.as_deref(), config)
        }
        Command::Dump { store } => dump(&store),
    }
}

fn registry() -> Result<EntityRegistry> {
    let registry = EntityRegistry::builder()
        .register(
            EntityMapping::builder(CREATION_ENTITY)
                .generated(
                    "created_on",
                    GenerationPolicy::OnInsert,
                    ValueGenerator::CurrentTimestamp,
                )
                .field("unrelated_property_edited", GenerationPolicy::None)
                .build()?,
        )
        .register(
            EntityMapping::builder(UPDATE_ENTITY)
                .generated(
                    "updated_on",
                    GenerationPolicy::OnInsertAndUpdate,
                    ValueGenerator::CurrentTimestamp,
                )
                .field("note", GenerationPolicy::None)
                .build()?,
        )
        .build()?;
    Ok(registry)
}

fn run_scenarios(name: ScenarioName, store: Option<&Path>, config: OrmConfig) -> Result<()> {
    let store: Arc<dyn PersistenceStore> = match store {
        Some(path) => Arc::new(
            FileStore::open(path)
                .with_context(|| format!("Failed to open store {}", path.display()))?,
        ),
        None => Arc::new(InMemoryStore::new()),
    };
    let factory = SessionFactory::new(registry()?, store).with_config(config);
    let manual: DateTime<Utc> = MANUAL_CREATION_TIME.parse()?;

    let selected: Vec<ScenarioName> = match name {
        ScenarioName::All => vec![
            ScenarioName::SameScope,
            ScenarioName::SeparateScopes,
            ScenarioName::UpdateTimestamp,
        ],
        one => vec![one],
    };

    let mut failures = 0;
    for scenario in selected {
        let (label, outcome) = match scenario {
            ScenarioName::SameScope => ("same-scope", same_scope(&factory, manual)),
            ScenarioName::SeparateScopes => ("separate-scopes", separate_scopes(&factory, manual)),
            ScenarioName::UpdateTimestamp => ("update-timestamp", update_timestamp(&factory, manual)),
            ScenarioName::All => continue,
        };
        match outcome {
            Ok(id) => println!("PASS {:<18} id={}", label, id),
            Err(err) => {
                failures += 1;
                println!("FAIL {:<18} {:#}", label, err);
            }
        }
    }

    if failures > 0 {
        bail!("{} scenario(s) failed", failures);
    }
    Ok(())
}

fn not_found(entity_type: &str, id: EntityId) -> OrmError {
    OrmError::Store(StoreError::NotFound {
        entity_type: entity_type.to_string(),
        id,
    })
}

fn check_overwrite(factory: &SessionFactory, id: EntityId, manual: DateTime<Utc>) -> Result<()> {
    let (created_on, edited) = factory.in_transaction(|session| {
        let key = session
            .find(CREATION_ENTITY, id)?
            .ok_or_else(|| not_found(CREATION_ENTITY, id))?;
        let entity = session.entity(key)?;
        Ok((
            entity.get("created_on").clone(),
            entity.get("unrelated_property_edited").clone(),
        ))
    })?;

    if edited != Value::Boolean(true) {
        bail!("unrelated property not persisted, found {}", edited);
    }
    if created_on != Value::Timestamp(manual) {
        bail!("created_on expected {}, found {}", manual.to_rfc3339(), created_on);
    }
    Ok(())
}

fn same_scope(factory: &SessionFactory, manual: DateTime<Utc>) -> Result<EntityId> {
    let id = factory.in_transaction(|session| {
        let key = session.persist(
            EntityInstance::new(CREATION_ENTITY).with("unrelated_property_edited", false),
        )?;
        session.flush()?;

        let entity = session.entity_mut(key)?;
        entity.set("unrelated_property_edited", true);
        entity.set("created_on", manual);
        entity
            .identity()
            .ok_or(OrmError::UnknownEntity(key))
    })?;

    check_overwrite(factory, id, manual)?;
    Ok(id)
}

fn separate_scopes(factory: &SessionFactory, manual: DateTime<Utc>) -> Result<EntityId> {
    let id = factory.in_transaction(|session| {
        let key = session.persist(
            EntityInstance::new(CREATION_ENTITY).with("unrelated_property_edited", false),
        )?;
        session.flush()?;
        session
            .entity(key)?
            .identity()
            .ok_or(OrmError::UnknownEntity(key))
    })?;

    factory.in_transaction(|session| {
        let key = session
            .find(CREATION_ENTITY, id)?
            .ok_or_else(|| not_found(CREATION_ENTITY, id))?;
        let entity = session.entity_mut(key)?;
        entity.set("unrelated_property_edited", true);
        entity.set("created_on", manual);
        Ok(())
    })?;

    check_overwrite(factory, id, manual)?;
    Ok(id)
}

fn update_timestamp(factory: &SessionFactory, manual: DateTime<Utc>) -> Result<EntityId> {
    let id = factory.in_transaction(|session| {
        let key = session.persist(EntityInstance::new(UPDATE_ENTITY).with("note", "draft"))?;
        session.flush()?;

        let entity = session.entity_mut(key)?;
        entity.set("note", "final");
        entity.set("updated_on", manual);
        session.flush()?;
        session
            .entity(key)?
            .identity()
            .ok_or(OrmError::UnknownEntity(key))
    })?;

    let stored = factory.in_transaction(|session| {
        let key = session
            .find(UPDATE_ENTITY, id)?
            .ok_or_else(|| not_found(UPDATE_ENTITY, id))?;
        Ok(session.entity(key)?.get("updated_on").clone())
    })?;

    if stored == Value::Timestamp(manual) {
        bail!("manual updated_on survived the update");
    }
    Ok(id)
}

fn dump(path: &Path) -> Result<()> {
    let snapshot = StoreSnapshot::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?
        .with_context(|| format!("No snapshot at {}", path.display()))?;

    let mut out = serde_json::Map::new();
    for (entity_type, rows) in &snapshot.tables {
        let rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|(id, row)| {
                let mut object = serde_json::Map::new();
                object.insert("id".to_string(), serde_json::json!(id.as_i64()));
                for (column, value) in row {
                    object.insert(column.clone(), value_to_json(value));
                }
                serde_json::Value::Object(object)
            })
            .collect();
        out.insert(entity_type.clone(), serde_json::Value::Array(rows));
    }

    println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(out))?);
    Ok(())
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::json!(i),
        Value::Float(f) => serde_json::json!(f),
        Value::Text(s) => serde_json::json!(s),
        Value::Boolean(b) => serde_json::json!(b),
        Value::Timestamp(ts) => serde_json::json!(ts.to_rfc3339()),
    }
}

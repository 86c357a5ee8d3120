use crate::core::{EntityId, Row, Value};

static NULL: Value = Value::Null;

/// In-memory state of one entity: its identity, current fields and the last
/// state known to be in the store.
///
/// The identity is written only by the session, on first insert or on load.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInstance {
    entity_type: String,
    identity: Option<EntityId>,
    fields: Row,
    snapshot: Option<Row>,
}

impl EntityInstance {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            identity: None,
            fields: Row::new(),
            snapshot: None,
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub(crate) fn loaded(entity_type: impl Into<String>, id: EntityId, row: Row) -> Self {
        Self {
            entity_type: entity_type.into(),
            identity: Some(id),
            snapshot: Some(row.clone()),
            fields: row,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn identity(&self) -> Option<EntityId> {
        self.identity
    }

    /// Value of `field`, `NULL` when it was never set.
    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn fields(&self) -> &Row {
        &self.fields
    }

    pub fn snapshot(&self) -> Option<&Row> {
        self.snapshot.as_ref()
    }

    /// Never inserted: the next flush performs an insert.
    pub fn is_new(&self) -> bool {
        self.identity.is_none()
    }

    pub fn is_dirty(&self) -> bool {
        self.snapshot.as_ref() != Some(&self.fields)
    }

    pub(crate) fn fields_mut(&mut self) -> &mut Row {
        &mut self.fields
    }

    pub(crate) fn assign_identity(&mut self, id: EntityId) {
        debug_assert!(self.identity.is_none(), "identity assigned twice");
        self.identity = Some(id);
    }

    pub(crate) fn refresh_snapshot(&mut self) {
        self.snapshot = Some(self.fields.clone());
    }

    /// Adds `NULL` for every column in `columns` the instance does not carry.
    pub(crate) fn fill_missing(&mut self, columns: &Row) {
        for (name, value) in columns {
            self.fields.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }
}

use super::Clock;
use crate::config::InsertGeneration;
use crate::core::{Row, Value};
use crate::mapping::{EntityMapping, FieldMapping, GenerationPolicy};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// The kind of store write a resolution is performed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
}

impl WriteKind {
    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Insert)
    }
}

/// Decides, per field, whether the engine or the caller owns the value that
/// is about to be written.
#[derive(Clone)]
pub struct ValueResolver {
    clock: Arc<dyn Clock>,
    insert_generation: InsertGeneration,
}

impl ValueResolver {
    pub fn new(clock: Arc<dyn Clock>, insert_generation: InsertGeneration) -> Self {
        Self {
            clock,
            insert_generation,
        }
    }

    pub fn insert_generation(&self) -> InsertGeneration {
        self.insert_generation
    }

    /// Value of `field` to write, given its in-memory value and the write
    /// instant.
    ///
    /// `ON_INSERT` fields are only ever produced by the engine on insert; an
    /// update always passes the current value through, which is what lets an
    /// application overwrite a creation timestamp after the row exists.
    pub fn resolve(
        &self,
        field: &FieldMapping,
        current: &Value,
        write: WriteKind,
        now: DateTime<Utc>,
    ) -> Value {
        let Some(generator) = field.generator() else {
            return current.clone();
        };

        match (field.policy(), write) {
            (GenerationPolicy::None, _) => current.clone(),
            (GenerationPolicy::OnInsert, WriteKind::Insert) => {
                let keep_caller = self.insert_generation == InsertGeneration::PreferProvided
                    && !current.is_null();
                if keep_caller {
                    current.clone()
                } else {
                    generator.generate(now)
                }
            }
            (GenerationPolicy::OnInsert, WriteKind::Update) => current.clone(),
            (GenerationPolicy::OnInsertAndUpdate, _) => generator.generate(now),
        }
    }

    /// Applies [`ValueResolver::resolve`] to every generated field of `fields`
    /// using one clock reading, and returns the names whose value changed.
    pub fn apply(&self, mapping: &EntityMapping, fields: &mut Row, write: WriteKind) -> Vec<String> {
        let mut generated = mapping.generated_fields().peekable();
        if generated.peek().is_none() {
            return Vec::new();
        }

        let now = self.clock.now();
        let mut changed = Vec::new();
        for field in generated {
            let slot = fields.entry(field.name().to_string()).or_default();
            let resolved = self.resolve(field, slot, write, now);
            if resolved != *slot {
                *slot = resolved;
                changed.push(field.name().to_string());
            }
        }
        changed
    }
}

impl std::fmt::Debug for ValueResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueResolver")
            .field("insert_generation", &self.insert_generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{FixedClock, ValueGenerator};

    fn instant(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn mapping() -> EntityMapping {
        EntityMapping::builder("Audited")
            .generated(
                "created_on",
                GenerationPolicy::OnInsert,
                ValueGenerator::CurrentTimestamp,
            )
            .generated(
                "updated_on",
                GenerationPolicy::OnInsertAndUpdate,
                ValueGenerator::CurrentTimestamp,
            )
            .field("note", GenerationPolicy::None)
            .build()
            .unwrap()
    }

    fn resolver(mode: InsertGeneration) -> ValueResolver {
        ValueResolver::new(
            Arc::new(FixedClock::new(instant("2024-03-01T12:00:00Z"))),
            mode,
        )
    }

    #[test]
    fn test_none_policy_passes_through() {
        let mapping = mapping();
        let note = mapping.field("note").unwrap();
        let r = resolver(InsertGeneration::PreferProvided);
        let now = instant("2024-03-01T12:00:00Z");

        assert_eq!(r.resolve(note, &Value::Null, WriteKind::Insert, now), Value::Null);
        assert_eq!(
            r.resolve(note, &Value::from("x"), WriteKind::Update, now),
            Value::from("x")
        );
    }

    #[test]
    fn test_on_insert_generates_only_when_unset() {
        let mapping = mapping();
        let created = mapping.field("created_on").unwrap();
        let r = resolver(InsertGeneration::PreferProvided);
        let now = instant("2024-03-01T12:00:00Z");
        let manual = Value::Timestamp(instant("2020-01-10T10:00:00Z"));

        assert_eq!(
            r.resolve(created, &Value::Null, WriteKind::Insert, now),
            Value::Timestamp(now)
        );
        assert_eq!(r.resolve(created, &manual, WriteKind::Insert, now), manual);
    }

    #[test]
    fn test_on_insert_never_touched_on_update() {
        let mapping = mapping();
        let created = mapping.field("created_on").unwrap();
        let now = instant("2024-03-01T12:00:00Z");
        let manual = Value::Timestamp(instant("2020-01-10T10:00:00Z"));

        for mode in [InsertGeneration::PreferProvided, InsertGeneration::AlwaysGenerate] {
            let r = resolver(mode);
            assert_eq!(r.resolve(created, &manual, WriteKind::Update, now), manual);
            assert_eq!(r.resolve(created, &Value::Null, WriteKind::Update, now), Value::Null);
        }
    }

    #[test]
    fn test_always_generate_discards_caller_value_on_insert() {
        let mapping = mapping();
        let created = mapping.field("created_on").unwrap();
        let r = resolver(InsertGeneration::AlwaysGenerate);
        let now = instant("2024-03-01T12:00:00Z");
        let manual = Value::Timestamp(instant("2020-01-10T10:00:00Z"));

        assert_eq!(
            r.resolve(created, &manual, WriteKind::Insert, now),
            Value::Timestamp(now)
        );
    }

    #[test]
    fn test_on_insert_and_update_always_regenerates() {
        let mapping = mapping();
        let updated = mapping.field("updated_on").unwrap();
        let r = resolver(InsertGeneration::PreferProvided);
        let now = instant("2024-03-01T12:00:00Z");
        let manual = Value::Timestamp(instant("2020-01-10T10:00:00Z"));

        assert_eq!(r.resolve(updated, &manual, WriteKind::Insert, now), Value::Timestamp(now));
        assert_eq!(r.resolve(updated, &manual, WriteKind::Update, now), Value::Timestamp(now));
    }

    #[test]
    fn test_apply_uses_one_instant_and_reports_changes() {
        let mapping = mapping();
        let r = resolver(InsertGeneration::PreferProvided);
        let mut fields = mapping.empty_row();

        let changed = r.apply(&mapping, &mut fields, WriteKind::Insert);
        assert_eq!(changed, vec!["created_on".to_string(), "updated_on".to_string()]);
        assert_eq!(fields.get("created_on"), fields.get("updated_on"));

        let changed = r.apply(&mapping, &mut fields, WriteKind::Update);
        assert!(changed.is_empty(), "same instant, nothing new to write");
    }
}

use super::GenerationPolicy;
use crate::core::{OrmError, Result, Row};
use crate::generation::ValueGenerator;
use std::collections::HashSet;

/// Mapping of one entity field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    name: String,
    policy: GenerationPolicy,
    generator: Option<ValueGenerator>,
}

impl FieldMapping {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> GenerationPolicy {
        self.policy
    }

    /// Present for every field whose policy is not [`GenerationPolicy::None`].
    pub fn generator(&self) -> Option<ValueGenerator> {
        self.generator
    }
}

/// Immutable description of a mapped entity type.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    entity_type: String,
    id_field: String,
    fields: Vec<FieldMapping>,
}

impl EntityMapping {
    pub fn builder(entity_type: impl Into<String>) -> EntityMappingBuilder {
        EntityMappingBuilder {
            entity_type: entity_type.into(),
            id_field: "id".to_string(),
            fields: Vec::new(),
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Fields in declaration order, excluding the identifier.
    pub fn fields(&self) -> &[FieldMapping] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn generated_fields(&self) -> impl Iterator<Item = &FieldMapping> {
        self.fields.iter().filter(|field| field.policy.is_generated())
    }

    pub fn has_update_generated_fields(&self) -> bool {
        self.fields.iter().any(|field| field.policy.regenerates_on_update())
    }

    /// Row with every mapped column set to `NULL`.
    pub fn empty_row(&self) -> Row {
        self.fields
            .iter()
            .map(|field| (field.name.clone(), Default::default()))
            .collect()
    }

    /// Rejects columns the mapping does not know and writes to the identifier.
    pub fn check_row(&self, row: &Row) -> Result<()> {
        for name in row.keys() {
            if *name == self.id_field {
                return Err(OrmError::IdentityImmutable {
                    entity_type: self.entity_type.clone(),
                    field: name.clone(),
                });
            }
            if self.field(name).is_none() {
                return Err(OrmError::UnknownField {
                    entity_type: self.entity_type.clone(),
                    field: name.clone(),
                });
            }
        }
        Ok(())
    }
}

pub struct EntityMappingBuilder {
    entity_type: String,
    id_field: String,
    fields: Vec<FieldMapping>,
}

impl EntityMappingBuilder {
    /// Name of the identifier field, `id` unless overridden.
    pub fn id(mut self, name: impl Into<String>) -> Self {
        self.id_field = name.into();
        self
    }

    /// Declares a field with `policy`; generated policies also need a generator,
    /// see [`EntityMappingBuilder::generated`].
    pub fn field(mut self, name: impl Into<String>, policy: GenerationPolicy) -> Self {
        self.fields.push(FieldMapping {
            name: name.into(),
            policy,
            generator: None,
        });
        self
    }

    pub fn generated(
        mut self,
        name: impl Into<String>,
        policy: GenerationPolicy,
        generator: ValueGenerator,
    ) -> Self {
        self.fields.push(FieldMapping {
            name: name.into(),
            policy,
            generator: Some(generator),
        });
        self
    }

    pub fn build(self) -> Result<EntityMapping> {
        if self.entity_type.trim().is_empty() {
            return Err(OrmError::Mapping("entity type name cannot be empty".to_string()));
        }
        if self.id_field.trim().is_empty() {
            return Err(OrmError::Mapping(format!(
                "entity '{}' has an empty identifier field name",
                self.entity_type
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name == self.id_field {
                return Err(OrmError::Mapping(format!(
                    "field '{}' of '{}' clashes with the identifier",
                    field.name, self.entity_type
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(OrmError::Mapping(format!(
                    "field '{}' declared twice on '{}'",
                    field.name, self.entity_type
                )));
            }
            match (field.policy.is_generated(), field.generator.is_some()) {
                (true, false) => {
                    return Err(OrmError::Mapping(format!(
                        "field '{}' of '{}' is {} but has no generator",
                        field.name, self.entity_type, field.policy
                    )));
                }
                (false, true) => {
                    return Err(OrmError::Mapping(format!(
                        "field '{}' of '{}' has a generator but policy NONE",
                        field.name, self.entity_type
                    )));
                }
                _ => {}
            }
        }

        Ok(EntityMapping {
            entity_type: self.entity_type,
            id_field: self.id_field,
            fields: self.fields,
        })
    }
}

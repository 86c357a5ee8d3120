use super::EntityMapping;
use crate::core::{OrmError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only catalog of mapped entity types, shared by every session.
#[derive(Debug, Default, Clone)]
pub struct EntityRegistry {
    mappings: HashMap<String, Arc<EntityMapping>>,
}

impl EntityRegistry {
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder {
            mappings: Vec::new(),
        }
    }

    pub fn lookup(&self, entity_type: &str) -> Result<&Arc<EntityMapping>> {
        self.mappings
            .get(entity_type)
            .ok_or_else(|| OrmError::UnmappedType(entity_type.to_string()))
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.mappings.contains_key(entity_type)
    }

    pub fn entity_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.mappings.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

pub struct EntityRegistryBuilder {
    mappings: Vec<EntityMapping>,
}

impl EntityRegistryBuilder {
    pub fn register(mut self, mapping: EntityMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn build(self) -> Result<EntityRegistry> {
        let mut mappings = HashMap::with_capacity(self.mappings.len());
        for mapping in self.mappings {
            let name = mapping.entity_type().to_string();
            if mappings.contains_key(&name) {
                return Err(OrmError::Mapping(format!(
                    "entity type '{}' registered twice",
                    name
                )));
            }
            mappings.insert(name, Arc::new(mapping));
        }
        Ok(EntityRegistry { mappings })
    }
}

//! Entity declarations: which types are mapped and how each field is generated.

pub mod entity;
pub mod policy;
pub mod registry;

pub use entity::{EntityMapping, EntityMappingBuilder, FieldMapping};
pub use policy::GenerationPolicy;
pub use registry::{EntityRegistry, EntityRegistryBuilder};

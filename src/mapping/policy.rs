use serde::{Deserialize, Serialize};
use std::fmt;

/// When, if ever, the engine computes a field instead of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GenerationPolicy {
    /// Plain application-owned field.
    #[default]
    None,
    /// Computed once when the row is inserted, a normal field afterwards.
    OnInsert,
    /// Recomputed on the insert and on every update that reaches the store.
    OnInsertAndUpdate,
}

impl GenerationPolicy {
    pub fn is_generated(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether the engine touches the field on updates.
    pub fn regenerates_on_update(&self) -> bool {
        matches!(self, Self::OnInsertAndUpdate)
    }
}

impl fmt::Display for GenerationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::OnInsert => write!(f, "ON_INSERT"),
            Self::OnInsertAndUpdate => write!(f, "ON_INSERT_AND_UPDATE"),
        }
    }
}

use super::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Column name to value, ordered by name so row diffs and dumps are stable.
pub type Row = BTreeMap<String, Value>;

/// Surrogate key assigned by the store on first insert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EntityId(pub i64);

impl EntityId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Columns of `current` whose value differs from `previous`.
///
/// Columns missing from `previous` count as changed; columns only present in
/// `previous` are ignored because rows never drop mapped columns.
pub fn row_delta(previous: &Row, current: &Row) -> Row {
    current
        .iter()
        .filter(|(name, value)| previous.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

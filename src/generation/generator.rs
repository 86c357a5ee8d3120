use crate::core::Value;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// How an engine-owned field computes its value from the write instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueGenerator {
    /// The write instant as a timestamp.
    CurrentTimestamp,
    /// The write instant truncated to midnight UTC.
    CurrentDate,
    /// Milliseconds since the Unix epoch as an integer.
    CurrentEpochMillis,
}

impl ValueGenerator {
    pub fn generate(&self, now: DateTime<Utc>) -> Value {
        match self {
            Self::CurrentTimestamp => Value::Timestamp(now),
            Self::CurrentDate => Value::Timestamp(now.date_naive().and_time(NaiveTime::MIN).and_utc()),
            Self::CurrentEpochMillis => Value::Integer(now.timestamp_millis()),
        }
    }
}

use crate::core::{OrmError, Result};
use std::fmt;
use std::str::FromStr;

pub const SETTING_INSERT_GENERATION: &str = "memorm.insert_generation";
pub const SETTING_UPDATE_TRIGGER: &str = "memorm.update_trigger";
pub const SETTING_SHOW_WRITES: &str = "memorm.show_writes";

/// What an insert does with a caller-supplied value in an `ON_INSERT` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertGeneration {
    /// Keep a non-null caller value, generate only when the field is unset.
    #[default]
    PreferProvided,
    /// Always generate at insert, discarding whatever the caller set.
    AlwaysGenerate,
}

/// Which managed, already persisted instances a flush updates.
///
/// `Dirty` is the default so that a second flush with no mutation in between
/// writes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateTrigger {
    /// Only instances whose fields differ from their snapshot.
    #[default]
    Dirty,
    /// Dirty instances plus every instance carrying an
    /// `ON_INSERT_AND_UPDATE` field, which is then touched on every flush.
    Always,
}

impl FromStr for InsertGeneration {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "prefer-provided" => Ok(Self::PreferProvided),
            "always-generate" => Ok(Self::AlwaysGenerate),
            other => Err(OrmError::Config(format!(
                "unknown insert generation mode '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for InsertGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreferProvided => write!(f, "prefer-provided"),
            Self::AlwaysGenerate => write!(f, "always-generate"),
        }
    }
}

impl FromStr for UpdateTrigger {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dirty" => Ok(Self::Dirty),
            "always" => Ok(Self::Always),
            other => Err(OrmError::Config(format!(
                "unknown update trigger '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for UpdateTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dirty => write!(f, "dirty"),
            Self::Always => write!(f, "always"),
        }
    }
}

/// Engine configuration shared by every session of a factory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrmConfig {
    pub insert_generation: InsertGeneration,
    pub update_trigger: UpdateTrigger,
    /// Log every store write at INFO instead of DEBUG.
    pub show_writes: bool,
}

impl OrmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_generation(mut self, mode: InsertGeneration) -> Self {
        self.insert_generation = mode;
        self
    }

    pub fn update_trigger(mut self, trigger: UpdateTrigger) -> Self {
        self.update_trigger = trigger;
        self
    }

    pub fn show_writes(mut self, enabled: bool) -> Self {
        self.show_writes = enabled;
        self
    }

    /// Builds a config from string settings, starting from the defaults.
    ///
    /// Unknown keys are rejected rather than ignored.
    ///
    /// ```
    /// # use memorm::{OrmConfig, InsertGeneration};
    /// let config = OrmConfig::from_settings([
    ///     ("memorm.insert_generation", "always-generate"),
    ///     ("memorm.show_writes", "true"),
    /// ])
    /// .unwrap();
    /// assert_eq!(config.insert_generation, InsertGeneration::AlwaysGenerate);
    /// assert!(config.show_writes);
    /// ```
    pub fn from_settings<'a, I>(settings: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in settings {
            match key {
                SETTING_INSERT_GENERATION => config.insert_generation = value.parse()?,
                SETTING_UPDATE_TRIGGER => config.update_trigger = value.parse()?,
                SETTING_SHOW_WRITES => {
                    config.show_writes = value.trim().parse().map_err(|_| {
                        OrmError::Config(format!(
                            "setting '{}' expects true or false, got '{}'",
                            key, value
                        ))
                    })?
                }
                other => {
                    return Err(OrmError::Config(format!("unknown setting '{}'", other)));
                }
            }
        }
        Ok(config)
    }

    pub fn to_settings(&self) -> Vec<(&'static str, String)> {
        vec![
            (SETTING_INSERT_GENERATION, self.insert_generation.to_string()),
            (SETTING_UPDATE_TRIGGER, self.update_trigger.to_string()),
            (SETTING_SHOW_WRITES, self.show_writes.to_string()),
        ]
    }
}

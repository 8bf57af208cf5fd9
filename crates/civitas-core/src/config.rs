//! Configuration loading and typed config structures for the Civitas
//! simulation.
//!
//! The canonical configuration lives in `civitas-config.yaml`. This module
//! defines strongly-typed structs that mirror the YAML structure and a
//! loader that reads it. Every section is optional; an empty document is a
//! valid (if uneventful) city.
//!
//! ```yaml
//! resource_capacities:
//!   power: 10
//!   water: 20
//! initial_entities:
//!   - kind: citizen
//!     subtype: worker
//!     count: 12
//! scheduler:
//!   policy: first_come
//! simulation:
//!   max_ticks: 100
//! logging:
//!   level: info
//!   format: pretty
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use civitas_types::{EntityKind, ResourceKind};

use crate::scheduler::AllocationPolicy;

/// Environment variable that overrides `logging.level`.
pub const LOG_LEVEL_ENV: &str = "CIVITAS_LOG";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SimulationConfig {
    /// Capacity of each resource pool. Unlisted resources get zero.
    #[serde(default)]
    pub resource_capacities: BTreeMap<ResourceKind, u64>,

    /// Entities created at initialization, in order.
    #[serde(default)]
    pub initial_entities: Vec<InitialEntity>,

    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Run boundaries.
    #[serde(default)]
    pub simulation: SimulationBoundsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `CIVITAS_LOG` overrides `logging.level` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.logging.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML or
    /// names an unknown resource or entity kind.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Builder-style helper: set the capacity of one resource.
    #[must_use]
    pub fn with_capacity(mut self, resource: ResourceKind, capacity: u64) -> Self {
        self.resource_capacities.insert(resource, capacity);
        self
    }

    /// Builder-style helper: add `count` initial entities.
    #[must_use]
    pub fn with_entities(mut self, kind: EntityKind, subtype: &str, count: u32) -> Self {
        self.initial_entities.push(InitialEntity {
            kind,
            subtype: subtype.to_owned(),
            count,
        });
        self
    }
}

/// One line of the initial population.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitialEntity {
    /// Entity kind.
    pub kind: EntityKind,

    /// Subtype name, validated against `kind` at initialization.
    pub subtype: String,

    /// How many to create.
    #[serde(default = "default_count")]
    pub count: u32,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// How contended resources are allocated.
    #[serde(default)]
    pub policy: AllocationPolicy,
}

/// Run boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct SimulationBoundsConfig {
    /// Stop the engine once this tick has committed (0 = unlimited).
    #[serde(default)]
    pub max_ticks: u64,

    /// Real-time milliseconds between ticks when driven by the runner.
    #[serde(default)]
    pub tick_interval_ms: u64,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (e.g. `info`, `civitas_core=debug`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Apply `CIVITAS_LOG` if it is set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV)
            && !level.trim().is_empty()
        {
            self.level = level;
        }
    }
}

const fn default_count() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_owned()
}

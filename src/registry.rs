//! ==============================================================================
//! registry.rs - local sensor registry
//! ==============================================================================
//!
//! purpose:
//!     loads the set of locally attached sensors from a toml file, once, at
//!     startup. each top-level table is one sensor:
//!
//!         [tank_a]
//!         pin = 17
//!         id = "tank-a"          # optional, defaults to the table key
//!         name = "Tank A"        # optional, defaults to the id
//!         wait = 2               # optional poll interval (seconds), default 1
//!         stuck_threshold = 10   # optional window capacity, default 10
//!
//!     `poll_interval_seconds` and `window_capacity` are accepted as aliases.
//!
//! relationships:
//!     - used by: lifecycle.rs (load), scheduler.rs (one worker per entry)
//!
//! ==============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::debounce::DEFAULT_CAPACITY;
use crate::domain::{is_valid_sensor_id, SensorConfig};
use crate::error::ConfigError;

const DEFAULT_WAIT_SECONDS: f64 = 1.0;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SensorEntry {
    pin: Option<i64>,
    id: Option<String>,
    name: Option<String>,
    #[serde(alias = "poll_interval_seconds")]
    wait: Option<f64>,
    #[serde(alias = "window_capacity")]
    stuck_threshold: Option<i64>,
}

/// Immutable after load; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    sensors: BTreeMap<String, SensorConfig>,
}

impl SensorRegistry {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, "local sensors config")
    }

    fn parse(content: &str, what: &str) -> Result<Self, ConfigError> {
        let entries: BTreeMap<String, SensorEntry> =
            toml::from_str(content).map_err(|source| ConfigError::Parse {
                what: what.to_string(),
                source,
            })?;

        let mut sensors = BTreeMap::new();
        for (key, entry) in entries {
            let config = entry.into_config(&key)?;
            if sensors.contains_key(&config.id) {
                return Err(ConfigError::DuplicateId(config.id));
            }
            sensors.insert(config.id.clone(), config);
        }

        Ok(Self { sensors })
    }

    pub fn get(&self, id: &str) -> Option<&SensorConfig> {
        self.sensors.get(id)
    }

    /// sensors in id order
    pub fn iter(&self) -> impl Iterator<Item = &SensorConfig> {
        self.sensors.values()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

impl SensorEntry {
    fn into_config(self, key: &str) -> Result<SensorConfig, ConfigError> {
        let id = self.id.unwrap_or_else(|| key.to_string());
        if id.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                sensor: key.to_string(),
                field: "id",
                reason: "must not be empty".to_string(),
            });
        }
        if !is_valid_sensor_id(&id) {
            return Err(ConfigError::InvalidField {
                sensor: key.to_string(),
                field: "id",
                reason: format!("{:?} is not usable as a storage directory name", id),
            });
        }

        let pin = self.pin.ok_or_else(|| ConfigError::MissingPin(id.clone()))?;
        let pin = u8::try_from(pin).map_err(|_| ConfigError::InvalidField {
            sensor: id.clone(),
            field: "pin",
            reason: format!("{} is not a valid line number", pin),
        })?;

        let wait = self.wait.unwrap_or(DEFAULT_WAIT_SECONDS);
        let poll_interval = Duration::try_from_secs_f64(wait)
            .ok()
            .filter(|interval| !interval.is_zero())
            .ok_or_else(|| ConfigError::InvalidField {
                sensor: id.clone(),
                field: "wait",
                reason: format!("{} is not a usable number of seconds", wait),
            })?;

        let capacity = self.stuck_threshold.unwrap_or(DEFAULT_CAPACITY as i64);
        if capacity <= 0 {
            return Err(ConfigError::InvalidField {
                sensor: id,
                field: "stuck_threshold",
                reason: format!("{} is not a positive integer", capacity),
            });
        }

        Ok(SensorConfig {
            name: self.name.unwrap_or_else(|| id.clone()),
            id,
            pin,
            poll_interval,
            window_capacity: capacity as usize,
        })
    }
}

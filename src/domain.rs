use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// classified state of a toggle sensor over its recent reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// every read in the window was low
    Empty,
    /// the window holds both levels
    Ok,
    /// every read in the window was high
    Stuck,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Empty, Status::Ok, Status::Stuck];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Empty => "empty",
            Status::Ok => "ok",
            Status::Stuck => "stuck",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sensor status '{0}'")]
pub struct UnknownStatus(pub String);

/// case-sensitive: only the exact lowercase names are accepted
impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// sensor ids name a storage directory, so they must be one plain path segment
pub fn is_valid_sensor_id(id: &str) -> bool {
    !(id.is_empty()
        || id == "."
        || id == ".."
        || id.chars().any(|c| c == '/' || c == '\\' || c == '\0'))
}

/// one classified measurement, either polled locally or reported remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub sensor_id: String,
    pub sensor_name: String,
    pub status: Status,
    pub timestamp: DateTime<Local>,
}

impl Measurement {
    /// stamp a measurement with the current wall-clock time
    pub fn now(sensor_id: impl Into<String>, sensor_name: impl Into<String>, status: Status) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            sensor_name: sensor_name.into(),
            status,
            timestamp: Local::now(),
        }
    }
}

/// per-sensor parameters of a locally attached sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorConfig {
    /// stable identifier, also the storage directory name
    pub id: String,
    /// display name (defaults to the id)
    pub name: String,
    /// BCM line number
    pub pin: u8,
    pub poll_interval: Duration,
    pub window_capacity: usize,
}

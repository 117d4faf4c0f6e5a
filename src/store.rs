//! ==============================================================================
//! store.rs - append-only measurement storage
//! ==============================================================================
//!
//! purpose:
//!     persists every classified measurement as its own record. records are
//!     never rewritten or deleted.
//!
//! layout (JsonFileStore):
//!
//!     <root>/
//!       tank-a/
//!         20240312101502123456-0000.json
//!         20240312101503124001-0000.json
//!         20240312101503124001-0001.json   <- same microsecond, next sequence
//!
//!     names carry the UTC instant, so they keep sorting in creation order
//!     across DST changes; the record body keeps the local timestamp.
//!     a record is written to a temp
//!     file in the sensor directory and published with a no-clobber link, so
//!     readers never see a half-written file and two writers never collide.
//!
//! relationships:
//!     - used by: scheduler.rs (local path), gateway.rs (remote path)
//!
//! ==============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::{is_valid_sensor_id, Measurement, Status};
use crate::error::StoreError;

/// give up after this many same-instant collisions for one sensor
const MAX_SEQUENCE: u32 = 10_000;

/// Identity of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub sensor_id: String,
    pub name: String,
}

/// on-disk form of a measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub timestamp: String,
}

impl From<&Measurement> for StoredRecord {
    fn from(m: &Measurement) -> Self {
        Self {
            id: m.sensor_id.clone(),
            name: m.sensor_name.clone(),
            status: m.status,
            timestamp: m.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
        }
    }
}

/// Append-only keyed store. Implementations must be safe to call from many
/// threads at once, including for the same sensor.
pub trait MeasurementStore: Send + Sync {
    fn append(&self, measurement: &Measurement) -> Result<RecordKey, StoreError>;
}

/// One JSON file per measurement, one directory per sensor.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// create the storage root if it does not exist yet
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, key: &RecordKey) -> PathBuf {
        self.root.join(&key.sensor_id).join(&key.name)
    }
}

impl MeasurementStore for JsonFileStore {
    fn append(&self, measurement: &Measurement) -> Result<RecordKey, StoreError> {
        if !is_valid_sensor_id(&measurement.sensor_id) {
            return Err(StoreError::InvalidSensorId(measurement.sensor_id.clone()));
        }

        let dir = self.root.join(&measurement.sensor_id);
        // create_dir_all tolerates a concurrent creator
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let body = serde_json::to_vec(&StoredRecord::from(measurement))?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
        tmp.write_all(&body).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| StoreError::io(tmp.path(), e))?;

        let stem = measurement.timestamp.naive_utc().format("%Y%m%d%H%M%S%6f").to_string();
        for seq in 0..MAX_SEQUENCE {
            let name = format!("{}-{:04}.json", stem, seq);
            let target = dir.join(&name);
            match tmp.persist_noclobber(&target) {
                Ok(_) => {
                    tracing::debug!(path = %target.display(), "Stored measurement");
                    return Ok(RecordKey {
                        sensor_id: measurement.sensor_id.clone(),
                        name,
                    });
                }
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                    tmp = e.file;
                }
                Err(e) => return Err(StoreError::io(target, e.error)),
            }
        }

        Err(StoreError::io(
            dir,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("no free record name for {}", stem),
            ),
        ))
    }
}

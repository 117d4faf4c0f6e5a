//! ==============================================================================
//! error.rs - error taxonomy
//! ==============================================================================
//!
//! purpose:
//!     one error type per concern, so each boundary can decide what is fatal.
//!
//! structure:
//!     - ConfigError: startup only, the process refuses to start.
//!     - ValidationError: one inbound report was rejected, never fatal.
//!     - StoreError: a single record write failed, logged by the caller.
//!     - PreconditionError: a contract violation inside the crate (a bug).
//!
//!     hardware errors live next to the input-line collaborator (hal.rs).
//!
//! ==============================================================================

use std::path::PathBuf;

/// Invalid or unreadable configuration. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("duplicate sensor id '{0}'")]
    DuplicateId(String),

    #[error("sensor '{0}' has no 'pin'")]
    MissingPin(String),

    #[error("invalid value for '{field}' on sensor '{sensor}': {reason}")]
    InvalidField {
        sensor: String,
        field: &'static str,
        reason: String,
    },

    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("bad command line: {0}")]
    InvalidArgument(String),

    #[error("failed to prepare storage root {path}: {source}")]
    StorageRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A report rejected at the ingestion boundary, with every violated rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid request: {}", messages.join("; "))]
pub struct ValidationError {
    pub messages: Vec<String>,
}

/// A failed record write.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid sensor id '{0}'")]
    InvalidSensorId(String),

    #[error("failed to serialize measurement: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A caller broke an internal contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    #[error("cannot classify an empty debounce window")]
    EmptyWindow,
}

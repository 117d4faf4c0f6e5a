//! ==============================================================================
//! config.rs - Service Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `sensor-collect.toml`.
//!     loads it from file (or defaults), then applies environment overrides.
//!     resolved once at startup and immutable afterwards.
//!
//! structure:
//!     - StorageConfig: where measurement records go (required).
//!     - NetworkConfig: bind address, http and udp ports.
//!     - SensorsConfig: location of the local sensors file (optional).
//!     - LoggingConfig: default log filter when RUST_LOG is unset.
//!
//! environment overrides:
//!     DATA_FOLDER, LOCAL_SENSORS_CONFIG_FILE, HTTP_PORT, UDP_PORT, BIND_ADDRESS
//!
//! command line (wins over the environment):
//!     -d, --data-folder <DIR>
//!     -c, --local-sensors-config-file <FILE>
//!
//! ==============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// points at an explicit config file, skipping the search paths
pub const CONFIG_PATH_VAR: &str = "SENSOR_COLLECT_CONFIG";

const DEFAULT_HTTP_PORT: u16 = 5000;
const DEFAULT_UDP_PORT: u16 = 12345;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    pub data_folder: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SensorsConfig {
    /// no file means no local sensors, only remote reports
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_udp_port() -> u16 {
    DEFAULT_UDP_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: DEFAULT_HTTP_PORT,
            udp_port: DEFAULT_UDP_PORT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl ServiceConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            what: path.display().to_string(),
            source,
        })
    }

    /// Load from `$SENSOR_COLLECT_CONFIG`, the usual locations, or defaults
    ///
    /// a file that exists but does not parse is an error, never a fallback.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_VAR) {
            let config = Self::load(&explicit)?;
            println!("[CONFIG] Loaded from {}", explicit);
            return Ok(config);
        }

        let paths = [
            PathBuf::from("config").join("sensor-collect.toml"),
            PathBuf::from("..").join("config").join("sensor-collect.toml"),
        ];

        for path in &paths {
            if path.exists() {
                let config = Self::load(path)?;
                println!("[CONFIG] Loaded from {}", path.display());
                return Ok(config);
            }
        }

        println!("[CONFIG] No config file found - using defaults and environment");
        Ok(Self::default())
    }

    /// apply overrides from `lookup` (normally `std::env::var`)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(folder) = lookup("DATA_FOLDER").filter(|v| !v.is_empty()) {
            self.storage.data_folder = Some(PathBuf::from(folder));
        }
        if let Some(file) = lookup("LOCAL_SENSORS_CONFIG_FILE").filter(|v| !v.is_empty()) {
            self.sensors.config_file = Some(PathBuf::from(file));
        }
        if let Some(port) = lookup("HTTP_PORT") {
            self.network.http_port = parse_env("HTTP_PORT", &port)?;
        }
        if let Some(port) = lookup("UDP_PORT") {
            self.network.udp_port = parse_env("UDP_PORT", &port)?;
        }
        if let Some(addr) = lookup("BIND_ADDRESS") {
            self.network.bind_address = parse_env("BIND_ADDRESS", &addr)?;
        }
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// apply `-d/--data-folder` and `-c/--local-sensors-config-file`
    ///
    /// both `--flag value` and `--flag=value` are accepted.
    pub fn apply_args<I>(&mut self, args: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
                _ => (arg.clone(), None),
            };
            let slot = match flag.as_str() {
                "-d" | "--data-folder" => &mut self.storage.data_folder,
                "-c" | "--local-sensors-config-file" => &mut self.sensors.config_file,
                _ => return Err(ConfigError::InvalidArgument(format!("unknown option '{}'", flag))),
            };
            let value = inline
                .or_else(|| args.next())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::InvalidArgument(format!("{} needs a value", flag)))?;
            *slot = Some(PathBuf::from(value));
        }
        Ok(())
    }

    /// file, then environment, then command line; validated. the one call `main` makes
    pub fn resolve() -> Result<Self, ConfigError> {
        let mut config = Self::load_or_default()?;
        config.apply_env_overrides()?;
        config.apply_args(std::env::args().skip(1))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.data_folder().map(|_| ())
    }

    pub fn data_folder(&self) -> Result<&Path, ConfigError> {
        self.storage
            .data_folder
            .as_deref()
            .ok_or(ConfigError::Missing("DATA_FOLDER (storage.data_folder)"))
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.bind_address, self.network.http_port)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.bind_address, self.network.udp_port)
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        let sensors = self
            .sensors
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string());
        let data = self
            .storage
            .data_folder
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        tracing::info!(
            data_folder = %data,
            local_sensors = %sensors,
            http = %self.http_addr(),
            udp = %self.udp_addr(),
            log_level = %self.logging.level,
            "Service configuration",
        );
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.network.http_port, 5000);
        assert_eq!(config.network.udp_port, 12345);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_err(), "data folder is required");
    }

    #[test]
    fn test_file_values() {
        let src = r#"
[storage]
data_folder = "/tmp/data"

[network]
bind_address = "127.0.0.1"
udp_port = 9999

[sensors]
config_file = "local.toml"
"#;
        let config: ServiceConfig = toml::from_str(src).unwrap();
        assert_eq!(config.data_folder().unwrap(), Path::new("/tmp/data"));
        assert_eq!(config.udp_addr(), "127.0.0.1:9999".parse().unwrap());
        assert_eq!(config.http_addr(), "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.sensors.config_file, Some(PathBuf::from("local.toml")));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config: ServiceConfig =
            toml::from_str("[storage]\ndata_folder = \"/from/file\"\n").unwrap();
        config
            .apply_overrides(env(&[
                ("DATA_FOLDER", "/from/env"),
                ("UDP_PORT", "4000"),
                ("LOCAL_SENSORS_CONFIG_FILE", "/etc/sensors.toml"),
            ]))
            .unwrap();

        assert_eq!(config.data_folder().unwrap(), Path::new("/from/env"));
        assert_eq!(config.network.udp_port, 4000);
        assert_eq!(config.sensors.config_file, Some(PathBuf::from("/etc/sensors.toml")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_env_port_rejected() {
        let mut config = ServiceConfig::default();
        let err = config.apply_overrides(env(&[("UDP_PORT", "not-a-port")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name: "UDP_PORT", .. }));
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_args_win_over_env() {
        let mut config = ServiceConfig::default();
        config.apply_overrides(env(&[("DATA_FOLDER", "/from/env")])).unwrap();
        config
            .apply_args(args(&["-d", "/from/args", "--local-sensors-config-file=sensors.toml"]))
            .unwrap();

        assert_eq!(config.data_folder().unwrap(), Path::new("/from/args"));
        assert_eq!(config.sensors.config_file, Some(PathBuf::from("sensors.toml")));

        config.apply_args(args(&["--data-folder", "/long", "-c", "other.toml"])).unwrap();
        assert_eq!(config.data_folder().unwrap(), Path::new("/long"));
        assert_eq!(config.sensors.config_file, Some(PathBuf::from("other.toml")));
    }

    #[test]
    fn test_bad_args_rejected() {
        let mut config = ServiceConfig::default();
        assert!(matches!(
            config.apply_args(args(&["--verbose"])),
            Err(ConfigError::InvalidArgument(_))
        ));
        assert!(matches!(config.apply_args(args(&["-d"])), Err(ConfigError::InvalidArgument(_))));
        assert!(config.storage.data_folder.is_none());
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(toml::from_str::<ServiceConfig>("[plugins]\nx = 1\n").is_err());
    }
}

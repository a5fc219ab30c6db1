//! Manages the `/etc/nfsess.conf` file.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

/// Where the configuration lives unless `NFSESS_CONFIG` says otherwise.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/nfsess.conf";

/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_ENV: &str = "NFSESS_CONFIG";

fn default_spool_directory() -> PathBuf {
    PathBuf::from("in")
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("out")
}

fn default_uplinks() -> Vec<u32> {
    vec![100, 101]
}

fn default_local_asn() -> u32 {
    111111
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_batch_lines() -> usize {
    16384
}

/// Top-level configuration file for the flow summariser.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Directory into which raw flow exports are dropped.
    #[serde(default = "default_spool_directory")]
    pub spool_directory: PathBuf,

    /// Directory receiving the per-file session reports.
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Inputs that could not be processed are moved here. Defaults to
    /// `.failed` inside the spool directory.
    pub failed_directory: Option<PathBuf>,

    /// `label;CIDR` list describing the monitored subnets.
    pub subnet_map: PathBuf,

    /// Interface ids that face the upstream network.
    #[serde(default = "default_uplinks")]
    pub uplinks: Vec<u32>,

    /// Our own AS number. Flows whose peer is in this AS are internal.
    #[serde(default = "default_local_asn")]
    pub local_asn: u32,

    /// Fallback spool polling period, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Size of the classification worker pool. 0 means one per CPU.
    #[serde(default)]
    pub worker_threads: usize,

    /// How many input lines are handed to the worker pool at once.
    #[serde(default = "default_batch_lines")]
    pub batch_lines: usize,
}

impl Config {
    /// The configuration path: `$NFSESS_CONFIG` if set, otherwise
    /// `/etc/nfsess.conf`.
    pub fn path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Loads and validates the configuration from [`Config::path`].
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(&Self::path())
    }

    /// Loads and validates the configuration from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            error!("{:?} does not exist!", path);
            return Err(ConfigError::ConfigDoesNotExist(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            error!("Unable to read contents of {:?}", path);
            ConfigError::CannotReadFile(e.to_string())
        })?;
        let config = Self::load_from_string(&raw)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parses and validates a configuration held in memory.
    pub fn load_from_string(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml_edit::de::from_str(raw).map_err(|e| {
            error!("Unable to parse TOML configuration");
            error!("Full error: {:?}", e);
            ConfigError::CannotParseToml(e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Test if a configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.uplinks.is_empty() {
            return Err(ConfigError::Invalid("at least one uplink interface is required".to_string()));
        }
        if self.subnet_map.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("subnet_map must be set".to_string()));
        }
        if self.batch_lines == 0 {
            return Err(ConfigError::Invalid("batch_lines must be greater than zero".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// The uplink interface ids as a lookup set.
    pub fn uplink_set(&self) -> HashSet<u32> {
        self.uplinks.iter().copied().collect()
    }

    /// Where failed inputs are quarantined.
    pub fn failed_directory(&self) -> PathBuf {
        self.failed_directory
            .clone()
            .unwrap_or_else(|| self.spool_directory.join(".failed"))
    }
}

/// Errors raised while loading `/etc/nfsess.conf`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file {0} does not exist")]
    ConfigDoesNotExist(String),
    #[error("Unable to read configuration file: {0}")]
    CannotReadFile(String),
    #[error("Unable to parse TOML: {0}")]
    CannotParseToml(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

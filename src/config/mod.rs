//! Configuration
//!
//! Loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/tether/config.toml)
//! 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod sections;
mod serialization;


pub use sections::{
    BusConfig, FileBus, FileLogging, FileRuntime, FileStore, LogRotation, LoggingConfig,
    RuntimeConfig, StoreConfig, DEFAULT_TICK_INTERVAL,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variables that override the file
pub const ENV_LOG_LEVEL: &str = "TETHER_LOG_LEVEL";
pub const ENV_BUS_LOG_CAPACITY: &str = "TETHER_BUS_LOG_CAPACITY";
pub const ENV_TOOL_GRACE_MS: &str = "TETHER_TOOL_GRACE_MS";
pub const ENV_TICK_INTERVAL_MS: &str = "TETHER_TICK_INTERVAL_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("cannot write config file {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub bus: BusConfig,
    pub store: StoreConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

/// Config file structure, every field optional
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    pub bus: Option<FileBus>,
    pub store: Option<FileStore>,
    pub runtime: Option<FileRuntime>,
    pub logging: Option<FileLogging>,
}

impl FileConfig {
    /// Parse a config file; a missing file is not an error
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// ~/.config/tether/config.toml, Unix-style on every platform
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("tether").join("config.toml"))
    }

    /// Load from the default path with environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::resolve(FileConfig::default(), env_var)),
        }
    }

    /// Load from `path` with environment overrides
    ///
    /// A missing file yields the defaults. An unreadable or malformed one is
    /// an error: a broken config should fail loudly, not silently fall back.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::resolve(FileConfig::read(path)?, env_var))
    }

    /// Merge env > file > defaults; `env` looks variables up by name
    pub(crate) fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut bus = BusConfig::from_file(file.bus);
        let mut store = StoreConfig::from_file(file.store);
        let mut runtime = RuntimeConfig::from_file(file.runtime);
        let mut logging = LoggingConfig::from_file(file.logging);

        if let Some(level) = env(ENV_LOG_LEVEL).filter(|l| !l.trim().is_empty()) {
            logging.level = level;
        }
        if let Some(capacity) = env(ENV_BUS_LOG_CAPACITY).and_then(|v| v.parse().ok()) {
            bus.log_capacity = capacity;
        }
        if let Some(ms) = env(ENV_TOOL_GRACE_MS).and_then(|v| v.parse().ok()) {
            store.tool_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = env(ENV_TICK_INTERVAL_MS)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            runtime.tick_interval = Duration::from_millis(ms);
        }

        Self {
            bus,
            store,
            runtime,
            logging,
        }
    }

    /// Write the default config to `path` unless a file is already there
    ///
    /// Returns whether a file was written.
    pub fn write_default(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, Self::default().to_toml()).map_err(write_err)?;
        Ok(true)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

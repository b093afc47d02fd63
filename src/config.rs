//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::index::{IndexOptions, StorageRoot};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reader: ReaderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reader and index configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    /// Storage roots; plain paths are local
    #[serde(default)]
    pub roots: Vec<String>,

    #[serde(default = "default_open_file_window")]
    pub open_file_window_secs: f64,

    #[serde(default = "default_mtime_tolerance")]
    pub mtime_tolerance_secs: f64,

    #[serde(default = "default_lowlevel_tolerance")]
    pub lowlevel_tolerance: f64,
}

fn default_open_file_window() -> f64 {
    3.0
}

fn default_mtime_tolerance() -> f64 {
    2.0
}

fn default_lowlevel_tolerance() -> f64 {
    1.001
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            open_file_window_secs: default_open_file_window(),
            mtime_tolerance_secs: default_mtime_tolerance(),
            lowlevel_tolerance: default_lowlevel_tolerance(),
        }
    }
}

impl ReaderConfig {
    /// Check values and convert to index options
    pub fn index_options(&self) -> Result<IndexOptions, ConfigError> {
        let secs = |name: &str, value: f64| {
            Duration::try_from_secs_f64(value).map_err(|_| ConfigError::Invalid {
                field: name.to_string(),
                reason: format!("{} is not a valid number of seconds", value),
            })
        };
        if !(self.lowlevel_tolerance >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "reader.lowlevel_tolerance".to_string(),
                reason: format!("{} is less than 1", self.lowlevel_tolerance),
            });
        }
        Ok(IndexOptions {
            open_file_window: secs("reader.open_file_window_secs", self.open_file_window_secs)?,
            mtime_tolerance: secs("reader.mtime_tolerance_secs", self.mtime_tolerance_secs)?,
            lowlevel_tolerance: self.lowlevel_tolerance,
        })
    }

    /// Configured roots, tagged with their access modes
    pub fn storage_roots(&self) -> Result<Vec<StorageRoot>, ConfigError> {
        if self.roots.is_empty() {
            return Err(ConfigError::Invalid {
                field: "reader.roots".to_string(),
                reason: "no storage roots configured".to_string(),
            });
        }
        Ok(self.roots.iter().map(|r| StorageRoot::parse(r)).collect())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("rfstore").join("config.toml")),
            Some(PathBuf::from("/etc/rfstore/config.toml")),
            Some(PathBuf::from("./rfstore.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(roots) = std::env::var("RFSTORE_ROOTS") {
            self.reader.roots = parse_roots(&roots);
        }

        if let Ok(level) = std::env::var("RFSTORE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("RFSTORE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Split a comma-separated root list, dropping empty entries
fn parse_roots(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# rfstore Configuration
#
# Environment variables override these settings:
# - RFSTORE_ROOTS (comma-separated)
# - RFSTORE_LOG_LEVEL
# - RFSTORE_LOG_FORMAT

[reader]
# Storage roots holding channel directories. A channel may span several
# roots as long as their sample ranges do not overlap.
roots = ["/data/ringbuffer"]

# Unsealed files modified within this many seconds are treated as still
# being written and are left out of the index
open_file_window_secs = 3.0

# Subdirectory listings whose newest file mtimes differ by less than this
# are considered unchanged
mtime_tolerance_secs = 2.0

# Extent multiplier when picking subdirectories to re-index for a read
lowlevel_tolerance = 1.001

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/rfstore/rfstore.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::AccessMode;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.reader.roots, vec!["/data/ringbuffer"]);
        assert_eq!(config.reader.index_options().unwrap(), IndexOptions::default());
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[reader]\nroots = [\"/a\", \"http://b\"]\n").unwrap();
        assert_eq!(config.reader.open_file_window_secs, 3.0);
        assert_eq!(config.logging.level, "info");

        let roots = config.reader.storage_roots().unwrap();
        assert_eq!(roots[0].mode, AccessMode::Local);
        assert_eq!(roots[1].mode, AccessMode::Http);
    }

    #[test]
    fn test_invalid_values() {
        let mut reader = ReaderConfig::default();
        reader.lowlevel_tolerance = 0.9;
        assert!(matches!(reader.index_options(), Err(ConfigError::Invalid { .. })));

        let mut reader = ReaderConfig::default();
        reader.open_file_window_secs = -1.0;
        assert!(matches!(reader.index_options(), Err(ConfigError::Invalid { .. })));

        assert!(ReaderConfig::default().storage_roots().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfstore.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\nformat = \"json\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert!(config.reader.roots.is_empty());

        std::fs::write(&path, "[reader\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_parse_roots() {
        assert_eq!(parse_roots("/a, /b,,"), vec!["/a", "/b"]);
        assert!(parse_roots("").is_empty());
    }
}

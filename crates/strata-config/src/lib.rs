//! # strata-config
//!
//! Configuration management for Strata.
//!
//! Loads configuration from:
//! 1. `~/.strata/config.toml` (global)
//! 2. `.strata/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

pub use logging::{init_logging, LogLevel};

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    let mut guard = CONFIG.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extract: ExtractOptions,
    pub log: LogConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let project = Path::new(".strata/config.toml");
        let mut config = Self::load_layers(global.as_deref(), Some(project))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Layer the global then the project file over the defaults.
    ///
    /// A file only overrides the keys it actually sets; missing files are
    /// skipped.
    pub fn load_layers(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = global.filter(|p| p.exists()) {
            debug!("Loading global config from {:?}", global_path);
            config.merge(ConfigLayer::from_file(global_path)?);
        }

        if let Some(project_path) = project.filter(|p| p.exists()) {
            debug!("Loading project config from {:?}", project_path);
            config.merge(ConfigLayer::from_file(project_path)?);
        }

        Ok(config)
    }

    /// Parse a single config file without consulting other locations.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.merge(ConfigLayer::from_file(path)?);
        Ok(config)
    }

    /// Global config path: ~/.strata/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".strata/config.toml"))
    }

    /// Apply the keys set in `layer`, leaving everything else alone.
    pub fn merge(&mut self, layer: ConfigLayer) {
        if let Some(v) = layer.extract.ignore_chown_errors {
            self.extract.ignore_chown_errors = v;
        }
        if let Some(v) = layer.extract.use_hardlinks {
            self.extract.use_hardlinks = v;
        }
        if let Some(level) = layer.log.level {
            self.log.level = level;
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_flag("STRATA_IGNORE_CHOWN_ERRORS") {
            self.extract.ignore_chown_errors = v;
        }
        if let Some(v) = env_flag("STRATA_USE_HARDLINKS") {
            self.extract.use_hardlinks = v;
        }
        if let Ok(level) = std::env::var("STRATA_LOG") {
            self.log.level = level;
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// One config file as written, every key optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub extract: ExtractLayer,
    pub log: LogLayer,
}

impl ConfigLayer {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractLayer {
    pub ignore_chown_errors: Option<bool>,
    pub use_hardlinks: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogLayer {
    pub level: Option<String>,
}

/// Options consulted while materializing layer entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    /// Keep going when chown fails (rootless extraction without a full id map)
    pub ignore_chown_errors: bool,
    /// Deduplicate regular files by hardlinking them from an existing copy
    pub use_hardlinks: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            ignore_chown_errors: false,
            use_hardlinks: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is not set: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    pub fn level(&self) -> LogLevel {
        self.level.parse().unwrap_or(LogLevel::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.extract.ignore_chown_errors);
        assert!(config.extract.use_hardlinks);
        assert_eq!(config.log.level(), LogLevel::Info);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml().unwrap();
        assert!(toml_str.contains("[extract]"));
        assert!(toml_str.contains("ignore_chown_errors = false"));
        assert!(toml_str.contains("[log]"));
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: Config = toml::from_str("[extract]\nignore_chown_errors = true\n").unwrap();
        assert!(config.extract.ignore_chown_errors);
        assert!(config.extract.use_hardlinks);
    }

    #[test]
    fn test_merge_project_overrides_extract() {
        let mut global = Config::default();
        let project: ConfigLayer =
            toml::from_str("[extract]\nuse_hardlinks = false\n[log]\nlevel = \"debug\"\n").unwrap();

        global.merge(project);
        assert!(!global.extract.use_hardlinks);
        assert_eq!(global.log.level(), LogLevel::Debug);
    }

    #[test]
    fn test_merge_keeps_keys_the_layer_does_not_set() {
        let mut config = Config::default();
        config.extract.ignore_chown_errors = true;
        config.extract.use_hardlinks = false;

        let project: ConfigLayer = toml::from_str("[log]\nlevel = \"debug\"\n").unwrap();
        config.merge(project);

        assert!(config.extract.ignore_chown_errors);
        assert!(!config.extract.use_hardlinks);
        assert_eq!(config.log.level(), LogLevel::Debug);
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let log = LogConfig {
            level: "chatty".to_string(),
        };
        assert_eq!(log.level(), LogLevel::Info);
    }
}

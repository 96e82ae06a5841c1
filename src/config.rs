//! Layered configuration for the watcher and the inspection targets.
//!
//! Sources, later ones winning:
//! - Default values
//! - TOML configuration file (`.linkwatch/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `LW_` and use double underscores
//! to separate nested levels:
//! - `LW_WATCHER__RECURSIVE=true` sets `watcher.recursive`
//! - `LW_INSPECTION__RECENT_IMAGE_LIMIT=20` sets `inspection.recent_image_limit`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Directory holding the settings file.
pub const CONFIG_DIR: &str = ".linkwatch";

/// Name of the settings file inside [`CONFIG_DIR`].
pub const SETTINGS_FILE: &str = "settings.toml";

const ENV_PREFIX: &str = "LW_";

/// Errors from loading, validating or saving settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Missing required configuration key: `{key}`")]
    MissingKey { key: &'static str },

    #[error("Invalid value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("Failed to write configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Watch behavior
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Inspection image handling
    #[serde(default)]
    pub inspection: InspectionConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatcherConfig {
    /// Also watch every subdirectory of the given paths
    #[serde(default)]
    pub recursive: bool,

    /// Wait for all targets of an event before handling the next one
    #[serde(default)]
    pub synchronous: bool,

    /// Bounded wait of each poll, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InspectionConfig {
    /// Camera name that marks images from the left camera
    #[serde(default)]
    pub left_camera: String,

    /// Camera name that marks images from the right camera
    #[serde(default)]
    pub right_camera: String,

    /// Result tag of a passed inspection
    #[serde(default = "default_pass_tag")]
    pub pass_tag: String,

    /// Result tag of a failed inspection
    #[serde(default = "default_fail_tag")]
    pub fail_tag: String,

    /// Result tag of an inconclusive inspection
    #[serde(default = "default_unknown_tag")]
    pub unknown_tag: String,

    /// Directory that detected images are moved into
    #[serde(default)]
    pub img_destination: PathBuf,

    /// Recent images kept per link
    #[serde(default = "default_recent_image_limit")]
    pub recent_image_limit: usize,

    /// Past failures kept per link
    #[serde(default = "default_fail_image_limit")]
    pub fail_image_limit: usize,

    /// File the inspection log is stored in, relative to the settings file's directory
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for every module
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides, e.g. `watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_pass_tag() -> String {
    "GOOD".to_string()
}
fn default_fail_tag() -> String {
    "FAIL".to_string()
}
fn default_unknown_tag() -> String {
    "UNKNOWN".to_string()
}
fn default_recent_image_limit() -> usize {
    10
}
fn default_fail_image_limit() -> usize {
    10
}
fn default_log_path() -> PathBuf {
    PathBuf::from("inspections.json")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watcher: WatcherConfig::default(),
            inspection: InspectionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            recursive: false,
            synchronous: false,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            left_camera: String::new(),
            right_camera: String::new(),
            pass_tag: default_pass_tag(),
            fail_tag: default_fail_tag(),
            unknown_tag: default_unknown_tag(),
            img_destination: PathBuf::new(),
            recent_image_limit: default_recent_image_limit(),
            fail_image_limit: default_fail_image_limit(),
            log_path: default_log_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl InspectionConfig {
    /// `log_path` anchored at `config_dir` unless it is already absolute.
    pub fn resolved_log_path(&self, config_dir: &Path) -> PathBuf {
        if self.log_path.is_absolute() {
            self.log_path.clone()
        } else {
            config_dir.join(&self.log_path)
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Settings {
    /// Load configuration from all sources.
    ///
    /// The settings file is looked up by walking from the current directory
    /// towards the root until a `.linkwatch` directory is found.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still layering env vars on top.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore (__) separates nested levels; single
            // underscores stay part of the field name
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)?;
        Ok(settings)
    }

    /// Find `.linkwatch/settings.toml` in the current directory or an ancestor.
    pub fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(SETTINGS_FILE));
            }
        }

        None
    }

    /// Check that every required key is present and sensible.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let inspection = &self.inspection;
        if inspection.left_camera.trim().is_empty() {
            return Err(ConfigError::MissingKey {
                key: "inspection.left_camera",
            });
        }
        if inspection.right_camera.trim().is_empty() {
            return Err(ConfigError::MissingKey {
                key: "inspection.right_camera",
            });
        }
        if inspection.img_destination.as_os_str().is_empty() {
            return Err(ConfigError::MissingKey {
                key: "inspection.img_destination",
            });
        }
        if inspection.left_camera == inspection.right_camera {
            return Err(ConfigError::InvalidValue {
                key: "inspection.right_camera",
                reason: "must differ from left_camera".to_string(),
            });
        }
        if inspection.recent_image_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "inspection.recent_image_limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        if inspection.fail_image_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "inspection.fail_image_limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.watcher.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "watcher.poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }
}

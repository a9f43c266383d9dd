//! Configuration for watch sessions.
//!
//! Layered the usual way:
//! - Default values
//! - TOML configuration file (`.bundlewatch/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `BW_` and use double
//! underscores to separate nested levels:
//! - `BW_WATCH__DELAY_MS=250` sets `watch.delay_ms`
//! - `BW_LOGGING__DEFAULT=debug` sets `logging.default`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

/// Default quiet window before a batch of changes is reported.
pub const DEFAULT_DELAY_MS: u64 = 600;

/// Directory holding the settings file, searched for in ancestors of the
/// current directory.
pub const CONFIG_DIR: &str = ".bundlewatch";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Watch session settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Quiet window in milliseconds between the first change of a batch
    /// and its delivery
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Roots under which symlinks are not resolved. A bare name matches
    /// the topmost directory of the resolved path; an absolute path
    /// matches as a prefix.
    #[serde(default = "default_transient_roots")]
    pub transient_roots: Vec<PathBuf>,

    /// Ignore discovered paths that are directories
    #[serde(default = "default_true")]
    pub skip_directories: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}
fn default_transient_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("private")]
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            transient_roots: default_transient_roots(),
            skip_directories: default_true(),
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

impl Settings {
    /// Load configuration from all sources.
    ///
    /// Uses `.bundlewatch/settings.toml` from the nearest ancestor of the
    /// current directory that has one; without it, defaults plus
    /// environment overrides.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let mut figment = Figment::new().merge(Serialized::defaults(Settings::default()));

        if let Some(path) = Self::find_workspace_config() {
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(Env::prefixed("BW_").split("__"))
            .extract()
            .map_err(Box::new)
    }

    /// Load configuration from a specific file, plus environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BW_").split("__"))
            .extract()
            .map_err(Box::new)
    }

    /// Find the settings file by walking up from the current directory
    pub fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|dir| dir.join(CONFIG_DIR).join("settings.toml"))
            .find(|path| path.is_file())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }
}

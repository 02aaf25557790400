//! Layered configuration.
//!
//! Defaults, then a TOML file, then environment variable overrides:
//!
//! - `CULLWATCH_WATCHER__CHANNEL_CAPACITY=512` sets
//!   `watcher.channel_capacity`
//! - `CULLWATCH_LOGGING__DEFAULT=debug` sets `logging.default`
//!
//! Double underscores separate nested levels; single underscores stay
//! part of the field name.

use std::collections::HashMap;
use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "cullwatch.toml";
const ENV_PREFIX: &str = "CULLWATCH_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema.
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Capacity of each broadcast feed. Slow subscribers past this
    /// many buffered events observe a lag error, not a stall of the
    /// delivery thread.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides, e.g. `cullwatch::watcher = "debug"`.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}

fn default_channel_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
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
    /// Load from `cullwatch.toml` in the working directory, layered
    /// under environment overrides.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from(CONFIG_FILE)
    }

    /// Load from a specific config file path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.watcher.channel_capacity, 256);
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cullwatch.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[watcher]\nchannel_capacity = 64").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.watcher.channel_capacity, 64);
        // Untouched sections keep their defaults.
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("/no/such/cullwatch.toml").unwrap();
        assert_eq!(settings.watcher.channel_capacity, 256);
    }
}

//! Configuration for the rollup publisher.

use crate::core::table::{OverflowPolicy, DEFAULT_MAX_BUCKETS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Property holding the window length in minutes in `opentsdb.conf`.
pub const WINDOW_PROPERTY: &str = "tsd.rtpublisher.rollup.window";
/// Property holding the flush period in seconds.
pub const FLUSH_INTERVAL_PROPERTY: &str = "tsd.rtpublisher.rollup.flush_interval";
/// Property holding the live bucket bound.
pub const MAX_BUCKETS_PROPERTY: &str = "tsd.rtpublisher.rollup.max_buckets";
/// Property holding the overflow policy.
pub const OVERFLOW_POLICY_PROPERTY: &str = "tsd.rtpublisher.rollup.overflow_policy";
/// Property holding the HTTP sink base URL.
pub const URL_PROPERTY: &str = "tsd.rtpublisher.rollup.url";

/// Main configuration for the rollup publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Length of each aggregation window in minutes
    pub window_size_minutes: u32,

    /// How often closed windows are flushed; derived from the window if absent
    #[serde(with = "duration_serde")]
    pub flush_interval: Option<Duration>,

    /// Upper bound on live buckets
    pub max_buckets: usize,

    /// What happens when a new key arrives and the table is full
    pub overflow_policy: OverflowPolicy,

    /// Path for persisting cumulative statistics
    pub data_path: PathBuf,

    /// Base URL of an OpenTSDB-compatible store for the HTTP sink
    pub tsdb_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tsdb-rollup");

        Self {
            window_size_minutes: 5,
            flush_interval: None,
            max_buckets: DEFAULT_MAX_BUCKETS,
            overflow_policy: OverflowPolicy::default(),
            data_path: data_dir,
            tsdb_url: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    ///
    /// `.json` files are read as serialized [`Config`]; anything else is
    /// treated as an `opentsdb.conf` properties file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
        } else {
            Self::from_tsd_properties(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from `key = value` lines of an `opentsdb.conf`.
    ///
    /// Unrelated properties and `#` comments are ignored.
    pub fn from_tsd_properties(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                WINDOW_PROPERTY => config.window_size_minutes = parse_property(key, value)?,
                FLUSH_INTERVAL_PROPERTY => {
                    config.flush_interval =
                        Some(Duration::from_secs(parse_property(key, value)?))
                }
                MAX_BUCKETS_PROPERTY => config.max_buckets = parse_property(key, value)?,
                OVERFLOW_POLICY_PROPERTY => {
                    config.overflow_policy = value.parse().map_err(ConfigError::ParseError)?
                }
                URL_PROPERTY => config.tsdb_url = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tsdb-rollup")
            .join("config.json")
    }

    /// Path of the persisted statistics file.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Check that the configuration describes a usable publisher.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size_minutes == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "window_size_minutes must be positive".to_string(),
            ));
        }
        if self.max_buckets == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "max_buckets must be positive".to_string(),
            ));
        }
        if self.flush_interval == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidConfiguration(
                "flush_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Window length as a duration.
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.window_size_minutes) * 60)
    }

    /// Flush period: the configured one, or a fifth of the window (at least 1s).
    pub fn effective_flush_interval(&self) -> Duration {
        self.flush_interval
            .unwrap_or_else(|| (self.window_duration() / 5).max(Duration::from_secs(1)))
    }
}

fn parse_property<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::ParseError(format!("{key}: '{value}': {e}")))
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidConfiguration(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::InvalidConfiguration(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for an optional Duration stored as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

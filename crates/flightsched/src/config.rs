//! Configuration management for flightsched.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::flight::QueryType;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "flightsched";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "flight_schedules.db";

/// Default future-schedules endpoint.
pub const DEFAULT_BASE_URL: &str = "https://aviation-edge.com/v2/public/flightsFuture";

/// Environment variable also accepted for the API key.
pub const API_KEY_ENV: &str = "AVIATION_EDGE_API_KEY";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FLIGHTSCHED_`, `__` for nesting)
/// 2. `AVIATION_EDGE_API_KEY` for `api.api_key`
/// 3. TOML config file at `~/.config/flightsched/config.toml`
/// 4. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Schedules API configuration.
    pub api: ApiConfig,
    /// Collection run defaults.
    pub collect: CollectConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/flightsched/flight_schedules.db`
    pub database_path: Option<PathBuf>,
}

/// Schedules API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Endpoint URL.
    pub base_url: String,
    /// API key sent as the `key` query parameter.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Base of the exponential backoff in milliseconds.
    pub backoff_base_ms: u64,
    /// Minimum spacing between calls in milliseconds.
    pub min_spacing_ms: u64,
    /// Spacing used once a run reaches `batch_threshold` calls.
    pub batch_spacing_ms: u64,
    /// Number of calls after which `batch_spacing_ms` applies.
    pub batch_threshold: usize,
}

/// Defaults for a collection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Anchor airports (IATA codes).
    pub airports: Vec<String>,
    /// Query perspectives to collect.
    pub query_types: Vec<QueryType>,
    /// First date collected, in days from today.
    pub date_offset_days: u32,
    /// Number of consecutive dates collected.
    pub days: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: 5,
            max_retries: 3,
            backoff_base_ms: 1000,
            min_spacing_ms: 500,
            batch_spacing_ms: 1000,
            batch_threshold: 100,
        }
    }
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            airports: Vec::new(),
            query_types: QueryType::ALL.to_vec(),
            date_offset_days: 8,
            days: 7,
        }
    }
}

impl ApiConfig {
    /// Get the request timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get the backoff base as a Duration.
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Whether `code` looks like a three-letter IATA airport code.
#[must_use]
pub fn is_airport_code(code: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z]{3}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(code.trim()))
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(
                Env::raw()
                    .only(&[API_KEY_ENV])
                    .map(|_| "api.api_key".into()),
            )
            .merge(Env::prefixed("FLIGHTSCHED_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::ConfigValidation { message });

        if reqwest::Url::parse(&self.api.base_url).is_err() {
            return invalid(format!("base_url is not a valid URL: {}", self.api.base_url));
        }
        if self.api.timeout_secs == 0 {
            return invalid("timeout_secs must be greater than 0".to_string());
        }
        if self.api.batch_threshold == 0 {
            return invalid("batch_threshold must be greater than 0".to_string());
        }
        if self.api.batch_spacing_ms < self.api.min_spacing_ms {
            return invalid(format!(
                "batch_spacing_ms ({}) cannot be less than min_spacing_ms ({})",
                self.api.batch_spacing_ms, self.api.min_spacing_ms
            ));
        }
        if self.api.max_retries > 0 && self.api.backoff_base_ms < self.api.min_spacing_ms {
            return invalid(format!(
                "backoff_base_ms ({}) cannot be less than min_spacing_ms ({})",
                self.api.backoff_base_ms, self.api.min_spacing_ms
            ));
        }

        for airport in &self.collect.airports {
            if !is_airport_code(airport) {
                return invalid(format!("invalid airport code: {airport:?}"));
            }
        }
        if self.collect.query_types.is_empty() {
            return invalid("query_types must not be empty".to_string());
        }
        if self.collect.days == 0 {
            return invalid("days must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }
}

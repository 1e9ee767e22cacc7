//! Configuration management
//!
//! TOML-backed configuration with per-field defaults and environment
//! variable overrides. The `redis` section is optional: without it the
//! ingestion engine runs in disabled mode and records nothing, which keeps
//! metrics collection from ever blocking the storage path it instruments.
//!
//! # Example
//!
//! ```rust
//! use utrack::config::Config;
//!
//! let config: Config = Config::from_toml_str(
//!     r#"
//!     [redis]
//!     url = "redis://metrics.internal:6379"
//!     max_concurrency = 32
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.redis.as_ref().unwrap().max_concurrency, 32);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::{RedisConfig, RetryPolicy};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Engine behavior settings
    #[serde(default)]
    pub engine: EngineSettings,

    /// Redis connection settings; absent means metrics are disabled
    #[serde(default)]
    pub redis: Option<RedisSettings>,
}

/// Engine behavior settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineSettings {
    /// Force-disable recording even when a redis section is present
    #[serde(default)]
    pub disabled: bool,
}

/// Redis connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisSettings {
    /// Redis server URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Maximum number of in-flight store operations
    #[serde(default = "default_concurrency")]
    pub max_concurrency: u32,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Maximum retries per failed command
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_concurrency() -> u32 {
    16
}

fn default_connection_timeout_ms() -> u64 {
    5_000
}

fn default_command_timeout_ms() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_concurrency: default_concurrency(),
            connection_timeout_ms: default_connection_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl RedisSettings {
    /// Convert into the driver's connection config
    pub fn to_redis_config(&self) -> RedisConfig {
        RedisConfig {
            url: self.url.clone(),
            max_concurrency: self.max_concurrency,
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            retry_policy: RetryPolicy {
                max_retries: self.max_retries,
                ..Default::default()
            },
        }
    }
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Load a configuration file, apply environment overrides, validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `UTRACK_*` environment variable overrides
    ///
    /// - `UTRACK_REDIS_URL` overrides `redis.url` (creating the section if
    ///   the file omitted it)
    /// - `UTRACK_DISABLED=1|true` forces disabled mode
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("UTRACK_REDIS_URL") {
            if !url.is_empty() {
                self.redis.get_or_insert_with(RedisSettings::default).url = url;
            }
        }
        if let Ok(flag) = std::env::var("UTRACK_DISABLED") {
            if flag == "1" || flag.eq_ignore_ascii_case("true") {
                self.engine.disabled = true;
            }
        }
    }

    /// Validate settings that cannot be checked by deserialization alone
    pub fn validate(&self) -> Result<()> {
        if let Some(redis) = &self.redis {
            redis
                .to_redis_config()
                .validate()
                .map_err(Error::Configuration)?;
        }
        Ok(())
    }

    /// Whether metric recording is active
    pub fn recording_enabled(&self) -> bool {
        self.redis.is_some() && !self.engine.disabled
    }
}

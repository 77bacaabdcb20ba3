//! Client configuration.
//!
//! Configuration is built from defaults, overridden by environment
//! variables, and validated before a connection is opened.

use std::path::PathBuf;
use thiserror::Error;

/// Default name under which the script library is registered.
pub const DEFAULT_SCRIPT_NAME: &str = "qless";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading the script library.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for a qless [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Redis host, used when no explicit URL is set.
    pub host: String,
    /// Redis port, used when no explicit URL is set.
    pub port: u16,
    /// Redis database index, used when no explicit URL is set.
    pub db: u32,
    /// Full Redis URL; takes precedence over host, port and db.
    pub redis_url: Option<String>,
    /// Path to the script library body.
    pub script_path: PathBuf,
    /// Identifier the script library is registered under.
    pub script_name: String,
    /// Worker name sent when popping jobs.
    pub worker_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            redis_url: None,
            script_path: PathBuf::from("qless-core/qless.lua"),
            script_name: DEFAULT_SCRIPT_NAME.to_string(),
            worker_name: default_worker_name(),
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QLESS_REDIS_URL`: Full Redis URL (overrides host, port and db)
    /// - `QLESS_HOST`: Redis host (default: localhost)
    /// - `QLESS_PORT`: Redis port (default: 6379)
    /// - `QLESS_DB`: Redis database index (default: 0)
    /// - `QLESS_SCRIPT_PATH`: Script library path (default: qless-core/qless.lua)
    /// - `QLESS_SCRIPT_NAME`: Script identifier (default: qless)
    /// - `QLESS_WORKER_NAME`: Worker name (default: `<hostname>-<pid>`)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("QLESS_REDIS_URL") {
            config.redis_url = Some(val);
        }

        if let Ok(val) = std::env::var("QLESS_HOST") {
            config.host = val;
        }

        if let Ok(val) = std::env::var("QLESS_PORT") {
            config.port = parse_env_value(&val, "QLESS_PORT")?;
        }

        if let Ok(val) = std::env::var("QLESS_DB") {
            config.db = parse_env_value(&val, "QLESS_DB")?;
        }

        if let Ok(val) = std::env::var("QLESS_SCRIPT_PATH") {
            config.script_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("QLESS_SCRIPT_NAME") {
            config.script_name = val;
        }

        if let Ok(val) = std::env::var("QLESS_WORKER_NAME") {
            config.worker_name = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_none() && self.host.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "host cannot be empty when no redis_url is set".to_string(),
            ));
        }

        if let Some(ref url) = self.redis_url {
            if !url.starts_with("redis://")
                && !url.starts_with("rediss://")
                && !url.starts_with("unix://")
            {
                return Err(ConfigError::ValidationFailed(format!(
                    "redis_url must use the redis://, rediss:// or unix:// scheme, got '{}'",
                    url
                )));
            }
        }

        if self.script_name.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "script_name cannot be empty".to_string(),
            ));
        }

        if self.worker_name.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "worker_name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the Redis URL to connect to.
    pub fn connection_url(&self) -> String {
        match self.redis_url {
            Some(ref url) => url.clone(),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Sets an explicit Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Sets the host and port.
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Sets the script library path.
    pub fn with_script_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_path = path.into();
        self
    }

    /// Sets the worker name.
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }
}

fn default_worker_name() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

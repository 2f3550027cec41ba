//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CAFE_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Optional
//! - `CAFE_HOST` - Bind address (default: 127.0.0.1)
//! - `CAFE_PORT` - Listen port (default: 3000)
//! - `CAFE_POOL_SIZE` - Number of pooled connections (default: 10, minimum 1)
//! - `CAFE_POOL_ACQUIRE_TIMEOUT_SECS` - Bound on waiting for a connection (default: wait forever)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag
//! - `SENTRY_SAMPLE_RATE` - Fraction of errors sent (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Fraction of transactions traced (default: 0.0)

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use crate::db::PoolOptions;

const DEFAULT_POOL_SIZE: usize = 10;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Storefront application configuration.
///
/// `Debug` is derived; `SecretString` prints redacted.
#[derive(Debug, Clone)]
pub struct CafeConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Connection pool sizing and wait policy
    pub pool: PoolConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag (e.g. "production")
    pub sentry_environment: Option<String>,
    /// Error event sample rate
    pub sentry_sample_rate: f32,
    /// Performance trace sample rate
    pub sentry_traces_sample_rate: f32,
}

/// Connection pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections opened at startup; never exceeded.
    pub size: usize,
    /// `None` means acquirers wait until a connection is returned.
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            acquire_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Pool builder options for these settings.
    #[must_use]
    pub const fn options(&self) -> PoolOptions {
        PoolOptions::new()
            .capacity(self.size)
            .acquire_timeout(self.acquire_timeout)
    }

    fn from_env() -> Result<Self, ConfigError> {
        let size = parse_pool_size(get_optional_env("CAFE_POOL_SIZE").as_deref())
            .map_err(|e| ConfigError::InvalidEnvVar("CAFE_POOL_SIZE".to_string(), e))?;
        let acquire_timeout =
            parse_acquire_timeout(get_optional_env("CAFE_POOL_ACQUIRE_TIMEOUT_SECS").as_deref())
                .map_err(|e| {
                    ConfigError::InvalidEnvVar("CAFE_POOL_ACQUIRE_TIMEOUT_SECS".to_string(), e)
                })?;
        Ok(Self {
            size,
            acquire_timeout,
        })
    }
}

impl CafeConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("CAFE_DATABASE_URL")?;
        let host = get_env_or_default("CAFE_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("CAFE_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("CAFE_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("CAFE_PORT".to_string(), e.to_string()))?;
        let pool = PoolConfig::from_env()?;

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_sample_rate("SENTRY_SAMPLE_RATE", 1.0)?;
        let sentry_traces_sample_rate = get_sample_rate("SENTRY_TRACES_SAMPLE_RATE", 0.0)?;

        Ok(Self {
            database_url,
            host,
            port,
            pool,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_sample_rate(key: &str, default: f32) -> Result<f32, ConfigError> {
    parse_sample_rate(get_optional_env(key).as_deref(), default)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e))
}

/// Parse the pool size; unset means the default.
fn parse_pool_size(value: Option<&str>) -> Result<usize, String> {
    let Some(value) = value else {
        return Ok(DEFAULT_POOL_SIZE);
    };
    let size = value.trim().parse::<usize>().map_err(|e| e.to_string())?;
    if size == 0 {
        return Err("pool size must be at least 1".to_string());
    }
    Ok(size)
}

/// Parse the acquire timeout in whole seconds; unset or empty means unbounded.
fn parse_acquire_timeout(value: Option<&str>) -> Result<Option<Duration>, String> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(secs) => {
            let secs = secs.parse::<u64>().map_err(|e| e.to_string())?;
            if secs == 0 {
                return Err("timeout must be at least 1 second".to_string());
            }
            Ok(Some(Duration::from_secs(secs)))
        }
    }
}

fn parse_sample_rate(value: Option<&str>, default: f32) -> Result<f32, String> {
    let Some(value) = value else {
        return Ok(default);
    };
    let rate = value.trim().parse::<f32>().map_err(|e| e.to_string())?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("sample rate must be between 0.0 and 1.0 (got {rate})"));
    }
    Ok(rate)
}

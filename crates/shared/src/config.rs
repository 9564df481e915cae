//! Runtime configuration loaded from environment variables

use std::time::Duration;

/// Shared runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string
    pub database_url: String,
    /// Bind address for the API server
    pub bind_addr: String,
    /// Secret used to verify inbound webhook signatures
    pub webhook_secret: String,
    /// Secret used to verify session JWTs
    pub jwt_secret: String,
    /// Plan catalog cache lifetime
    pub catalog_cache_ttl: Duration,
    /// Bounded timeout for payment processor calls
    pub processor_timeout: Duration,
    /// Base URL of the payment processor API
    pub processor_base_url: String,
    /// Bearer credential for the payment processor API
    pub processor_api_key: String,
}

impl Config {
    /// Load config from environment, with development defaults for
    /// everything except DATABASE_URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let webhook_secret = std::env::var("WEBHOOK_SECRET")
            .map_err(|_| ConfigError::Missing("WEBHOOK_SECRET"))?;

        let jwt_secret =
            std::env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;

        let catalog_cache_ttl = std::env::var("CATALOG_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        let processor_timeout = std::env::var("PROCESSOR_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10));

        let processor_base_url = std::env::var("PROCESSOR_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:9090".to_string());
        let processor_api_key = std::env::var("PROCESSOR_API_KEY").unwrap_or_default();

        Ok(Self {
            database_url,
            bind_addr,
            webhook_secret,
            jwt_secret,
            catalog_cache_ttl,
            processor_timeout,
            processor_base_url,
            processor_api_key,
        })
    }
}

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
}

//! Database configuration.

use std::time::Duration;

use crate::error::{RepositoryError, RepositoryResult};

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: String,
    /// Pool size
    pub max_connections: u32,
    /// How long to wait for a pooled connection
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> RepositoryResult<Self> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| RepositoryError::config_error("DATABASE_URL not set"))?;

        let mut config = Self::new(url);
        if let Some(max) = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
        {
            config.max_connections = max;
        }
        Ok(config)
    }
}

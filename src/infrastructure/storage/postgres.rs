//! PostgreSQL connection pooling

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::domain::DomainError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Wait for a free connection before failing the query
    pub acquire_timeout: Duration,
    /// Idle connections above `min_connections` close after this
    pub idle_timeout: Duration,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }

    /// Pool bounds; `min` is clamped to `max`
    pub fn with_pool_size(mut self, min: u32, max: u32) -> Self {
        self.max_connections = max.max(1);
        self.min_connections = min.min(self.max_connections);
        self
    }
}

/// Open a pool and check one connection out
pub async fn connect(config: &PostgresConfig) -> Result<PgPool, DomainError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(&config.url)
        .await
        .map_err(|e| DomainError::storage(format!("PostgreSQL unreachable: {}", e)))?;

    info!(
        min_connections = config.min_connections,
        max_connections = config.max_connections,
        "PostgreSQL pool open"
    );

    Ok(pool)
}

/// Map a sqlx error, turning unique violations into conflicts
pub(crate) fn storage_error(context: &str, error: sqlx::Error) -> DomainError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            DomainError::conflict(format!("{}: {}", context, db.message()))
        }
        _ => DomainError::storage(format!("{}: {}", context, error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_is_clamped() {
        let config = PostgresConfig::new("postgres://localhost/credentials").with_pool_size(5, 20);
        assert_eq!((config.min_connections, config.max_connections), (5, 20));

        let inverted = PostgresConfig::new("postgres://localhost/credentials").with_pool_size(8, 0);
        assert_eq!((inverted.min_connections, inverted.max_connections), (1, 1));
    }

    #[test]
    fn test_non_database_errors_are_storage_errors() {
        let error = storage_error("Failed to load", sqlx::Error::RowNotFound);

        assert!(matches!(error, DomainError::Storage { .. }));
        assert!(error.to_string().contains("Failed to load"));
    }
}

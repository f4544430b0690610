//! Store selection at startup

use std::str::FromStr;
use std::sync::Arc;

use crate::domain::api_key::CredentialRepository;
use crate::domain::usage::UsageLogRepository;
use crate::domain::DomainError;
use crate::infrastructure::api_key::{InMemoryCredentialRepository, PostgresCredentialRepository};
use crate::infrastructure::usage::{InMemoryUsageLogRepository, PostgresUsageLogRepository};

use super::migrations::ensure_schema;
use super::postgres::{connect, PostgresConfig};

/// Supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Process-local maps (development and tests)
    InMemory,
    /// PostgreSQL
    Postgres,
}

impl FromStr for StorageType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" | "in_memory" => Ok(Self::InMemory),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            other => Err(DomainError::configuration(format!(
                "Unknown storage backend '{}'",
                other
            ))),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub enum StorageConfig {
    InMemory {
        /// Usage log entries kept before the oldest are evicted
        max_usage_entries: usize,
    },
    Postgres(PostgresConfig),
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self::InMemory {
            max_usage_entries: 100_000,
        }
    }

    pub fn postgres(config: PostgresConfig) -> Self {
        Self::Postgres(config)
    }

    pub fn postgres_url(url: impl Into<String>) -> Self {
        Self::Postgres(PostgresConfig::new(url))
    }

    pub fn storage_type(&self) -> StorageType {
        match self {
            Self::InMemory { .. } => StorageType::InMemory,
            Self::Postgres(_) => StorageType::Postgres,
        }
    }
}

/// The two stores the engine persists to
#[derive(Debug, Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialRepository>,
    pub usage_logs: Arc<dyn UsageLogRepository>,
}

/// Factory for the credential and usage log stores
#[derive(Debug)]
pub struct StorageFactory;

impl StorageFactory {
    /// Build both stores; PostgreSQL schemas are migrated first
    pub async fn create(config: &StorageConfig) -> Result<Stores, DomainError> {
        match config {
            StorageConfig::InMemory { max_usage_entries } => {
                Ok(Self::create_in_memory(*max_usage_entries))
            }
            StorageConfig::Postgres(pg_config) => Self::create_postgres(pg_config).await,
        }
    }

    pub fn create_in_memory(max_usage_entries: usize) -> Stores {
        Stores {
            credentials: Arc::new(InMemoryCredentialRepository::new()),
            usage_logs: Arc::new(InMemoryUsageLogRepository::new(max_usage_entries)),
        }
    }

    pub async fn create_postgres(config: &PostgresConfig) -> Result<Stores, DomainError> {
        let pool = connect(config).await?;
        ensure_schema(&pool).await?;

        Ok(Stores {
            credentials: Arc::new(PostgresCredentialRepository::new(pool.clone())),
            usage_logs: Arc::new(PostgresUsageLogRepository::new(pool)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_from_str() {
        assert_eq!("memory".parse::<StorageType>().unwrap(), StorageType::InMemory);
        assert_eq!("In-Memory".parse::<StorageType>().unwrap(), StorageType::InMemory);
        assert_eq!("postgresql".parse::<StorageType>().unwrap(), StorageType::Postgres);
        assert_eq!("pg".parse::<StorageType>().unwrap(), StorageType::Postgres);
        assert!(matches!(
            "mysql".parse::<StorageType>(),
            Err(DomainError::Configuration { .. })
        ));
    }

    #[test]
    fn test_storage_config_types() {
        assert_eq!(StorageConfig::in_memory().storage_type(), StorageType::InMemory);

        let postgres = StorageConfig::postgres_url("postgres://localhost/test");
        assert_eq!(postgres.storage_type(), StorageType::Postgres);
    }

    #[tokio::test]
    async fn test_create_in_memory_stores() {
        let stores = StorageFactory::create(&StorageConfig::InMemory {
            max_usage_entries: 10,
        })
        .await
        .unwrap();

        assert!(stores.credentials.find_by_key_id("pk_test_missing").await.unwrap().is_none());
        assert_eq!(
            stores
                .usage_logs
                .count(&crate::domain::usage::UsageLogQuery::new())
                .await
                .unwrap(),
            0
        );
    }
}

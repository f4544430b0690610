use std::time::Duration;

use serde::Deserialize;

use crate::domain::api_key::DEFAULT_RATE_LIMIT_PER_MINUTE;
use crate::domain::DomainError;
use crate::infrastructure::api_key::{CredentialServiceConfig, HashCost};
use crate::infrastructure::cache::{CacheConfig, CacheType, DEFAULT_CACHE_CAPACITY};
use crate::infrastructure::geolocation::DEFAULT_IPAPI_URL;
use crate::infrastructure::storage::{PostgresConfig, StorageConfig, StorageType};
use crate::infrastructure::sweeper::SweeperConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub cache: CacheSettings,
    pub storage: StorageSettings,
    pub credentials: CredentialSettings,
    pub geolocation: GeolocationSettings,
    pub notifications: NotificationSettings,
    pub sweeper: SweeperSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheType,
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
    pub max_capacity: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// `in_memory` or `postgres`
    pub backend: String,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    /// In-memory usage log capacity
    pub max_usage_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    pub default_rate_limit_per_minute: u32,
    pub validity_days: i64,
    pub verification_cache_ttl_secs: u64,
    pub hash_memory_kib: u32,
    pub hash_iterations: u32,
    pub hash_parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeolocationSettings {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperSettings {
    pub interval_secs: u64,
    pub stale_bucket_age_secs: u64,
    pub log_retention_days: u32,
    pub prune_batch_size: usize,
    pub prune_interval_secs: u64,
    pub report_interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheType::InMemory,
            redis_url: None,
            key_prefix: None,
            max_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: "in_memory".to_string(),
            database_url: None,
            max_connections: 10,
            min_connections: 1,
            max_usage_entries: 100_000,
        }
    }
}

impl Default for CredentialSettings {
    fn default() -> Self {
        let cost = HashCost::default();

        Self {
            default_rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            validity_days: 730,
            verification_cache_ttl_secs: 3600,
            hash_memory_kib: cost.memory_kib,
            hash_iterations: cost.iterations,
            hash_parallelism: cost.parallelism,
        }
    }
}

impl Default for GeolocationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_IPAPI_URL.to_string(),
            timeout_ms: 3000,
            cache_ttl_secs: 3600,
            cache_capacity: 10_000,
        }
    }
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_secret: None,
            timeout_secs: 10,
        }
    }
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval_secs: 86_400,
            stale_bucket_age_secs: 120,
            log_retention_days: 90,
            prune_batch_size: 1000,
            prune_interval_secs: 86_400,
            report_interval_secs: 604_800,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> Result<CacheConfig, DomainError> {
        match self.backend {
            CacheType::InMemory => Ok(CacheConfig::InMemory {
                max_capacity: self.max_capacity,
            }),
            CacheType::Redis => {
                let url = self
                    .redis_url
                    .clone()
                    .filter(|url| !url.is_empty())
                    .ok_or_else(|| {
                        DomainError::configuration("cache.redis_url is required for redis")
                    })?;

                Ok(CacheConfig::Redis {
                    url,
                    namespace: self.key_prefix.clone(),
                })
            }
        }
    }
}

impl StorageSettings {
    pub fn to_storage_config(&self) -> Result<StorageConfig, DomainError> {
        match self.backend.parse::<StorageType>()? {
            StorageType::InMemory => Ok(StorageConfig::InMemory {
                max_usage_entries: self.max_usage_entries,
            }),
            StorageType::Postgres => {
                let url = self
                    .database_url
                    .clone()
                    .or_else(|| std::env::var("DATABASE_URL").ok())
                    .ok_or_else(|| {
                        DomainError::configuration(
                            "storage.database_url or DATABASE_URL is required for postgres",
                        )
                    })?;

                Ok(StorageConfig::postgres(
                    PostgresConfig::new(url)
                        .with_pool_size(self.min_connections, self.max_connections),
                ))
            }
        }
    }
}

impl CredentialSettings {
    pub fn hash_cost(&self) -> HashCost {
        HashCost {
            memory_kib: self.hash_memory_kib,
            iterations: self.hash_iterations,
            parallelism: self.hash_parallelism,
        }
    }

    pub fn to_service_config(&self) -> CredentialServiceConfig {
        CredentialServiceConfig {
            validity: chrono::Duration::days(self.validity_days),
            verification_cache_ttl: Duration::from_secs(self.verification_cache_ttl_secs),
            default_rate_limit_per_minute: self.default_rate_limit_per_minute,
        }
    }
}

impl SweeperSettings {
    pub fn to_sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            stale_bucket_age: Duration::from_secs(self.stale_bucket_age_secs),
            log_retention_days: self.log_retention_days,
            prune_batch_size: self.prune_batch_size.max(1),
            prune_interval: Duration::from_secs(self.prune_interval_secs.max(1)),
            report_interval: Duration::from_secs(self.report_interval_secs.max(1)),
        }
    }
}

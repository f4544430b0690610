//! Cache backend selection

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::domain::cache::Cache;
use crate::domain::DomainError;

use super::in_memory::{InMemoryCache, DEFAULT_CACHE_CAPACITY};
use super::redis::RedisCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    /// Per-process moka cache; counters are not shared between processes
    #[default]
    InMemory,
    Redis,
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InMemory => "in_memory",
            Self::Redis => "redis",
        })
    }
}

/// Resolved cache backend settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheConfig {
    InMemory { max_capacity: u64 },
    Redis { url: String, namespace: Option<String> },
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::InMemory {
            max_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn cache_type(&self) -> CacheType {
        match self {
            Self::InMemory { .. } => CacheType::InMemory,
            Self::Redis { .. } => CacheType::Redis,
        }
    }
}

pub struct CacheFactory;

impl CacheFactory {
    pub async fn create(config: &CacheConfig) -> Result<Arc<dyn Cache>, DomainError> {
        let cache: Arc<dyn Cache> = match config {
            CacheConfig::InMemory { max_capacity } => {
                Arc::new(InMemoryCache::with_capacity(*max_capacity))
            }
            CacheConfig::Redis { url, namespace } => {
                Arc::new(RedisCache::connect(url, namespace.clone()).await?)
            }
        };

        info!(backend = %config.cache_type(), "Cache ready");
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_backend_names() {
        assert_eq!(CacheType::InMemory.to_string(), "in_memory");
        assert_eq!(CacheType::Redis.to_string(), "redis");
        assert_eq!(CacheConfig::default().cache_type(), CacheType::InMemory);
    }

    #[tokio::test]
    async fn test_create_in_memory() {
        let cache = CacheFactory::create(&CacheConfig::InMemory { max_capacity: 100 })
            .await
            .unwrap();

        assert_eq!(cache.increment("c", 1, Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_redis_rejects_bad_url() {
        let config = CacheConfig::Redis {
            url: "::".to_string(),
            namespace: None,
        };

        assert!(CacheFactory::create(&config).await.is_err());
    }
}

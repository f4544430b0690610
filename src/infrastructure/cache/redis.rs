//! Redis cache for deployments running more than one process

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::domain::cache::Cache;
use crate::domain::DomainError;

const SCAN_BATCH: usize = 200;
const DELETE_BATCH: usize = 500;

fn redis_error(action: &str, key: &str, e: redis::RedisError) -> DomainError {
    DomainError::cache(format!("Redis {} '{}' failed: {}", action, key, e))
}

/// Whole seconds, at least one
fn expiry_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Cache shared through Redis
///
/// Counters run `INCRBY` and `EXPIRE NX` in one MULTI block, so the first
/// writer of a bucket fixes its expiry. `EXPIRE NX` needs Redis 7.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    namespace: Option<String>,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect to `url`; keys are stored as `{namespace}:{key}` when a namespace is given
    pub async fn connect(url: &str, namespace: Option<String>) -> Result<Self, DomainError> {
        let client = redis::Client::open(url)
            .map_err(|e| DomainError::configuration(format!("Invalid Redis URL: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| DomainError::cache(format!("Redis unreachable: {}", e)))?;

        Ok(Self {
            connection,
            namespace: namespace.filter(|n| !n.is_empty()),
        })
    }

    fn stored_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(namespace) => format!("{}:{}", namespace, key),
            None => key.to_string(),
        }
    }

    fn caller_key(&self, stored: String) -> String {
        self.namespace
            .as_ref()
            .and_then(|namespace| stored.strip_prefix(namespace.as_str()))
            .and_then(|rest| rest.strip_prefix(':'))
            .map(str::to_string)
            .unwrap_or(stored)
    }

    /// Stored keys matching a caller pattern
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, DomainError> {
        let stored_pattern = self.stored_key(pattern);
        let mut conn = self.connection.clone();
        let mut matches = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&stored_pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("SCAN", pattern, e))?;

            matches.extend(batch);
            if next == 0 {
                return Ok(matches);
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        let mut conn = self.connection.clone();

        conn.get(self.stored_key(key))
            .await
            .map_err(|e| redis_error("GET", key, e))
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();

        conn.set_ex(self.stored_key(key), value, expiry_secs(ttl))
            .await
            .map_err(|e| redis_error("SET", key, e))
    }

    async fn delete(&self, key: &str) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();

        let removed: u64 = conn
            .del(self.stored_key(key))
            .await
            .map_err(|e| redis_error("DEL", key, e))?;

        Ok(removed > 0)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, DomainError> {
        Ok(self
            .scan(pattern)
            .await?
            .into_iter()
            .map(|stored| self.caller_key(stored))
            .collect())
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, DomainError> {
        let stored = self.stored_key(key);
        let mut conn = self.connection.clone();

        let (count, _): (i64, i64) = redis::pipe()
            .atomic()
            .incr(&stored, delta)
            .cmd("EXPIRE")
            .arg(&stored)
            .arg(expiry_secs(ttl))
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("INCRBY", key, e))?;

        Ok(count)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize, DomainError> {
        let stored = self.scan(pattern).await?;
        let mut conn = self.connection.clone();
        let mut removed = 0;

        for batch in stored.chunks(DELETE_BATCH) {
            let count: usize = conn
                .del(batch)
                .await
                .map_err(|e| redis_error("DEL", pattern, e))?;
            removed += count;
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Live tests need a Redis 7 server at REDIS_TEST_URL or localhost

    async fn live_cache() -> RedisCache {
        let url = std::env::var("REDIS_TEST_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        RedisCache::connect(&url, Some(format!("credentials-test-{}", uuid::Uuid::new_v4())))
            .await
            .unwrap()
    }

    #[test]
    fn test_expiry_secs_rounds_up_to_one() {
        assert_eq!(expiry_secs(Duration::from_millis(10)), 1);
        assert_eq!(expiry_secs(Duration::from_secs(120)), 120);
    }

    #[tokio::test]
    async fn test_invalid_url_is_configuration_error() {
        let result = RedisCache::connect("not a url", None).await;

        assert!(matches!(result, Err(DomainError::Configuration { .. })));
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_counter_keeps_first_expiry() {
        let cache = live_cache().await;

        assert_eq!(cache.increment("bucket", 5, Duration::from_secs(60)).await.unwrap(), 5);
        assert_eq!(cache.increment("bucket", 3, Duration::from_secs(1)).await.unwrap(), 8);

        let mut conn = cache.connection.clone();
        let ttl: i64 = conn.ttl(cache.stored_key("bucket")).await.unwrap();
        assert!(ttl > 50);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_namespaced_pattern_operations() {
        let cache = live_cache().await;
        let ttl = Duration::from_secs(60);

        cache.set_raw("api_rate_limit:pk:1", "1", ttl).await.unwrap();
        cache.set_raw("api_rate_limit:pk:2", "1", ttl).await.unwrap();
        cache.set_raw("verification:u1:x", "{}", ttl).await.unwrap();

        let mut keys = cache.keys("api_rate_limit:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["api_rate_limit:pk:1", "api_rate_limit:pk:2"]);

        assert_eq!(cache.delete_pattern("api_rate_limit:*").await.unwrap(), 2);
        assert!(cache.exists("verification:u1:x").await.unwrap());
        assert!(cache.delete("verification:u1:x").await.unwrap());
    }
}

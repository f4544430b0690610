//! Expiring key-value store shared by rate limiting and verification caching

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::DomainError;

/// Expiring key-value store
///
/// Keys are flat strings namespaced with `:`. Patterns support the `*`
/// wildcard only.
#[async_trait]
pub trait Cache: Send + Sync + Debug {
    /// Stored value, or `None` when missing or expired
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError>;

    /// Store a value that expires after `ttl`, replacing any previous one
    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainError>;

    async fn delete(&self, key: &str) -> Result<bool, DomainError>;

    /// Unexpired keys matching `pattern`
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, DomainError>;

    /// Add `delta` to the counter at `key` and return the new count
    ///
    /// A missing counter starts at zero and expires after `ttl`.
    /// An existing counter keeps the expiry it was created with.
    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, DomainError>;

    /// Remove every key matching `pattern`, returning how many went
    async fn delete_pattern(&self, pattern: &str) -> Result<usize, DomainError> {
        let mut deleted = 0;

        for key in self.keys(pattern).await? {
            if self.delete(&key).await? {
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.get_raw(key).await?.is_some())
    }

    /// Current value of a counter written by [`Cache::increment`]
    async fn get_counter(&self, key: &str) -> Result<Option<i64>, DomainError> {
        let Some(raw) = self.get_raw(key).await? else {
            return Ok(None);
        };

        raw.parse::<i64>()
            .map(Some)
            .map_err(|e| DomainError::cache(format!("Counter '{}' holds '{}': {}", key, raw, e)))
    }
}

/// JSON-encoded values on top of any [`Cache`]
pub trait JsonCache: Cache {
    fn get_json<'a, V>(
        &'a self,
        key: &'a str,
    ) -> impl Future<Output = Result<Option<V>, DomainError>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            let Some(raw) = self.get_raw(key).await? else {
                return Ok(None);
            };

            serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| DomainError::cache(format!("Undecodable value at '{}': {}", key, e)))
        }
    }

    fn put_json<'a, V>(
        &'a self,
        key: &'a str,
        value: &'a V,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), DomainError>> + Send
    where
        V: Serialize + Sync,
    {
        async move {
            let raw = serde_json::to_string(value)
                .map_err(|e| DomainError::cache(format!("Unencodable value for '{}': {}", key, e)))?;

            self.set_raw(key, &raw, ttl).await
        }
    }
}

impl<T: Cache + ?Sized> JsonCache for T {}

/// Anchored regex for a `*` key pattern
pub(crate) fn pattern_regex(pattern: &str) -> Result<Regex, DomainError> {
    let literal_parts: Vec<String> = pattern.split('*').map(regex::escape).collect();

    Regex::new(&format!("^{}$", literal_parts.join(".*")))
        .map_err(|e| DomainError::cache(format!("Bad key pattern '{}': {}", pattern, e)))
}

#[cfg(test)]
pub mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    struct State {
        values: HashMap<String, String>,
        failure: Option<String>,
    }

    /// Map-backed cache that ignores expiry and can be switched to fail
    #[derive(Debug, Default)]
    pub struct MockCache {
        state: Mutex<State>,
    }

    impl MockCache {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_raw_entry(self, key: &str, value: &str) -> Self {
            self.state
                .lock()
                .unwrap()
                .values
                .insert(key.to_string(), value.to_string());
            self
        }

        /// Every later call fails with a cache error carrying `message`
        pub fn with_error(self, message: impl Into<String>) -> Self {
            self.state.lock().unwrap().failure = Some(message.into());
            self
        }

        fn state(&self) -> Result<std::sync::MutexGuard<'_, State>, DomainError> {
            let state = self.state.lock().unwrap();

            match &state.failure {
                Some(message) => Err(DomainError::cache(message.clone())),
                None => Ok(state),
            }
        }
    }

    #[async_trait]
    impl Cache for MockCache {
        async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
            Ok(self.state()?.values.get(key).cloned())
        }

        async fn set_raw(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), DomainError> {
            self.state()?
                .values
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<bool, DomainError> {
            Ok(self.state()?.values.remove(key).is_some())
        }

        async fn keys(&self, pattern: &str) -> Result<Vec<String>, DomainError> {
            let regex = pattern_regex(pattern)?;

            Ok(self
                .state()?
                .values
                .keys()
                .filter(|key| regex.is_match(key))
                .cloned()
                .collect())
        }

        async fn increment(&self, key: &str, delta: i64, _ttl: Duration) -> Result<i64, DomainError> {
            let mut state = self.state()?;
            let count = state
                .values
                .get(key)
                .and_then(|raw| raw.parse::<i64>().ok())
                .unwrap_or(0)
                + delta;

            state.values.insert(key.to_string(), count.to_string());
            Ok(count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockCache;
    use super::*;

    #[derive(Debug, PartialEq, serde::Deserialize, Serialize)]
    struct Verified {
        owner: String,
    }

    #[test]
    fn test_pattern_regex_treats_only_star_as_wildcard() {
        let regex = pattern_regex("api_rate_limit:*").unwrap();
        assert!(regex.is_match("api_rate_limit:pk_test_x:202601011200"));
        assert!(!regex.is_match("xapi_rate_limit:abc"));

        let dotted = pattern_regex("a.b*").unwrap();
        assert!(dotted.is_match("a.bc"));
        assert!(!dotted.is_match("axbc"));
    }

    #[tokio::test]
    async fn test_json_values() {
        let cache = MockCache::new();
        let value = Verified {
            owner: "user-1".to_string(),
        };

        cache
            .put_json("verification:user-1:abc", &value, Duration::from_secs(60))
            .await
            .unwrap();

        let read: Option<Verified> = cache.get_json("verification:user-1:abc").await.unwrap();
        assert_eq!(read, Some(value));

        let missing: Option<Verified> = cache.get_json("verification:user-2:abc").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_json_is_a_cache_error() {
        let cache = MockCache::new().with_raw_entry("k", "not json");

        let result: Result<Option<Verified>, _> = cache.get_json("k").await;
        assert!(matches!(result, Err(DomainError::Cache { .. })));
    }

    #[tokio::test]
    async fn test_default_delete_pattern() {
        let cache = MockCache::new()
            .with_raw_entry("verification:u1:a", "{}")
            .with_raw_entry("verification:u1:b", "{}")
            .with_raw_entry("verification:u2:a", "{}");

        assert_eq!(cache.delete_pattern("verification:u1:*").await.unwrap(), 2);
        assert_eq!(cache.keys("*").await.unwrap(), vec!["verification:u2:a"]);
    }

    #[tokio::test]
    async fn test_counter_reads() {
        let cache = MockCache::new().with_raw_entry("garbled", "abc");

        assert_eq!(cache.increment("c", 5, Duration::from_secs(60)).await.unwrap(), 5);
        assert_eq!(cache.increment("c", 3, Duration::from_secs(60)).await.unwrap(), 8);
        assert_eq!(cache.get_counter("c").await.unwrap(), Some(8));
        assert_eq!(cache.get_counter("absent").await.unwrap(), None);
        assert!(cache.get_counter("garbled").await.is_err());
    }

    #[tokio::test]
    async fn test_failing_mock() {
        let cache = MockCache::new().with_error("down");

        assert!(cache.exists("k").await.is_err());
        assert!(cache.increment("k", 1, Duration::from_secs(1)).await.is_err());
    }
}

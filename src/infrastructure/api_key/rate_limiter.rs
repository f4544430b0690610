//! Rate limiter implementation
//!
//! Per-key counters bucketed by calendar minute. The bucket key changes every
//! minute, so counting never needs an explicit reset.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::cache::Cache;
use crate::domain::DomainError;

/// Cache key prefix shared by every bucket
pub const RATE_LIMIT_KEY_PREFIX: &str = "api_rate_limit";

const BUCKET_FORMAT: &str = "%Y%m%d%H%M";

/// Lifetime of a bucket in the cache
pub const BUCKET_TTL: Duration = Duration::from_secs(60);

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Limit for the current minute
    pub limit: u32,
    /// Remaining requests in the current minute
    pub remaining: u32,
    /// Start of the next minute bucket
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Closed decision for a key that may not be used at all
    pub fn denied(now: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            limit: 0,
            remaining: 0,
            reset_at: next_minute(now),
        }
    }
}

fn minute_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .unwrap_or(at)
}

fn next_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    minute_start(at) + ChronoDuration::minutes(1)
}

/// Cache key of the bucket for `key_id` during the minute containing `at`
pub fn bucket_key(key_id: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}:{}:{}",
        RATE_LIMIT_KEY_PREFIX,
        key_id,
        at.format(BUCKET_FORMAT)
    )
}

/// Minute embedded in a bucket key
pub fn bucket_minute(key: &str) -> Option<DateTime<Utc>> {
    let stamp = key.rsplit(':').next()?;
    let parsed = NaiveDateTime::parse_from_str(&format!("{}00", stamp), "%Y%m%d%H%M%S").ok()?;

    Some(Utc.from_utc_datetime(&parsed))
}

/// Minute-bucket rate limiter backed by a shared cache
#[derive(Debug, Clone)]
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Count a request against the current bucket and decide
    ///
    /// Increment and read happen as one cache operation, so concurrent
    /// callers can overshoot the count but never undercount it.
    pub async fn check_and_record(
        &self,
        key_id: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, DomainError> {
        let key = bucket_key(key_id, now);
        let count = self.cache.increment(&key, 1, BUCKET_TTL).await?;
        let count = u32::try_from(count.max(0)).unwrap_or(u32::MAX);

        let decision = RateLimitDecision {
            allowed: count <= limit,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at: next_minute(now),
        };

        debug!(
            bucket = %key,
            count = count,
            allowed = decision.allowed,
            "Rate limit checked"
        );

        Ok(decision)
    }

    /// Requests counted in the current bucket
    pub async fn current_count(&self, key_id: &str, now: DateTime<Utc>) -> Result<u32, DomainError> {
        let count = self
            .cache
            .get_counter(&bucket_key(key_id, now))
            .await?
            .unwrap_or(0);

        Ok(u32::try_from(count.max(0)).unwrap_or(u32::MAX))
    }

    /// Delete buckets whose minute is more than `max_age` before `now`
    ///
    /// Keys that do not carry a parsable minute are left alone.
    pub async fn reclaim_stale(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<usize, DomainError> {
        let max_age = ChronoDuration::from_std(max_age)
            .map_err(|e| DomainError::configuration(format!("Invalid bucket age: {}", e)))?;
        let pattern = format!("{}:*", RATE_LIMIT_KEY_PREFIX);
        let mut removed = 0;

        for key in self.cache.keys(&pattern).await? {
            let Some(minute) = bucket_minute(&key) else {
                continue;
            };

            if now - minute > max_age && self.cache.delete(&key).await? {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::MockCache;
    use crate::infrastructure::cache::InMemoryCache;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_bucket_key_round_trip() {
        let now = at("2026-03-18T10:42:37Z");
        let key = bucket_key("pk_test_abc", now);

        assert_eq!(key, "api_rate_limit:pk_test_abc:202603181042");
        assert_eq!(bucket_minute(&key), Some(at("2026-03-18T10:42:00Z")));
        assert_eq!(bucket_minute("api_rate_limit:pk_test_abc:garbage"), None);
    }

    #[tokio::test]
    async fn test_limit_within_one_minute() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCache::new()));
        let now = at("2026-03-18T10:42:05Z");

        for i in 0..3 {
            let decision = limiter.check_and_record("pk_test_abc", 3, now).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 2 - i);
        }

        let denied = limiter
            .check_and_record("pk_test_abc", 3, now + ChronoDuration::seconds(30))
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, at("2026-03-18T10:43:00Z"));

        let next = limiter
            .check_and_record("pk_test_abc", 3, at("2026-03-18T10:43:01Z"))
            .await
            .unwrap();
        assert!(next.allowed);
    }

    #[tokio::test]
    async fn test_keys_are_counted_independently() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCache::new()));
        let now = Utc::now();

        assert!(limiter.check_and_record("a", 1, now).await.unwrap().allowed);
        assert!(!limiter.check_and_record("a", 1, now).await.unwrap().allowed);
        assert!(limiter.check_and_record("b", 1, now).await.unwrap().allowed);
        assert_eq!(limiter.current_count("a", now).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cache_failure_propagates() {
        let limiter = RateLimiter::new(Arc::new(MockCache::new().with_error("down")));

        assert!(limiter.check_and_record("a", 10, Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_reclaim_stale_buckets() {
        let now = at("2026-03-18T10:42:30Z");
        let cache = Arc::new(
            MockCache::new()
                .with_raw_entry(&bucket_key("a", at("2026-03-18T10:42:00Z")), "5")
                .with_raw_entry(&bucket_key("a", at("2026-03-18T10:41:00Z")), "5")
                .with_raw_entry(&bucket_key("a", at("2026-03-18T10:39:00Z")), "5")
                .with_raw_entry(&bucket_key("b", at("2026-03-18T09:00:00Z")), "5")
                .with_raw_entry("api_rate_limit:odd", "1")
                .with_raw_entry("verification:u1:x", "{}"),
        );
        let limiter = RateLimiter::new(cache.clone());

        let removed = limiter
            .reclaim_stale(now, Duration::from_secs(120))
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(cache.keys("*").await.unwrap().len(), 4);

        // Second pass finds nothing left to do
        assert_eq!(
            limiter.reclaim_stale(now, Duration::from_secs(120)).await.unwrap(),
            0
        );
    }
}

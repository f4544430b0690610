//! Process-local cache on moka

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache as MokaCache;

use crate::domain::cache::{pattern_regex, Cache};
use crate::domain::DomainError;

pub const DEFAULT_CACHE_CAPACITY: u64 = 100_000;

/// No slot outlives this, whatever TTL it was written with
const LIFETIME_CEILING: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    deadline: Instant,
}

impl Slot {
    fn fresh(value: String, ttl: Duration, now: Instant) -> Self {
        let deadline = now
            .checked_add(ttl.min(LIFETIME_CEILING))
            .unwrap_or(now);

        Self { value, deadline }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.deadline
    }
}

/// Cache for a single process
///
/// Moka bounds the entry count. Deadlines are checked on access, so an
/// expired slot stays resident until it is read, overwritten or deleted;
/// the rate-limit janitor deletes stale buckets explicitly.
#[derive(Debug, Clone)]
pub struct InMemoryCache {
    slots: MokaCache<String, Slot>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            slots: MokaCache::builder()
                .max_capacity(max_capacity)
                .time_to_live(LIFETIME_CEILING)
                .build(),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        let Some(slot) = self.slots.get(key).await else {
            return Ok(None);
        };

        if slot.is_live(Instant::now()) {
            Ok(Some(slot.value))
        } else {
            self.slots.invalidate(key).await;
            Ok(None)
        }
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainError> {
        self.slots
            .insert(key.to_string(), Slot::fresh(value.to_string(), ttl, Instant::now()))
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.slots.remove(key).await.is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, DomainError> {
        let regex = pattern_regex(pattern)?;
        let now = Instant::now();

        Ok(self
            .slots
            .iter()
            .filter(|(key, slot)| slot.is_live(now) && regex.is_match(key))
            .map(|(key, _)| key.to_string())
            .collect())
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, DomainError> {
        let now = Instant::now();

        // Runs under moka's per-key lock
        let updated = self
            .slots
            .entry(key.to_string())
            .and_upsert_with(|current| {
                let next = match current.map(|entry| entry.into_value()) {
                    Some(slot) if slot.is_live(now) => {
                        let count = slot.value.parse::<i64>().unwrap_or(0) + delta;
                        Slot {
                            value: count.to_string(),
                            deadline: slot.deadline,
                        }
                    }
                    _ => Slot::fresh(delta.to_string(), ttl, now),
                };
                std::future::ready(next)
            })
            .await;

        let value = updated.into_value().value;
        value
            .parse::<i64>()
            .map_err(|e| DomainError::cache(format!("Counter '{}' holds '{}': {}", key, value, e)))
    }
}

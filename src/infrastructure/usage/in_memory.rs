//! In-memory usage log repository

use std::collections::HashMap;
use std::ops::Range;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use tokio::sync::RwLock;

use crate::domain::usage::{UsageLogEntry, UsageLogId, UsageLogQuery, UsageLogRepository};
use crate::domain::DomainError;

/// In-memory usage log repository
///
/// Holds at most `max_entries`; the oldest entries are evicted first.
#[derive(Debug)]
pub struct InMemoryUsageLogRepository {
    entries: RwLock<HashMap<UsageLogId, UsageLogEntry>>,
    max_entries: usize,
}

impl InMemoryUsageLogRepository {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Evict oldest entries if over limit
    fn evict_if_needed(&self, entries: &mut HashMap<UsageLogId, UsageLogEntry>) {
        if entries.len() <= self.max_entries {
            return;
        }

        let mut by_age: Vec<_> = entries
            .values()
            .map(|e| (e.id().clone(), e.created_at()))
            .collect();
        by_age.sort_by_key(|(_, created_at)| *created_at);

        let to_remove = entries.len() - self.max_entries;
        for (id, _) in by_age.into_iter().take(to_remove) {
            entries.remove(&id);
        }
    }

    async fn for_key_since(&self, public_key_id: &str, since: DateTime<Utc>) -> Vec<UsageLogEntry> {
        let entries = self.entries.read().await;

        entries
            .values()
            .filter(|e| {
                e.public_key_id.as_deref() == Some(public_key_id) && e.created_at() >= since
            })
            .cloned()
            .collect()
    }
}

impl Default for InMemoryUsageLogRepository {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl UsageLogRepository for InMemoryUsageLogRepository {
    async fn insert(&self, entry: UsageLogEntry) -> Result<UsageLogEntry, DomainError> {
        let mut entries = self.entries.write().await;

        if entries.contains_key(entry.id()) {
            return Err(DomainError::conflict(format!(
                "Usage log '{}' already exists",
                entry.id()
            )));
        }

        entries.insert(entry.id().clone(), entry.clone());
        self.evict_if_needed(&mut entries);

        Ok(entry)
    }

    async fn get(&self, id: &UsageLogId) -> Result<Option<UsageLogEntry>, DomainError> {
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn latest_for_key_since(
        &self,
        public_key_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<UsageLogEntry>, DomainError> {
        Ok(self
            .for_key_since(public_key_id, since)
            .await
            .into_iter()
            .max_by_key(|e| e.created_at()))
    }

    async fn count_for_key_since(
        &self,
        public_key_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, DomainError> {
        Ok(self.for_key_since(public_key_id, since).await.len() as u64)
    }

    async fn count_for_key_in_hours(
        &self,
        public_key_id: &str,
        since: DateTime<Utc>,
        hours: Range<u32>,
    ) -> Result<u64, DomainError> {
        Ok(self
            .for_key_since(public_key_id, since)
            .await
            .iter()
            .filter(|e| hours.contains(&e.created_at().hour()))
            .count() as u64)
    }

    async fn query(&self, query: &UsageLogQuery) -> Result<Vec<UsageLogEntry>, DomainError> {
        let entries = self.entries.read().await;

        let mut results: Vec<_> = entries
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();

        // Newest first; id breaks ties so pages are stable
        results.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().as_str().cmp(a.id().as_str()))
        });

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(results.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, query: &UsageLogQuery) -> Result<u64, DomainError> {
        let entries = self.entries.read().await;
        Ok(entries.values().filter(|e| query.matches(e)).count() as u64)
    }

    async fn mark_suspicious(
        &self,
        id: &UsageLogId,
        reason: Option<&str>,
    ) -> Result<Option<UsageLogEntry>, DomainError> {
        let mut entries = self.entries.write().await;

        Ok(entries.get_mut(id).map(|entry| {
            entry.mark_suspicious(reason);
            entry.clone()
        }))
    }

    async fn count_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError> {
        let entries = self.entries.read().await;
        Ok(entries.values().filter(|e| e.created_at() < cutoff).count() as u64)
    }

    async fn delete_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, DomainError> {
        let mut entries = self.entries.write().await;

        let mut stale: Vec<_> = entries
            .values()
            .filter(|e| e.created_at() < cutoff)
            .map(|e| (e.id().clone(), e.created_at()))
            .collect();
        stale.sort_by_key(|(_, created_at)| *created_at);

        let mut removed = 0;
        for (id, _) in stale.into_iter().take(limit) {
            if entries.remove(&id).is_some() {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

//! Usage log store trait

use std::fmt::Debug;
use std::ops::Range;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::entry::{UsageLogEntry, UsageLogId};
use super::query::UsageLogQuery;
use super::statistics::{
    performance_series_from, PerformancePoint, StatisticsAccumulator, TimelineGranularity,
    UsageAggregate,
};
use crate::domain::DomainError;

/// Append-only table of recorded calls
#[async_trait]
pub trait UsageLogRepository: Send + Sync + Debug {
    /// Append an entry
    async fn insert(&self, entry: UsageLogEntry) -> Result<UsageLogEntry, DomainError>;

    /// Get an entry by id
    async fn get(&self, id: &UsageLogId) -> Result<Option<UsageLogEntry>, DomainError>;

    /// Most recent entry for a public key created at or after `since`
    async fn latest_for_key_since(
        &self,
        public_key_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<UsageLogEntry>, DomainError>;

    /// Number of entries for a public key created at or after `since`
    async fn count_for_key_since(
        &self,
        public_key_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, DomainError>;

    /// Number of entries for a public key since `since` whose UTC hour is in `hours`
    async fn count_for_key_in_hours(
        &self,
        public_key_id: &str,
        since: DateTime<Utc>,
        hours: Range<u32>,
    ) -> Result<u64, DomainError>;

    /// Entries matching a query, newest first, paginated by `limit`/`offset`
    async fn query(&self, query: &UsageLogQuery) -> Result<Vec<UsageLogEntry>, DomainError>;

    /// Number of entries matching a query, ignoring pagination
    async fn count(&self, query: &UsageLogQuery) -> Result<u64, DomainError>;

    /// Counts, performance figures, breakdowns and timeline for a query
    async fn aggregate(
        &self,
        query: &UsageLogQuery,
        granularity: TimelineGranularity,
    ) -> Result<UsageAggregate, DomainError> {
        let mut unpaginated = query.clone();
        unpaginated.limit = None;
        unpaginated.offset = None;

        let mut accumulator = StatisticsAccumulator::new(granularity);
        for entry in self.query(&unpaginated).await? {
            accumulator.add(&entry);
        }

        Ok(accumulator.finish())
    }

    /// Daily response-time figures since `since`, newest day first
    async fn performance_series(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformancePoint>, DomainError> {
        let entries = self.query(&UsageLogQuery::new().since(since)).await?;
        Ok(performance_series_from(&entries))
    }

    /// Flag an entry out of band. Returns the updated entry if it exists.
    async fn mark_suspicious(
        &self,
        id: &UsageLogId,
        reason: Option<&str>,
    ) -> Result<Option<UsageLogEntry>, DomainError>;

    /// Number of entries created before `cutoff`
    async fn count_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError>;

    /// Delete at most `limit` of the oldest entries created before `cutoff`
    async fn delete_before(&self, cutoff: DateTime<Utc>, limit: usize)
        -> Result<u64, DomainError>;
}

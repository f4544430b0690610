//! Usage analytics engine
//!
//! Builds log entries from call contexts, runs the suspicious-activity
//! heuristic at ingestion and answers statistics queries.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::api_key::{parse_token, CredentialRepository, Environment};
use crate::domain::geolocation::{GeoLocation, GeoLocator};
use crate::domain::usage::{
    start_of_day, DailyCount, DateRange, GlobalStatistics, PerformancePoint, StatisticsPeriod,
    SuspicionAssessment, SuspicionEvidence, SuspicionWindows, TimelineGranularity,
    UsageLogEntry, UsageLogId, UsageLogQuery, UsageLogRepository, UserStatistics,
    MAX_SERIES_DAYS, TOP_BREAKDOWN_SIZE,
};
use crate::domain::DomainError;

use super::context::CallContext;

#[cfg(test)]
use mockall::automock;

/// Default retention for usage logs
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Default delete batch for the retention sweep
pub const DEFAULT_PRUNE_BATCH_SIZE: usize = 1000;

/// One page of a log listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPage {
    pub entries: Vec<UsageLogEntry>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

/// Outcome of a retention sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub cutoff: DateTime<Utc>,
    /// Entries deleted, or that would be deleted on a dry run
    pub deleted: u64,
    pub dry_run: bool,
}

/// Usage analytics operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UsageAnalytics: Send + Sync + Debug {
    /// Build, assess and persist the log entry for a call
    async fn ingest(&self, context: CallContext) -> Result<UsageLogEntry, DomainError>;

    /// Statistics for a calendar period, optionally for one environment
    async fn global_statistics(
        &self,
        period: StatisticsPeriod,
        environment: Option<Environment>,
    ) -> Result<GlobalStatistics, DomainError>;

    /// Statistics for one user over the trailing `days`
    async fn user_statistics(
        &self,
        user_id: &str,
        days: u32,
    ) -> Result<UserStatistics, DomainError>;

    /// Daily response-time series over the trailing `days` (at most 30)
    async fn performance_series(&self, days: u32) -> Result<Vec<PerformancePoint>, DomainError>;

    /// Flag an entry after ingestion
    async fn mark_suspicious(
        &self,
        id: &UsageLogId,
        reason: Option<String>,
    ) -> Result<UsageLogEntry, DomainError>;

    /// Filtered, paginated listing, newest first
    async fn list_logs(&self, query: UsageLogQuery) -> Result<LogPage, DomainError>;

    /// Suspicious entries over the trailing `days` (at most 30)
    async fn suspicious_logs(&self, days: u32, limit: usize) -> Result<LogPage, DomainError>;

    /// Delete entries older than `days`, in batches
    async fn prune_older_than(
        &self,
        days: u32,
        batch_size: usize,
        dry_run: bool,
    ) -> Result<PruneReport, DomainError>;
}

/// Engine over a usage log store and a geolocator
#[derive(Debug, Clone)]
pub struct UsageAnalyticsEngine {
    logs: Arc<dyn UsageLogRepository>,
    locator: Arc<dyn GeoLocator>,
    credentials: Option<Arc<dyn CredentialRepository>>,
}

impl UsageAnalyticsEngine {
    pub fn new(logs: Arc<dyn UsageLogRepository>, locator: Arc<dyn GeoLocator>) -> Self {
        Self {
            logs,
            locator,
            credentials: None,
        }
    }

    /// Resolve the owner of a call from its public key when the caller did not
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialRepository>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    async fn locate(&self, ip: &str) -> GeoLocation {
        match self.locator.lookup(ip).await {
            Ok(location) => location.unwrap_or_default(),
            Err(e) => {
                warn!(ip = %ip, error = %e, "Geolocation failed, logging without location");
                GeoLocation::unknown()
            }
        }
    }

    async fn resolve_owner(&self, public_key: &str) -> Option<String> {
        let credentials = self.credentials.as_ref()?;

        match credentials.find_by_key_id(public_key).await {
            Ok(credential) => credential.map(|c| c.owner_user_id().to_string()),
            Err(e) => {
                warn!(error = %e, "Failed to resolve key owner for usage log");
                None
            }
        }
    }

    fn build_entry(context: &CallContext, now: DateTime<Utc>) -> UsageLogEntry {
        let mut entry = UsageLogEntry::new(context.ip_address.clone())
            .with_environment(context.environment())
            .with_created_at(now);

        if let Some(code) = context.response_status_code {
            entry = entry.with_status_code(code);
        }

        entry.user_id = context.user_id.clone();
        entry.public_key_id = context.public_key().map(str::to_string);
        // Only the non-secret lookup id of the private key is kept
        entry.private_key_id = context
            .private_key()
            .and_then(|token| parse_token(token).ok())
            .map(|parsed| parsed.lookup_id());
        entry.action = context.action.clone();
        entry.endpoint = context.endpoint.clone();
        if let Some(method) = &context.http_method {
            entry.http_method = method.to_ascii_uppercase();
        }
        entry.request_uuid = context.request_uuid().map(str::to_string);
        entry.request_id = Some(context.request_id());
        entry.user_agent = context.user_agent().map(str::to_string);
        entry.response_time_ms = context.response_time_ms;
        entry.request_size_bytes = context.request_size_bytes;
        entry.response_size_bytes = context.response_size_bytes;
        entry.signature_valid = context.signature_valid.unwrap_or(true);
        entry.source_service = context.source_service().map(str::to_string);
        entry.request_headers = context.sanitized_headers();
        entry.amount = context.amount;
        entry.currency = context.currency.clone();
        entry.error_message = context.error_message.clone();
        entry.error_code = context.error_code.clone();

        entry
    }

    async fn gather_evidence(
        &self,
        public_key: &str,
        now: DateTime<Utc>,
    ) -> Result<SuspicionEvidence, DomainError> {
        let windows = SuspicionWindows::at(now);

        let previous_country = self
            .logs
            .latest_for_key_since(public_key, windows.geo_since)
            .await?
            .and_then(|previous| previous.geo.country_code);

        let recent_requests = self
            .logs
            .count_for_key_since(public_key, windows.frequency_since)
            .await?;

        let unusual_hour_history = if crate::domain::usage::is_unusual_hour(now) {
            Some(
                self.logs
                    .count_for_key_in_hours(
                        public_key,
                        windows.history_since,
                        crate::domain::usage::UNUSUAL_HOURS,
                    )
                    .await?,
            )
        } else {
            None
        };

        Ok(SuspicionEvidence {
            previous_country,
            recent_requests,
            unusual_hour_history,
        })
    }

    fn daily_histogram(
        timeline: &[crate::domain::usage::TimelineBucket],
        now: DateTime<Utc>,
        days: u32,
    ) -> Vec<DailyCount> {
        let buckets = days.min(MAX_SERIES_DAYS);
        let today = now.date_naive();

        (0..buckets)
            .map(|offset| {
                let date = today - Duration::days(offset as i64);
                let starts_at = start_of_day(date);
                let requests = timeline
                    .iter()
                    .find(|bucket| bucket.starts_at == starts_at)
                    .map_or(0, |bucket| bucket.requests);

                DailyCount { date, requests }
            })
            .collect()
    }

    async fn page(&self, query: UsageLogQuery) -> Result<LogPage, DomainError> {
        let query = query.paginated();
        let total = self.logs.count(&query).await?;
        let entries = self.logs.query(&query).await?;

        Ok(LogPage {
            entries,
            total,
            limit: query.limit.unwrap_or_default(),
            offset: query.offset.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl UsageAnalytics for UsageAnalyticsEngine {
    async fn ingest(&self, context: CallContext) -> Result<UsageLogEntry, DomainError> {
        let now = context.occurred_at.unwrap_or_else(Utc::now);
        let mut entry = Self::build_entry(&context, now);

        if entry.user_id.is_none() {
            if let Some(public_key) = context.public_key() {
                entry.user_id = self.resolve_owner(public_key).await;
            }
        }

        entry.geo = self.locate(&context.ip_address).await;

        let evidence = match context.public_key() {
            Some(public_key) => self.gather_evidence(public_key, now).await?,
            None => SuspicionEvidence::default(),
        };

        let assessment = SuspicionAssessment::assess(&entry, &evidence);
        let entry = entry.with_suspicious(assessment.is_suspicious());

        if assessment.is_suspicious() {
            let indicators: Vec<&str> = assessment.indicators.iter().map(|i| i.as_str()).collect();
            warn!(
                log_id = %entry.id(),
                public_key = entry.public_key_id.as_deref().unwrap_or("-"),
                user_id = entry.user_id.as_deref().unwrap_or("-"),
                ip = %entry.ip_address,
                indicators = ?indicators,
                "Suspicious activity detected"
            );
        }

        let stored = self.logs.insert(entry).await?;

        debug!(
            log_id = %stored.id(),
            status = %stored.status(),
            action = stored.action.as_deref().unwrap_or("-"),
            "Usage logged"
        );

        Ok(stored)
    }

    async fn global_statistics(
        &self,
        period: StatisticsPeriod,
        environment: Option<Environment>,
    ) -> Result<GlobalStatistics, DomainError> {
        let range = period.range(Utc::now());
        let query = UsageLogQuery::new()
            .with_time_range(range.from, range.to)
            .with_environment(environment);

        let mut aggregate = self.logs.aggregate(&query, period.granularity()).await?;
        aggregate.actions.truncate(TOP_BREAKDOWN_SIZE);
        aggregate.countries.truncate(TOP_BREAKDOWN_SIZE);

        Ok(GlobalStatistics {
            period,
            basic: aggregate.basic,
            performance: aggregate.performance,
            top_actions: aggregate.actions,
            top_countries: aggregate.countries,
            environment_breakdown: aggregate.environments,
            timeline: aggregate.timeline,
            date_range: range,
        })
    }

    async fn user_statistics(
        &self,
        user_id: &str,
        days: u32,
    ) -> Result<UserStatistics, DomainError> {
        let days = days.max(1);
        let now = Utc::now();
        let range = DateRange::trailing_days(now, days);
        let query = UsageLogQuery::new()
            .with_user(user_id)
            .with_time_range(range.from, now + Duration::seconds(1));

        let aggregate = self
            .logs
            .aggregate(&query, TimelineGranularity::Daily)
            .await?;

        Ok(UserStatistics {
            user_id: user_id.to_string(),
            days,
            total_requests: aggregate.basic.total_requests,
            successful_requests: aggregate.basic.successful_requests,
            failed_requests: aggregate.basic.failed_requests,
            suspicious_requests: aggregate.basic.suspicious_requests,
            unique_ips: aggregate.basic.unique_ips,
            countries_used: aggregate.basic.unique_countries,
            avg_response_time_ms: aggregate.performance.avg_response_time_ms,
            actions_breakdown: aggregate.actions,
            environments_breakdown: aggregate.environments,
            daily_usage: Self::daily_histogram(&aggregate.timeline, now, days),
            date_range: range,
        })
    }

    async fn performance_series(&self, days: u32) -> Result<Vec<PerformancePoint>, DomainError> {
        let days = days.clamp(1, MAX_SERIES_DAYS);
        let since = Utc::now() - Duration::days(days as i64);

        self.logs.performance_series(since).await
    }

    async fn mark_suspicious(
        &self,
        id: &UsageLogId,
        reason: Option<String>,
    ) -> Result<UsageLogEntry, DomainError> {
        let flagged = self
            .logs
            .mark_suspicious(id, reason.as_deref())
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Usage log '{}' not found", id)))?;

        info!(log_id = %id, reason = reason.as_deref().unwrap_or("-"), "Usage log flagged");

        Ok(flagged)
    }

    async fn list_logs(&self, query: UsageLogQuery) -> Result<LogPage, DomainError> {
        self.page(query).await
    }

    async fn suspicious_logs(&self, days: u32, limit: usize) -> Result<LogPage, DomainError> {
        let days = days.clamp(1, MAX_SERIES_DAYS);
        let query = UsageLogQuery::new()
            .suspicious_only()
            .since(Utc::now() - Duration::days(days as i64))
            .with_limit(limit);

        self.page(query).await
    }

    async fn prune_older_than(
        &self,
        days: u32,
        batch_size: usize,
        dry_run: bool,
    ) -> Result<PruneReport, DomainError> {
        let cutoff = Utc::now() - Duration::days(days as i64);

        if dry_run {
            let deleted = self.logs.count_before(cutoff).await?;
            info!(cutoff = %cutoff, would_delete = deleted, "Usage log prune dry run");
            return Ok(PruneReport {
                cutoff,
                deleted,
                dry_run,
            });
        }

        let batch_size = batch_size.max(1);
        let mut deleted = 0;

        loop {
            let removed = self.logs.delete_before(cutoff, batch_size).await?;
            deleted += removed;

            if removed < batch_size as u64 {
                break;
            }

            debug!(removed = removed, total = deleted, "Pruned usage log batch");
        }

        info!(cutoff = %cutoff, deleted = deleted, "Usage logs pruned");

        Ok(PruneReport {
            cutoff,
            deleted,
            dry_run,
        })
    }
}

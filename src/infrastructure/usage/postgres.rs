//! PostgreSQL usage log repository
//!
//! Filters, counts and aggregates run in SQL.

use std::collections::BTreeMap;
use std::ops::Range;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

use crate::domain::api_key::Environment;
use crate::domain::geolocation::GeoLocation;
use crate::domain::usage::{
    suspicion_message, BasicCounts, BreakdownEntry, LogStatus, PerformancePoint,
    PerformanceStats, TimelineBucket, TimelineGranularity, UsageAggregate, UsageLogEntry,
    UsageLogId, UsageLogQuery, UsageLogRepository, SLOW_REQUEST_THRESHOLD_MS,
};
use crate::domain::DomainError;
use crate::infrastructure::storage::storage_error;

const TABLE: &str = "api_key_usage_logs";

const COLUMNS: &str = "id, user_id, public_key_id, private_key_id, action, endpoint, \
    http_method, request_uuid, request_id, ip_address, user_agent, country_code, city, region, \
    latitude, longitude, environment, response_time_ms, response_status_code, \
    request_size_bytes, response_size_bytes, signature_valid, source_service, request_headers, \
    amount, currency, status, is_suspicious, error_message, error_code, created_at";

fn unsigned(value: Option<i64>) -> Option<u64> {
    value.and_then(|v| u64::try_from(v).ok())
}

fn signed(value: Option<u64>) -> Option<i64> {
    value.map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}

fn count_of(row: &PgRow, column: &str) -> Result<u64, DomainError> {
    let value: Option<i64> = row
        .try_get(column)
        .map_err(|e| storage_error("Failed to read aggregate", e))?;

    Ok(unsigned(value).unwrap_or(0))
}

fn from_row(row: &PgRow) -> Result<UsageLogEntry, DomainError> {
    let get = |e: sqlx::Error| storage_error("Failed to read usage log row", e);

    let environment: String = row.try_get("environment").map_err(get)?;
    let status: String = row.try_get("status").map_err(get)?;
    let headers: serde_json::Value = row.try_get("request_headers").map_err(get)?;
    let status_code: Option<i32> = row.try_get("response_status_code").map_err(get)?;

    let mut entry = UsageLogEntry::new(row.try_get::<String, _>("ip_address").map_err(get)?)
        .with_environment(
            environment
                .parse::<Environment>()
                .map_err(|e| DomainError::storage(format!("Invalid usage log row: {}", e)))?,
        )
        .with_geo(GeoLocation {
            country_code: row.try_get("country_code").map_err(get)?,
            city: row.try_get("city").map_err(get)?,
            region: row.try_get("region").map_err(get)?,
            latitude: row.try_get("latitude").map_err(get)?,
            longitude: row.try_get("longitude").map_err(get)?,
        });

    entry.user_id = row.try_get("user_id").map_err(get)?;
    entry.public_key_id = row.try_get("public_key_id").map_err(get)?;
    entry.private_key_id = row.try_get("private_key_id").map_err(get)?;
    entry.action = row.try_get("action").map_err(get)?;
    entry.endpoint = row.try_get("endpoint").map_err(get)?;
    entry.http_method = row.try_get("http_method").map_err(get)?;
    entry.request_uuid = row.try_get("request_uuid").map_err(get)?;
    entry.request_id = row.try_get("request_id").map_err(get)?;
    entry.user_agent = row.try_get("user_agent").map_err(get)?;
    entry.response_time_ms = unsigned(row.try_get("response_time_ms").map_err(get)?);
    entry.response_status_code = status_code.and_then(|c| u16::try_from(c).ok());
    entry.request_size_bytes = unsigned(row.try_get("request_size_bytes").map_err(get)?);
    entry.response_size_bytes = unsigned(row.try_get("response_size_bytes").map_err(get)?);
    entry.signature_valid = row.try_get("signature_valid").map_err(get)?;
    entry.source_service = row.try_get("source_service").map_err(get)?;
    entry.request_headers = serde_json::from_value::<BTreeMap<String, String>>(headers)
        .map_err(|e| DomainError::storage(format!("Invalid request_headers column: {}", e)))?;
    entry.amount = row.try_get("amount").map_err(get)?;
    entry.currency = row.try_get("currency").map_err(get)?;
    entry.error_message = row.try_get("error_message").map_err(get)?;
    entry.error_code = row.try_get("error_code").map_err(get)?;

    Ok(entry.restore(
        UsageLogId::new(row.try_get::<String, _>("id").map_err(get)?),
        status.parse::<LogStatus>()?,
        row.try_get("is_suspicious").map_err(get)?,
        row.try_get("created_at").map_err(get)?,
    ))
}

/// Append ` WHERE ...` for every filter set on the query
fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &UsageLogQuery) {
    builder.push(" WHERE TRUE");

    if let Some(user_id) = &query.user_id {
        builder.push(" AND user_id = ").push_bind(user_id.clone());
    }

    if let Some(public_key_id) = &query.public_key_id {
        builder
            .push(" AND public_key_id = ")
            .push_bind(public_key_id.clone());
    }

    if let Some(action) = &query.action {
        builder.push(" AND action = ").push_bind(action.clone());
    }

    if let Some(environment) = query.environment {
        builder
            .push(" AND environment = ")
            .push_bind(environment.as_str());
    }

    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }

    if query.suspicious_only {
        builder.push(" AND is_suspicious");
    }

    if let Some(country) = &query.country_code {
        builder.push(" AND country_code = ").push_bind(country.clone());
    }

    if let Some(from) = query.from {
        builder.push(" AND created_at >= ").push_bind(from);
    }

    if let Some(to) = query.to {
        builder.push(" AND created_at < ").push_bind(to);
    }
}

fn trunc_unit(granularity: TimelineGranularity) -> &'static str {
    match granularity {
        TimelineGranularity::Hourly => "hour",
        TimelineGranularity::Daily => "day",
    }
}

/// PostgreSQL implementation of [`UsageLogRepository`]
#[derive(Debug, Clone)]
pub struct PostgresUsageLogRepository {
    pool: PgPool,
}

impl PostgresUsageLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn breakdown(
        &self,
        column: &str,
        query: &UsageLogQuery,
    ) -> Result<Vec<BreakdownEntry>, DomainError> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {column} AS key, COUNT(*) AS count FROM {TABLE}"
        ));
        push_filters(&mut builder, query);
        builder.push(format!(
            " AND {column} IS NOT NULL GROUP BY {column} ORDER BY count DESC, key ASC"
        ));

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to compute breakdown", e))?;

        rows.iter()
            .map(|row| {
                Ok(BreakdownEntry {
                    key: row
                        .try_get("key")
                        .map_err(|e| storage_error("Failed to read breakdown", e))?,
                    count: count_of(row, "count")?,
                })
            })
            .collect()
    }

    async fn timeline(
        &self,
        query: &UsageLogQuery,
        granularity: TimelineGranularity,
    ) -> Result<Vec<TimelineBucket>, DomainError> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT date_trunc('{}', created_at, 'UTC') AS starts_at, COUNT(*) AS requests, \
                 COUNT(*) FILTER (WHERE status = 'success') AS successful, \
                 COUNT(*) FILTER (WHERE status = 'failed') AS failed \
             FROM {TABLE}",
            trunc_unit(granularity)
        ));
        push_filters(&mut builder, query);
        builder.push(" GROUP BY starts_at ORDER BY starts_at");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to compute timeline", e))?;

        rows.iter()
            .map(|row| {
                let starts_at: DateTime<Utc> = row
                    .try_get("starts_at")
                    .map_err(|e| storage_error("Failed to read timeline", e))?;

                Ok(TimelineBucket {
                    period: granularity.label(starts_at),
                    starts_at,
                    requests: count_of(row, "requests")?,
                    successful: count_of(row, "successful")?,
                    failed: count_of(row, "failed")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl UsageLogRepository for PostgresUsageLogRepository {
    async fn insert(&self, entry: UsageLogEntry) -> Result<UsageLogEntry, DomainError> {
        let headers = serde_json::to_value(&entry.request_headers)
            .map_err(|e| DomainError::storage(format!("Failed to serialize headers: {}", e)))?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {TABLE} ({COLUMNS}) "
        ));
        builder.push_values(std::iter::once(&entry), |mut row, e| {
            row.push_bind(e.id().as_str().to_string())
                .push_bind(e.user_id.clone())
                .push_bind(e.public_key_id.clone())
                .push_bind(e.private_key_id.clone())
                .push_bind(e.action.clone())
                .push_bind(e.endpoint.clone())
                .push_bind(e.http_method.clone())
                .push_bind(e.request_uuid.clone())
                .push_bind(e.request_id.clone())
                .push_bind(e.ip_address.clone())
                .push_bind(e.user_agent.clone())
                .push_bind(e.geo.country_code.clone())
                .push_bind(e.geo.city.clone())
                .push_bind(e.geo.region.clone())
                .push_bind(e.geo.latitude)
                .push_bind(e.geo.longitude)
                .push_bind(e.environment.as_str())
                .push_bind(signed(e.response_time_ms))
                .push_bind(e.response_status_code.map(i32::from))
                .push_bind(signed(e.request_size_bytes))
                .push_bind(signed(e.response_size_bytes))
                .push_bind(e.signature_valid)
                .push_bind(e.source_service.clone())
                .push_bind(headers.clone())
                .push_bind(e.amount)
                .push_bind(e.currency.clone())
                .push_bind(e.status().as_str())
                .push_bind(e.is_suspicious())
                .push_bind(e.error_message.clone())
                .push_bind(e.error_code.clone())
                .push_bind(e.created_at());
        });

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to insert usage log", e))?;

        Ok(entry)
    }

    async fn get(&self, id: &UsageLogId) -> Result<Option<UsageLogEntry>, DomainError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM {TABLE} WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to load usage log", e))?;

        row.as_ref().map(from_row).transpose()
    }

    async fn latest_for_key_since(
        &self,
        public_key_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<UsageLogEntry>, DomainError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM {TABLE} WHERE public_key_id = $1 AND created_at >= $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(public_key_id)
        .bind(since)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to load usage log", e))?;

        row.as_ref().map(from_row).transpose()
    }

    async fn count_for_key_since(
        &self,
        public_key_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, DomainError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {TABLE} WHERE public_key_id = $1 AND created_at >= $2"
        ))
        .bind(public_key_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to count usage logs", e))?;

        Ok(unsigned(Some(count)).unwrap_or(0))
    }

    async fn count_for_key_in_hours(
        &self,
        public_key_id: &str,
        since: DateTime<Utc>,
        hours: Range<u32>,
    ) -> Result<u64, DomainError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {TABLE} WHERE public_key_id = $1 AND created_at >= $2 \
               AND EXTRACT(HOUR FROM created_at AT TIME ZONE 'UTC') >= $3 \
               AND EXTRACT(HOUR FROM created_at AT TIME ZONE 'UTC') < $4"
        ))
        .bind(public_key_id)
        .bind(since)
        .bind(i32::try_from(hours.start).unwrap_or(i32::MAX))
        .bind(i32::try_from(hours.end).unwrap_or(i32::MAX))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to count usage logs", e))?;

        Ok(unsigned(Some(count)).unwrap_or(0))
    }

    async fn query(&self, query: &UsageLogQuery) -> Result<Vec<UsageLogEntry>, DomainError> {
        let mut builder = QueryBuilder::new(format!("SELECT {COLUMNS} FROM {TABLE}"));
        push_filters(&mut builder, query);
        builder.push(" ORDER BY created_at DESC, id DESC");

        if let Some(limit) = query.limit {
            builder
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        if let Some(offset) = query.offset {
            builder
                .push(" OFFSET ")
                .push_bind(i64::try_from(offset).unwrap_or(i64::MAX));
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to query usage logs", e))?;

        rows.iter().map(from_row).collect()
    }

    async fn count(&self, query: &UsageLogQuery) -> Result<u64, DomainError> {
        let mut builder = QueryBuilder::new(format!("SELECT COUNT(*) AS count FROM {TABLE}"));
        push_filters(&mut builder, query);

        let row = builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to count usage logs", e))?;

        count_of(&row, "count")
    }

    async fn aggregate(
        &self,
        query: &UsageLogQuery,
        granularity: TimelineGranularity,
    ) -> Result<UsageAggregate, DomainError> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT COUNT(*) AS total, \
                 COUNT(*) FILTER (WHERE status = 'success') AS successful, \
                 COUNT(*) FILTER (WHERE status = 'failed') AS failed, \
                 COUNT(*) FILTER (WHERE status = 'blocked') AS blocked, \
                 COUNT(*) FILTER (WHERE status = 'rate_limited') AS rate_limited, \
                 COUNT(*) FILTER (WHERE is_suspicious) AS suspicious, \
                 COUNT(DISTINCT user_id) AS unique_users, \
                 COUNT(DISTINCT ip_address) AS unique_ips, \
                 COUNT(DISTINCT country_code) AS unique_countries, \
                 ROUND(AVG(response_time_ms))::BIGINT AS avg_response, \
                 MAX(response_time_ms) AS max_response, \
                 COUNT(*) FILTER (WHERE response_time_ms > {SLOW_REQUEST_THRESHOLD_MS}) AS slow, \
                 ROUND(AVG(request_size_bytes))::BIGINT AS avg_request_size, \
                 ROUND(AVG(response_size_bytes))::BIGINT AS avg_response_size \
             FROM {TABLE}"
        ));
        push_filters(&mut builder, query);

        let row = builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to aggregate usage logs", e))?;

        let basic = BasicCounts {
            total_requests: count_of(&row, "total")?,
            successful_requests: count_of(&row, "successful")?,
            failed_requests: count_of(&row, "failed")?,
            blocked_requests: count_of(&row, "blocked")?,
            rate_limited_requests: count_of(&row, "rate_limited")?,
            suspicious_requests: count_of(&row, "suspicious")?,
            unique_users: count_of(&row, "unique_users")?,
            unique_ips: count_of(&row, "unique_ips")?,
            unique_countries: count_of(&row, "unique_countries")?,
        };

        let performance = PerformanceStats {
            avg_response_time_ms: count_of(&row, "avg_response")?,
            max_response_time_ms: count_of(&row, "max_response")?,
            slow_requests_count: count_of(&row, "slow")?,
            avg_request_size_bytes: count_of(&row, "avg_request_size")?,
            avg_response_size_bytes: count_of(&row, "avg_response_size")?,
        };

        Ok(UsageAggregate {
            basic,
            performance,
            actions: self.breakdown("action", query).await?,
            countries: self.breakdown("country_code", query).await?,
            environments: self.breakdown("environment", query).await?,
            timeline: self.timeline(query, granularity).await?,
        })
    }

    async fn performance_series(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformancePoint>, DomainError> {
        let rows = sqlx::query(&format!(
            "SELECT (created_at AT TIME ZONE 'UTC')::DATE AS day, \
                 AVG(response_time_ms)::DOUBLE PRECISION AS avg_response, \
                 MAX(response_time_ms) AS max_response, \
                 COUNT(*) AS total, \
                 COUNT(*) FILTER (WHERE status = 'success') AS successful \
             FROM {TABLE} \
             WHERE created_at >= $1 AND response_time_ms IS NOT NULL \
             GROUP BY day ORDER BY day DESC"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to compute performance series", e))?;

        rows.iter()
            .map(|row| {
                let get = |e: sqlx::Error| storage_error("Failed to read performance series", e);
                let date: NaiveDate = row.try_get("day").map_err(get)?;
                let avg: Option<f64> = row.try_get("avg_response").map_err(get)?;

                Ok(PerformancePoint {
                    date,
                    avg_response_time_ms: avg.unwrap_or(0.0),
                    max_response_time_ms: count_of(row, "max_response")?,
                    total_requests: count_of(row, "total")?,
                    successful_requests: count_of(row, "successful")?,
                })
            })
            .collect()
    }

    async fn mark_suspicious(
        &self,
        id: &UsageLogId,
        reason: Option<&str>,
    ) -> Result<Option<UsageLogEntry>, DomainError> {
        let row = sqlx::query(&format!(
            "UPDATE {TABLE} SET is_suspicious = TRUE, error_message = $2 WHERE id = $1 \
             RETURNING {COLUMNS}"
        ))
        .bind(id.as_str())
        .bind(suspicion_message(reason))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to flag usage log", e))?;

        row.as_ref().map(from_row).transpose()
    }

    async fn count_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError> {
        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {TABLE} WHERE created_at < $1"))
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| storage_error("Failed to count usage logs", e))?;

        Ok(unsigned(Some(count)).unwrap_or(0))
    }

    async fn delete_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, DomainError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {TABLE} WHERE id IN \
             (SELECT id FROM {TABLE} WHERE created_at < $1 ORDER BY created_at LIMIT $2)"
        ))
        .bind(cutoff)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to prune usage logs", e))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::infrastructure::storage::{connect, ensure_schema, PostgresConfig};

    #[test]
    fn test_filters_bind_in_order() {
        let query = UsageLogQuery::new()
            .with_user("user-1")
            .with_status(LogStatus::Failed)
            .suspicious_only();

        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 FROM t");
        push_filters(&mut builder, &query);

        assert_eq!(
            builder.sql(),
            "SELECT 1 FROM t WHERE TRUE AND user_id = $1 AND status = $2 AND is_suspicious"
        );
    }

    #[test]
    fn test_unsigned_conversion() {
        assert_eq!(unsigned(Some(5)), Some(5));
        assert_eq!(unsigned(Some(-1)), None);
        assert_eq!(signed(Some(u64::MAX)), Some(i64::MAX));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_round_trip_and_aggregate() {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/pmp_api_credentials_test".to_string());
        let pool = connect(&PostgresConfig::new(url)).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        let repo = PostgresUsageLogRepository::new(pool);

        let key = format!("pk_test_{}", uuid::Uuid::new_v4().simple());
        let entry = UsageLogEntry::new("10.0.0.1")
            .with_public_key(key.clone())
            .with_action("payments.create")
            .with_status_code(200)
            .with_response_time_ms(120);
        let stored = repo.insert(entry).await.unwrap();

        let found = repo.get(stored.id()).await.unwrap().unwrap();
        assert_eq!(found.public_key_id.as_deref(), Some(key.as_str()));
        assert_eq!(found.status(), LogStatus::Success);

        let query = UsageLogQuery::new()
            .with_public_key(key.clone())
            .since(Utc::now() - Duration::hours(1));
        let aggregate = repo
            .aggregate(&query, TimelineGranularity::Hourly)
            .await
            .unwrap();
        assert_eq!(aggregate.basic.total_requests, 1);
        assert_eq!(aggregate.performance.avg_response_time_ms, 120);
        assert_eq!(aggregate.actions[0].key, "payments.create");
    }
}

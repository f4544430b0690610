//! Usage accounting infrastructure

mod analytics;
mod context;
mod in_memory;
mod postgres;

pub use analytics::{
    LogPage, PruneReport, UsageAnalytics, UsageAnalyticsEngine, DEFAULT_PRUNE_BATCH_SIZE,
    DEFAULT_RETENTION_DAYS,
};
#[cfg(test)]
pub use analytics::MockUsageAnalytics;
pub use context::{
    is_sensitive_header, sanitize_headers, CallContext, ENVIRONMENT_HEADER, PRIVATE_KEY_HEADER,
    PUBLIC_KEY_HEADER, REQUEST_ID_HEADER, REQUEST_UUID_HEADER, SENSITIVE_HEADERS,
    SIGNATURE_HEADER, SOURCE_SERVICE_HEADER, USER_AGENT_HEADER,
};
pub use in_memory::InMemoryUsageLogRepository;
pub use postgres::PostgresUsageLogRepository;

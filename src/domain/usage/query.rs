//! Filters for usage log listings and aggregates

use chrono::{DateTime, Utc};

use super::entry::{LogStatus, UsageLogEntry};
use crate::domain::api_key::Environment;

/// Largest page a listing may return
pub const MAX_PAGE_SIZE: usize = 100;

/// Default page size for listings
pub const DEFAULT_PAGE_SIZE: usize = 15;

/// Query parameters for usage log entries
///
/// The time range is half-open: `from <= created_at < to`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageLogQuery {
    pub user_id: Option<String>,
    pub public_key_id: Option<String>,
    pub action: Option<String>,
    pub environment: Option<Environment>,
    pub status: Option<LogStatus>,
    pub suspicious_only: bool,
    pub country_code: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl UsageLogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_public_key(mut self, public_key_id: impl Into<String>) -> Self {
        self.public_key_id = Some(public_key_id.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_environment(mut self, environment: Option<Environment>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_status(mut self, status: LogStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn suspicious_only(mut self) -> Self {
        self.suspicious_only = true;
        self
    }

    pub fn with_country(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = Some(country_code.into());
        self
    }

    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Clamp the page size for a paginated listing
    pub fn paginated(mut self) -> Self {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        self.limit = Some(limit);
        self
    }

    /// Whether an entry passes every filter (pagination excluded)
    pub fn matches(&self, entry: &UsageLogEntry) -> bool {
        if let Some(user_id) = &self.user_id {
            if entry.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }

        if let Some(public_key_id) = &self.public_key_id {
            if entry.public_key_id.as_ref() != Some(public_key_id) {
                return false;
            }
        }

        if let Some(action) = &self.action {
            if entry.action.as_ref() != Some(action) {
                return false;
            }
        }

        if let Some(environment) = self.environment {
            if entry.environment != environment {
                return false;
            }
        }

        if let Some(status) = self.status {
            if entry.status() != status {
                return false;
            }
        }

        if self.suspicious_only && !entry.is_suspicious() {
            return false;
        }

        if let Some(country) = &self.country_code {
            if entry.geo.country_code.as_ref() != Some(country) {
                return false;
            }
        }

        if let Some(from) = self.from {
            if entry.created_at() < from {
                return false;
            }
        }

        if let Some(to) = self.to {
            if entry.created_at() >= to {
                return false;
            }
        }

        true
    }
}

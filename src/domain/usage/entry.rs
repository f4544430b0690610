//! Usage log entities

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::api_key::Environment;
use crate::domain::geolocation::GeoLocation;
use crate::domain::DomainError;

/// Unique identifier for a usage log entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageLogId(String);

impl UsageLogId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UsageLogId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for UsageLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome class of a recorded call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    #[default]
    Success,
    Failed,
    Blocked,
    RateLimited,
}

impl LogStatus {
    /// 2xx is success, 429 rate limited, 403 blocked, anything else failed
    pub fn from_status_code(code: u16) -> Self {
        match code {
            200..=299 => Self::Success,
            429 => Self::RateLimited,
            403 => Self::Blocked,
            _ => Self::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "blocked" => Ok(Self::Blocked),
            "rate_limited" => Ok(Self::RateLimited),
            other => Err(DomainError::validation(format!(
                "Unknown log status: {}",
                other
            ))),
        }
    }
}

/// One recorded call (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogEntry {
    id: UsageLogId,
    pub user_id: Option<String>,
    pub public_key_id: Option<String>,
    pub private_key_id: Option<String>,
    pub action: Option<String>,
    pub endpoint: Option<String>,
    pub http_method: String,
    pub request_uuid: Option<String>,
    pub request_id: Option<String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    #[serde(flatten)]
    pub geo: GeoLocation,
    pub environment: Environment,
    pub response_time_ms: Option<u64>,
    pub response_status_code: Option<u16>,
    pub request_size_bytes: Option<u64>,
    pub response_size_bytes: Option<u64>,
    pub signature_valid: bool,
    pub source_service: Option<String>,
    /// Sanitized request headers (lowercased names)
    pub request_headers: BTreeMap<String, String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    status: LogStatus,
    is_suspicious: bool,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    created_at: DateTime<Utc>,
}

impl UsageLogEntry {
    /// Create a new entry stamped with the current time
    pub fn new(ip_address: impl Into<String>) -> Self {
        Self {
            id: UsageLogId::generate(),
            user_id: None,
            public_key_id: None,
            private_key_id: None,
            action: None,
            endpoint: None,
            http_method: "POST".to_string(),
            request_uuid: None,
            request_id: None,
            ip_address: ip_address.into(),
            user_agent: None,
            geo: GeoLocation::unknown(),
            environment: Environment::Test,
            response_time_ms: None,
            response_status_code: None,
            request_size_bytes: None,
            response_size_bytes: None,
            signature_valid: true,
            source_service: None,
            request_headers: BTreeMap::new(),
            amount: None,
            currency: None,
            status: LogStatus::Success,
            is_suspicious: false,
            error_message: None,
            error_code: None,
            created_at: Utc::now(),
        }
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

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_geo(mut self, geo: GeoLocation) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_response_time_ms(mut self, ms: u64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    /// Set the HTTP status and derive the log status from it
    pub fn with_status_code(mut self, code: u16) -> Self {
        self.response_status_code = Some(code);
        self.status = LogStatus::from_status_code(code);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Set the suspicion flag at construction time
    pub fn with_suspicious(mut self, suspicious: bool) -> Self {
        self.is_suspicious = suspicious;
        self
    }

    /// Rehydrate stored fields that are otherwise read-only
    pub fn restore(
        mut self,
        id: UsageLogId,
        status: LogStatus,
        is_suspicious: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        self.id = id;
        self.status = status;
        self.is_suspicious = is_suspicious;
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> &UsageLogId {
        &self.id
    }

    pub fn status(&self) -> LogStatus {
        self.status
    }

    pub fn is_suspicious(&self) -> bool {
        self.is_suspicious
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Out-of-band flagging
    pub fn mark_suspicious(&mut self, reason: Option<&str>) {
        self.is_suspicious = true;
        self.error_message = Some(suspicion_message(reason));
    }

    /// True when the call moved a positive amount
    pub fn is_financial_transaction(&self) -> bool {
        self.amount.is_some_and(|amount| amount > 0.0)
    }

    /// Human-readable response time
    pub fn formatted_response_time(&self) -> String {
        match self.response_time_ms {
            None | Some(0) => "N/A".to_string(),
            Some(ms) if ms < 1000 => format!("{}ms", ms),
            Some(ms) => format!("{:.2}s", ms as f64 / 1000.0),
        }
    }
}

/// Error message written when an entry is flagged after ingestion
pub fn suspicion_message(reason: Option<&str>) -> String {
    match reason {
        Some(reason) if !reason.trim().is_empty() => format!("Suspicious activity: {}", reason),
        _ => "Suspicious activity detected".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_code() {
        assert_eq!(LogStatus::from_status_code(200), LogStatus::Success);
        assert_eq!(LogStatus::from_status_code(204), LogStatus::Success);
        assert_eq!(LogStatus::from_status_code(299), LogStatus::Success);
        assert_eq!(LogStatus::from_status_code(429), LogStatus::RateLimited);
        assert_eq!(LogStatus::from_status_code(403), LogStatus::Blocked);
        assert_eq!(LogStatus::from_status_code(401), LogStatus::Failed);
        assert_eq!(LogStatus::from_status_code(500), LogStatus::Failed);
        assert_eq!(LogStatus::from_status_code(301), LogStatus::Failed);
    }

    #[test]
    fn test_mark_suspicious() {
        let mut entry = UsageLogEntry::new("10.0.0.1");
        assert!(!entry.is_suspicious());

        entry.mark_suspicious(Some("card testing"));
        assert!(entry.is_suspicious());
        assert_eq!(
            entry.error_message.as_deref(),
            Some("Suspicious activity: card testing")
        );

        entry.mark_suspicious(None);
        assert_eq!(
            entry.error_message.as_deref(),
            Some("Suspicious activity detected")
        );
    }

    #[test]
    fn test_formatted_response_time() {
        let entry = UsageLogEntry::new("10.0.0.1");
        assert_eq!(entry.formatted_response_time(), "N/A");
        assert_eq!(
            entry.clone().with_response_time_ms(250).formatted_response_time(),
            "250ms"
        );
        assert_eq!(
            entry.with_response_time_ms(1234).formatted_response_time(),
            "1.23s"
        );
    }

    #[test]
    fn test_financial_transaction() {
        let mut entry = UsageLogEntry::new("10.0.0.1");
        assert!(!entry.is_financial_transaction());

        entry.amount = Some(0.0);
        assert!(!entry.is_financial_transaction());

        entry.amount = Some(1500.0);
        assert!(entry.is_financial_transaction());
    }

    #[test]
    fn test_geo_is_flattened() {
        let entry = UsageLogEntry::new("10.0.0.1")
            .with_geo(GeoLocation::unknown().with_country("CM"))
            .with_status_code(429);

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["country_code"], "CM");
        assert_eq!(json["status"], "rate_limited");
    }
}

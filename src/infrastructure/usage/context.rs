//! Call context captured for usage logging

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::api_key::Environment;

pub const PUBLIC_KEY_HEADER: &str = "x-api-public-key";
pub const PRIVATE_KEY_HEADER: &str = "x-api-private-key";
pub const REQUEST_UUID_HEADER: &str = "x-api-uuid";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const ENVIRONMENT_HEADER: &str = "x-api-environment";
pub const SOURCE_SERVICE_HEADER: &str = "x-source-service";
pub const SIGNATURE_HEADER: &str = "x-api-signature";
pub const USER_AGENT_HEADER: &str = "user-agent";

/// Header names never persisted with a log entry
pub const SENSITIVE_HEADERS: [&str; 5] = [
    "authorization",
    "cookie",
    PRIVATE_KEY_HEADER,
    SIGNATURE_HEADER,
    "x-forwarded-for",
];

/// Whether a header must be stripped before persisting
pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| sensitive.eq_ignore_ascii_case(name.trim()))
}

/// Lowercase header names and drop the sensitive ones
pub fn sanitize_headers<'a>(
    headers: impl IntoIterator<Item = &'a (String, String)>,
) -> BTreeMap<String, String> {
    headers
        .into_iter()
        .filter(|(name, _)| !is_sensitive_header(name))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.clone()))
        .collect()
}

/// Everything known about one inbound call once its response is ready
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub ip_address: String,
    /// Raw inbound headers, names in any case
    pub headers: Vec<(String, String)>,
    /// Owner resolved by verification, if the caller has it
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub endpoint: Option<String>,
    pub http_method: Option<String>,
    pub response_time_ms: Option<u64>,
    pub response_status_code: Option<u16>,
    pub request_size_bytes: Option<u64>,
    pub response_size_bytes: Option<u64>,
    pub signature_valid: Option<bool>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    /// Defaults to the ingestion time
    pub occurred_at: Option<DateTime<Utc>>,
}

impl CallContext {
    pub fn new(ip_address: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            ..Default::default()
        }
    }

    /// Set a header, replacing any value under the same name in any case
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers
            .retain(|(key, _)| !key.trim().eq_ignore_ascii_case(name.trim()));
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_endpoint(mut self, method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.http_method = Some(method.into());
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_response(mut self, status_code: u16, response_time_ms: u64) -> Self {
        self.response_status_code = Some(status_code);
        self.response_time_ms = Some(response_time_ms);
        self
    }

    pub fn with_sizes(mut self, request_bytes: u64, response_bytes: u64) -> Self {
        self.request_size_bytes = Some(request_bytes);
        self.response_size_bytes = Some(response_bytes);
        self
    }

    pub fn with_amount(mut self, amount: f64, currency: impl Into<String>) -> Self {
        self.amount = Some(amount);
        self.currency = Some(currency.into());
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self
    }

    pub fn with_occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Value of a header, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn public_key(&self) -> Option<&str> {
        self.header(PUBLIC_KEY_HEADER)
    }

    pub fn private_key(&self) -> Option<&str> {
        self.header(PRIVATE_KEY_HEADER)
    }

    pub fn request_uuid(&self) -> Option<&str> {
        self.header(REQUEST_UUID_HEADER)
    }

    /// Caller-supplied request id, or a generated `req_<uuid>`
    pub fn request_id(&self) -> String {
        self.header(REQUEST_ID_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| format!("req_{}", Uuid::new_v4().simple()))
    }

    /// Declared environment; unknown or missing means test
    pub fn environment(&self) -> Environment {
        self.header(ENVIRONMENT_HEADER)
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }

    pub fn source_service(&self) -> Option<&str> {
        self.header(SOURCE_SERVICE_HEADER)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header(USER_AGENT_HEADER)
    }

    /// Headers safe to persist
    pub fn sanitized_headers(&self) -> BTreeMap<String, String> {
        sanitize_headers(&self.headers)
    }
}

//! Webhook notifier

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use tracing::debug;

use crate::domain::notification::{CredentialEvent, CredentialNotifier};
use crate::domain::DomainError;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "X-Event-Type";
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Hex HMAC-SHA256 of a payload
pub fn sign_payload(secret: &str, payload: &str) -> Result<String, DomainError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DomainError::configuration(format!("Invalid webhook secret: {}", e)))?;
    mac.update(payload.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// POSTs each event as JSON to a fixed URL
///
/// With a secret configured, the body is signed into `X-Signature: sha256=<hex>`.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    secret: Option<String>,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("url", &self.url)
            .field("signed", &self.secret.is_some())
            .finish()
    }
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DomainError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            DomainError::configuration(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            url: url.into(),
            secret: secret.filter(|s| !s.is_empty()),
        })
    }
}

#[async_trait]
impl CredentialNotifier for WebhookNotifier {
    async fn notify(&self, event: &CredentialEvent) -> Result<(), DomainError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| DomainError::internal(format!("Failed to serialize event: {}", e)))?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header(EVENT_HEADER, event.kind.as_str());

        if let Some(secret) = &self.secret {
            let signature = sign_payload(secret, &payload)?;
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", signature));
        }

        let response = request.body(payload).send().await.map_err(|e| {
            let message = if e.is_timeout() {
                "Request timed out".to_string()
            } else if e.is_connect() {
                "Connection failed".to_string()
            } else {
                format!("Request failed: {}", e)
            };
            DomainError::transient("webhook", message)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::transient(
                "webhook",
                format!("HTTP status {}", status.as_u16()),
            ));
        }

        debug!(event = event.kind.as_str(), status = status.as_u16(), "Webhook delivered");

        Ok(())
    }
}

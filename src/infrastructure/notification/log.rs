//! Tracing notifier

use async_trait::async_trait;
use tracing::info;

use crate::domain::notification::{CredentialEvent, CredentialNotifier};
use crate::domain::DomainError;

/// Emits each event as an info log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialNotifier for LogNotifier {
    async fn notify(&self, event: &CredentialEvent) -> Result<(), DomainError> {
        let keys: Vec<&str> = event.keys.iter().map(|k| k.masked_key_id.as_str()).collect();

        info!(
            event = event.kind.as_str(),
            user_id = %event.owner_user_id,
            company_id = %event.owner_company_id,
            environment = %event.environment,
            keys = ?keys,
            reason = event.reason.as_deref().unwrap_or("-"),
            "Credential event"
        );

        Ok(())
    }
}

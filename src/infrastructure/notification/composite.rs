//! Fan-out notifier

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::notification::{CredentialEvent, CredentialNotifier};
use crate::domain::DomainError;

/// Delivers every event to each inner notifier
///
/// All notifiers are attempted; the first failure is returned afterwards.
#[derive(Debug, Default, Clone)]
pub struct CompositeNotifier {
    notifiers: Vec<Arc<dyn CredentialNotifier>>,
}

impl CompositeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CredentialNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl CredentialNotifier for CompositeNotifier {
    async fn notify(&self, event: &CredentialEvent) -> Result<(), DomainError> {
        let results =
            futures::future::join_all(self.notifiers.iter().map(|n| n.notify(event))).await;

        let mut first_error = None;
        for (notifier, result) in self.notifiers.iter().zip(results) {
            if let Err(e) = result {
                warn!(notifier = ?notifier, error = %e, "Notifier failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api_key::{Credential, Environment, KeyType};
    use crate::domain::notification::{CredentialEventKind, MockCredentialNotifier};

    fn event() -> CredentialEvent {
        let credential = Credential::new(
            KeyType::Private,
            Environment::Test,
            "user-1",
            "company-1",
            "sk_test_abcdefghijkl",
            "hash",
        );
        CredentialEvent::new(CredentialEventKind::Expired, &[&credential])
    }

    #[tokio::test]
    async fn test_every_notifier_is_attempted() {
        let mut failing = MockCredentialNotifier::new();
        failing
            .expect_notify()
            .times(1)
            .returning(|_| Err(DomainError::transient("webhook", "down")));

        let mut healthy = MockCredentialNotifier::new();
        healthy.expect_notify().times(1).returning(|_| Ok(()));

        let composite = CompositeNotifier::new()
            .with_notifier(Arc::new(failing))
            .with_notifier(Arc::new(healthy));

        let result = composite.notify(&event()).await;
        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_empty_composite_succeeds() {
        let composite = CompositeNotifier::new();
        assert!(composite.is_empty());
        assert!(composite.notify(&event()).await.is_ok());
    }
}

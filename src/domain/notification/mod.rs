//! Credential lifecycle notifications

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::api_key::{Credential, CredentialId, Environment, KeyType};
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Mask a token or key id for display, keeping its prefix and last 4 characters
pub fn mask_key(key_id: &str) -> String {
    let prefix_end = key_id
        .match_indices('_')
        .nth(1)
        .map(|(i, _)| i + 1)
        .unwrap_or(0);

    let (prefix, rest) = key_id.split_at(prefix_end);
    let chars: Vec<char> = rest.chars().collect();

    if chars.len() <= 8 {
        return format!("{}{}", prefix, "*".repeat(chars.len()));
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();

    format!("{}{}...{}", prefix, head, tail)
}

/// Non-secret description of one credential row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskedKey {
    pub credential_id: CredentialId,
    pub key_type: KeyType,
    pub masked_key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&Credential> for MaskedKey {
    fn from(credential: &Credential) -> Self {
        Self {
            credential_id: credential.id().clone(),
            key_type: credential.key_type(),
            masked_key_id: mask_key(credential.key_id()),
            expires_at: credential.expires_at(),
        }
    }
}

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialEventKind {
    PairCreated,
    PairRotated,
    Revoked,
    Expired,
}

impl CredentialEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PairCreated => "credential.pair_created",
            Self::PairRotated => "credential.pair_rotated",
            Self::Revoked => "credential.revoked",
            Self::Expired => "credential.expired",
        }
    }
}

/// Event handed to a notifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialEvent {
    pub kind: CredentialEventKind,
    pub owner_user_id: String,
    pub owner_company_id: String,
    pub environment: Environment,
    pub keys: Vec<MaskedKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl CredentialEvent {
    /// Build an event from the affected rows, which share one scope
    pub fn new(kind: CredentialEventKind, credentials: &[&Credential]) -> Self {
        let first = credentials.first();

        Self {
            kind,
            owner_user_id: first.map(|c| c.owner_user_id().to_string()).unwrap_or_default(),
            owner_company_id: first
                .map(|c| c.owner_company_id().to_string())
                .unwrap_or_default(),
            environment: first.map(|c| c.environment()).unwrap_or_default(),
            keys: credentials.iter().map(|c| MaskedKey::from(*c)).collect(),
            reason: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Fire-and-forget delivery of lifecycle events
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialNotifier: Send + Sync + Debug {
    async fn notify(&self, event: &CredentialEvent) -> Result<(), DomainError>;
}

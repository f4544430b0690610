//! Credential error taxonomy

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::entity::CredentialStatus;
use super::validation::CredentialValidationError;
use crate::domain::DomainError;

/// Expected, named outcomes of credential operations
///
/// Store and cache failures are carried through the `Domain` variant.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential '{key_id}' not found")]
    NotFound { key_id: String },

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Credential '{key_id}' has expired")]
    KeyExpired { key_id: String },

    #[error("Action '{action}' is not permitted for this credential")]
    ActionNotPermitted { action: String },

    #[error("Rate limit of {limit} requests per minute exceeded, resets at {reset_at}")]
    RateLimitExceeded { limit: u32, reset_at: DateTime<Utc> },

    #[error("Credential '{key_id}' is already revoked")]
    AlreadyRevoked { key_id: String },

    #[error("Credential '{key_id}' is {status}")]
    Inactive {
        key_id: String,
        status: CredentialStatus,
    },

    #[error("Invalid input: {0}")]
    Validation(#[from] CredentialValidationError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl CredentialError {
    pub fn not_found(key_id: impl Into<String>) -> Self {
        Self::NotFound {
            key_id: key_id.into(),
        }
    }

    pub fn key_expired(key_id: impl Into<String>) -> Self {
        Self::KeyExpired {
            key_id: key_id.into(),
        }
    }

    pub fn action_not_permitted(action: impl Into<String>) -> Self {
        Self::ActionNotPermitted {
            action: action.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "KEY_NOT_FOUND",
            Self::InvalidPublicKey => "INVALID_PUBLIC_KEY",
            Self::InvalidPrivateKey => "INVALID_PRIVATE_KEY",
            Self::KeyExpired { .. } => "KEY_EXPIRED",
            Self::ActionNotPermitted { .. } => "ACTION_NOT_PERMITTED",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::AlreadyRevoked { .. } => "ALREADY_REVOKED",
            Self::Inactive { .. } => "KEY_INACTIVE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Domain(_) => "INTERNAL_ERROR",
        }
    }

    /// Numeric code reported to API callers
    pub fn numeric_code(&self) -> u16 {
        match self {
            Self::InvalidPublicKey => 4001,
            Self::InvalidPrivateKey => 4002,
            Self::KeyExpired { .. } => 4003,
            Self::ActionNotPermitted { .. } => 4004,
            Self::AlreadyRevoked { .. } => 4009,
            Self::Inactive { .. } => 4010,
            Self::Validation(_) => 4022,
            Self::RateLimitExceeded { .. } => 4029,
            Self::NotFound { .. } => 4040,
            Self::Domain(_) => 5000,
        }
    }

    /// Whether this is a rejection of the presented credential (as opposed to a system failure)
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Domain(_))
    }
}

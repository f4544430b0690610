//! Credential domain
//!
//! Types and traits for paired API credentials: the entity and its
//! lifecycle, the capability map, token validation and the store contract.

mod entity;
mod error;
mod permissions;
mod repository;
mod validation;

pub use entity::{
    Credential, CredentialId, CredentialState, CredentialStatus, CredentialUpdate, Environment,
    KeyType, StatusChange, DEFAULT_RATE_LIMIT_PER_MINUTE, EXPIRED_AUTOMATICALLY,
};
pub use error::CredentialError;
pub use permissions::{PermissionLimits, Permissions, Whitelist};
pub use repository::{CredentialRepository, CredentialTransaction, UsageIncrement};
pub use validation::{
    parse_token, validate_credential_name, CredentialValidationError, ParsedToken,
    MAX_CREDENTIAL_NAME_LENGTH, PRIVATE_LOOKUP_CHARS,
};

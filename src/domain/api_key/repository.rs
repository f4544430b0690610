//! Credential store traits

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::entity::{Credential, CredentialId, CredentialUpdate, Environment, StatusChange};
use crate::domain::DomainError;

/// Fields applied by an atomic usage increment
#[derive(Debug, Clone, PartialEq)]
pub struct UsageIncrement {
    pub ip_address: String,
    pub domain: Option<String>,
    pub used_at: DateTime<Utc>,
    pub update: CredentialUpdate,
}

/// Durable table of credential rows
#[async_trait]
pub trait CredentialRepository: Send + Sync + Debug {
    /// Open an isolated unit of work for the create-or-rotate flow
    ///
    /// Writes staged on the transaction become visible only after `commit`.
    /// Dropping the transaction without committing discards them.
    async fn begin(&self) -> Result<Box<dyn CredentialTransaction>, DomainError>;

    /// Get a credential by its internal id
    async fn get(&self, id: &CredentialId) -> Result<Option<Credential>, DomainError>;

    /// Get a credential by its externally visible key id
    async fn find_by_key_id(&self, key_id: &str) -> Result<Option<Credential>, DomainError>;

    /// Apply a status change if the row still has status `change.from`
    ///
    /// Writes only the status and audit fields. Returns the updated row, or
    /// `None` if it does not exist or has already moved on.
    async fn transition(
        &self,
        id: &CredentialId,
        change: &StatusChange,
    ) -> Result<Option<Credential>, DomainError>;

    /// Active credentials with a non-null `expires_at <= cutoff`
    async fn find_expired_active(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Credential>, DomainError>;

    /// List all credentials owned by a user
    async fn list_by_owner(&self, owner_user_id: &str) -> Result<Vec<Credential>, DomainError>;

    /// Atomically increment `usage_count` and apply the usage fields
    ///
    /// Applied only if the credential is still active. Returns the updated
    /// row, or `None` if it does not exist or is no longer active.
    async fn record_usage(
        &self,
        id: &CredentialId,
        usage: &UsageIncrement,
    ) -> Result<Option<Credential>, DomainError>;
}

/// Unit of work over the credential store
#[async_trait]
pub trait CredentialTransaction: Send {
    /// Active, unexpired credentials for an owner/company/environment
    async fn find_active_by_scope(
        &mut self,
        owner_user_id: &str,
        owner_company_id: &str,
        environment: Environment,
        now: DateTime<Utc>,
    ) -> Result<Vec<Credential>, DomainError>;

    /// Stage a new credential
    async fn insert(&mut self, credential: Credential) -> Result<Credential, DomainError>;

    /// Stage an update to an existing credential
    async fn update(&mut self, credential: &Credential) -> Result<Credential, DomainError>;

    /// Make all staged writes visible at once
    async fn commit(self: Box<Self>) -> Result<(), DomainError>;
}

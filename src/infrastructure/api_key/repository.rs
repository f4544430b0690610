//! In-memory credential repository implementation

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::domain::api_key::{
    Credential, CredentialId, CredentialRepository, CredentialStatus, CredentialTransaction,
    Environment, StatusChange, UsageIncrement,
};
use crate::domain::DomainError;

/// Rows plus the unique key-id index
#[derive(Debug, Clone, Default)]
struct CredentialTable {
    rows: HashMap<String, Credential>,
    by_key_id: HashMap<String, String>,
}

impl CredentialTable {
    fn insert(&mut self, credential: Credential) -> Result<Credential, DomainError> {
        let id = credential.id().as_str().to_string();

        if self.rows.contains_key(&id) {
            return Err(DomainError::conflict(format!(
                "Credential with ID '{}' already exists",
                id
            )));
        }

        if self.by_key_id.contains_key(credential.key_id()) {
            return Err(DomainError::conflict(format!(
                "Credential with key id '{}' already exists",
                credential.key_id()
            )));
        }

        self.by_key_id
            .insert(credential.key_id().to_string(), id.clone());
        self.rows.insert(id, credential.clone());

        Ok(credential)
    }

    fn replace(&mut self, credential: &Credential) -> Result<Credential, DomainError> {
        let id = credential.id().as_str().to_string();

        let previous_key_id = match self.rows.get(&id) {
            Some(existing) => existing.key_id().to_string(),
            None => {
                return Err(DomainError::not_found(format!(
                    "Credential '{}' not found",
                    id
                )));
            }
        };

        if previous_key_id != credential.key_id() {
            if self.by_key_id.contains_key(credential.key_id()) {
                return Err(DomainError::conflict(format!(
                    "Credential with key id '{}' already exists",
                    credential.key_id()
                )));
            }

            self.by_key_id.remove(&previous_key_id);
            self.by_key_id
                .insert(credential.key_id().to_string(), id.clone());
        }

        self.rows.insert(id, credential.clone());
        Ok(credential.clone())
    }

    fn find_by_key_id(&self, key_id: &str) -> Option<&Credential> {
        self.by_key_id.get(key_id).and_then(|id| self.rows.get(id))
    }
}

/// In-memory implementation of [`CredentialRepository`]
///
/// A transaction holds the table's write lock from `begin` until it is
/// committed or dropped, so create-or-rotate flows are fully serialized.
#[derive(Debug, Default)]
pub struct InMemoryCredentialRepository {
    table: Arc<RwLock<CredentialTable>>,
}

impl InMemoryCredentialRepository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows
    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Unit of work over a private copy of the table
struct InMemoryCredentialTransaction {
    guard: OwnedRwLockWriteGuard<CredentialTable>,
    working: CredentialTable,
}

#[async_trait]
impl CredentialTransaction for InMemoryCredentialTransaction {
    async fn find_active_by_scope(
        &mut self,
        owner_user_id: &str,
        owner_company_id: &str,
        environment: Environment,
        now: DateTime<Utc>,
    ) -> Result<Vec<Credential>, DomainError> {
        let mut found: Vec<Credential> = self
            .working
            .rows
            .values()
            .filter(|c| {
                c.owner_user_id() == owner_user_id
                    && c.owner_company_id() == owner_company_id
                    && c.environment() == environment
                    && c.is_valid_at(now)
            })
            .cloned()
            .collect();

        found.sort_by_key(|c| c.created_at());
        Ok(found)
    }

    async fn insert(&mut self, credential: Credential) -> Result<Credential, DomainError> {
        self.working.insert(credential)
    }

    async fn update(&mut self, credential: &Credential) -> Result<Credential, DomainError> {
        self.working.replace(credential)
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let this = *self;
        let mut guard = this.guard;
        *guard = this.working;
        Ok(())
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn begin(&self) -> Result<Box<dyn CredentialTransaction>, DomainError> {
        let guard = self.table.clone().write_owned().await;
        let working = guard.clone();

        Ok(Box::new(InMemoryCredentialTransaction { guard, working }))
    }

    async fn get(&self, id: &CredentialId) -> Result<Option<Credential>, DomainError> {
        let table = self.table.read().await;
        Ok(table.rows.get(id.as_str()).cloned())
    }

    async fn find_by_key_id(&self, key_id: &str) -> Result<Option<Credential>, DomainError> {
        let table = self.table.read().await;
        Ok(table.find_by_key_id(key_id).cloned())
    }

    async fn transition(
        &self,
        id: &CredentialId,
        change: &StatusChange,
    ) -> Result<Option<Credential>, DomainError> {
        let mut table = self.table.write().await;

        match table.rows.get_mut(id.as_str()) {
            Some(credential) if credential.status() == change.from => {
                credential.apply_status_change(change);
                Ok(Some(credential.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_expired_active(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Credential>, DomainError> {
        let table = self.table.read().await;

        let mut expired: Vec<Credential> = table
            .rows
            .values()
            .filter(|c| c.status() == CredentialStatus::Active && c.is_expired_at(cutoff))
            .cloned()
            .collect();

        expired.sort_by_key(|c| c.expires_at());
        Ok(expired)
    }

    async fn list_by_owner(&self, owner_user_id: &str) -> Result<Vec<Credential>, DomainError> {
        let table = self.table.read().await;

        let mut owned: Vec<Credential> = table
            .rows
            .values()
            .filter(|c| c.owner_user_id() == owner_user_id)
            .cloned()
            .collect();

        owned.sort_by_key(|c| c.created_at());
        Ok(owned)
    }

    async fn record_usage(
        &self,
        id: &CredentialId,
        usage: &UsageIncrement,
    ) -> Result<Option<Credential>, DomainError> {
        let mut table = self.table.write().await;

        let Some(credential) = table.rows.get_mut(id.as_str()) else {
            return Ok(None);
        };

        if credential.status() != CredentialStatus::Active {
            return Ok(None);
        }

        credential.record_usage(&usage.ip_address, usage.domain.as_deref(), usage.used_at);

        if !usage.update.is_empty() {
            credential.apply_update(&usage.update);
        }

        Ok(Some(credential.clone()))
    }
}

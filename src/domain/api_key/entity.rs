//! Credential entity and related types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::CredentialError;
use super::permissions::{Permissions, Whitelist};
use super::validation::CredentialValidationError;

/// Default per-minute request budget for a credential
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 1000;

/// Reason stamped on credentials expired by the sweeper
pub const EXPIRED_AUTOMATICALLY: &str = "expired automatically";

/// Opaque credential identifier (UUID v4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CredentialId(String);

impl CredentialId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier after validation
    pub fn new(id: impl Into<String>) -> Result<Self, CredentialValidationError> {
        let id = id.into();

        if id.is_empty() {
            return Err(CredentialValidationError::EmptyId);
        }

        Uuid::parse_str(&id).map_err(|_| CredentialValidationError::InvalidIdFormat(id.clone()))?;

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CredentialId {
    type Error = CredentialValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CredentialId> for String {
    fn from(id: CredentialId) -> Self {
        id.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which half of a pair a credential row represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Public,
    Private,
}

impl KeyType {
    /// Token prefix for this key type
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Public => "pk",
            Self::Private => "sk",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = CredentialValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(CredentialValidationError::UnknownKeyType(other.to_string())),
        }
    }
}

/// Deployment environment a credential is valid in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Test,
    Live,
    Sandbox,
}

impl Environment {
    pub const ALL: [Environment; 3] = [Self::Test, Self::Live, Self::Sandbox];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Live => "live",
            Self::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = CredentialValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "test" => Ok(Self::Test),
            "live" => Ok(Self::Live),
            "sandbox" => Ok(Self::Sandbox),
            other => Err(CredentialValidationError::UnknownEnvironment(
                other.to_string(),
            )),
        }
    }
}

/// Lifecycle status of a credential
///
/// Transitions only move forward: `Active` may become `Inactive`,
/// `Revoked` or `Expired`. `Revoked` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    #[default]
    Active,
    Inactive,
    Revoked,
    Expired,
}

impl CredentialStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Revoked | Self::Expired)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: CredentialStatus) -> bool {
        match (self, next) {
            (Self::Active, Self::Inactive | Self::Revoked | Self::Expired) => true,
            (Self::Inactive, Self::Revoked | Self::Expired) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialStatus {
    type Err = CredentialValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "revoked" => Ok(Self::Revoked),
            "expired" => Ok(Self::Expired),
            other => Err(CredentialValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// Bounded set of fields that may be changed while recording usage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialUpdate {
    pub rate_limit_per_minute: Option<u32>,
    pub permissions: Option<Permissions>,
    pub description: Option<String>,
}

impl CredentialUpdate {
    pub fn is_empty(&self) -> bool {
        self.rate_limit_per_minute.is_none()
            && self.permissions.is_none()
            && self.description.is_none()
    }
}

/// Lifecycle change applied by a conditional store write
///
/// The store applies it only while the row still has status `from`, and
/// never touches the usage fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub from: CredentialStatus,
    pub to: CredentialStatus,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
    pub revocation_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted state that only lifecycle operations change
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialState {
    pub id: CredentialId,
    pub status: CredentialStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub usage_count: u64,
    pub updated_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
    pub revocation_reason: Option<String>,
}

/// A single API credential row (one half of a pair)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    id: CredentialId,
    /// Public rows store the full public token. Private rows store a lookup prefix.
    key_id: String,
    /// Argon2 PHC string of the full token
    key_hash: String,
    key_type: KeyType,
    environment: Environment,
    owner_user_id: String,
    owner_company_id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    permissions: Permissions,
    #[serde(default)]
    ip_whitelist: Whitelist,
    #[serde(default)]
    domain_whitelist: Whitelist,
    status: CredentialStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_used_ip: Option<String>,
    usage_count: u64,
    rate_limit_per_minute: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revoked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revocation_reason: Option<String>,
}

impl Credential {
    /// Create a new active credential
    pub fn new(
        key_type: KeyType,
        environment: Environment,
        owner_user_id: impl Into<String>,
        owner_company_id: impl Into<String>,
        key_id: impl Into<String>,
        key_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: CredentialId::generate(),
            key_id: key_id.into(),
            key_hash: key_hash.into(),
            key_type,
            environment,
            owner_user_id: owner_user_id.into(),
            owner_company_id: owner_company_id.into(),
            name: "default".to_string(),
            description: None,
            permissions: Permissions::defaults(),
            ip_whitelist: Whitelist::new(),
            domain_whitelist: Whitelist::new(),
            status: CredentialStatus::Active,
            expires_at: None,
            last_used_at: None,
            last_used_ip: None,
            usage_count: 0,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            created_at: now,
            updated_at: now,
            created_by: None,
            revoked_at: None,
            revoked_by: None,
            revocation_reason: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_ip_whitelist(mut self, whitelist: Whitelist) -> Self {
        self.ip_whitelist = whitelist;
        self
    }

    pub fn with_domain_whitelist(mut self, whitelist: Whitelist) -> Self {
        self.domain_whitelist = whitelist;
        self
    }

    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_rate_limit_per_minute(mut self, limit: u32) -> Self {
        self.rate_limit_per_minute = limit;
        self
    }

    pub fn with_created_by(mut self, created_by: Option<String>) -> Self {
        self.created_by = created_by;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    /// Rehydrate lifecycle state loaded from a store
    pub fn restore(mut self, state: CredentialState) -> Self {
        self.id = state.id;
        self.status = state.status;
        self.last_used_at = state.last_used_at;
        self.last_used_ip = state.last_used_ip;
        self.usage_count = state.usage_count;
        self.updated_at = state.updated_at;
        self.revoked_at = state.revoked_at;
        self.revoked_by = state.revoked_by;
        self.revocation_reason = state.revocation_reason;
        self
    }

    // Getters

    pub fn id(&self) -> &CredentialId {
        &self.id
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn key_hash(&self) -> &str {
        &self.key_hash
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn owner_user_id(&self) -> &str {
        &self.owner_user_id
    }

    pub fn owner_company_id(&self) -> &str {
        &self.owner_company_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    pub fn ip_whitelist(&self) -> &Whitelist {
        &self.ip_whitelist
    }

    pub fn domain_whitelist(&self) -> &Whitelist {
        &self.domain_whitelist
    }

    pub fn status(&self) -> CredentialStatus {
        self.status
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        self.last_used_at
    }

    pub fn last_used_ip(&self) -> Option<&str> {
        self.last_used_ip.as_deref()
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    pub fn rate_limit_per_minute(&self) -> u32 {
        self.rate_limit_per_minute
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    pub fn revoked_by(&self) -> Option<&str> {
        self.revoked_by.as_deref()
    }

    pub fn revocation_reason(&self) -> Option<&str> {
        self.revocation_reason.as_deref()
    }

    // Status checks

    /// Whether `expires_at` is set and not after `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Active and not past expiry
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_usable() && !self.is_expired_at(now)
    }

    /// Whole days until expiry, negative once past. `None` if the key never expires.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at
            .map(|expires_at| (expires_at - now).num_days())
    }

    /// Same owner, company and environment as `other`
    pub fn same_scope_as(&self, other: &Credential) -> bool {
        self.owner_user_id == other.owner_user_id
            && self.owner_company_id == other.owner_company_id
            && self.environment == other.environment
    }

    /// Permissions and IP whitelist both equal the requested ones
    pub fn matches_request(&self, permissions: &Permissions, ip_whitelist: &Whitelist) -> bool {
        &self.permissions == permissions && &self.ip_whitelist == ip_whitelist
    }

    // Lifecycle transitions

    fn transition(&mut self, next: CredentialStatus) -> Result<(), CredentialError> {
        if !self.status.can_transition_to(next) {
            return Err(CredentialError::Inactive {
                key_id: self.key_id.clone(),
                status: self.status,
            });
        }

        self.status = next;
        self.touch();
        Ok(())
    }

    /// Revoke the credential, stamping the audit fields
    pub fn revoke(
        &mut self,
        actor: impl Into<String>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        if self.status == CredentialStatus::Revoked {
            return Err(CredentialError::AlreadyRevoked {
                key_id: self.key_id.clone(),
            });
        }

        self.transition(CredentialStatus::Revoked)?;
        self.revoked_at = Some(now);
        self.revoked_by = Some(actor.into());
        self.revocation_reason = Some(reason.into());
        Ok(())
    }

    /// Mark the credential as expired
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), CredentialError> {
        self.transition(CredentialStatus::Expired)?;
        self.revoked_at = Some(now);
        self.revocation_reason = Some(EXPIRED_AUTOMATICALLY.to_string());
        Ok(())
    }

    /// The change that moves a stored row from `from` to this credential's status
    pub fn status_change_from(&self, from: CredentialStatus) -> StatusChange {
        StatusChange {
            from,
            to: self.status,
            revoked_at: self.revoked_at,
            revoked_by: self.revoked_by.clone(),
            revocation_reason: self.revocation_reason.clone(),
            updated_at: self.updated_at,
        }
    }

    /// Take the status and audit fields of `change`
    pub fn apply_status_change(&mut self, change: &StatusChange) {
        self.status = change.to;
        self.revoked_at = change.revoked_at;
        self.revoked_by = change.revoked_by.clone();
        self.revocation_reason = change.revocation_reason.clone();
        self.updated_at = change.updated_at;
    }

    /// Temporarily disable the credential
    pub fn deactivate(&mut self) -> Result<(), CredentialError> {
        self.transition(CredentialStatus::Inactive)
    }

    /// Replace token material and reset usage counters, keeping identity
    pub fn rotate(&mut self, key_id: impl Into<String>, key_hash: impl Into<String>) {
        self.key_id = key_id.into();
        self.key_hash = key_hash.into();
        self.usage_count = 0;
        self.last_used_at = None;
        self.touch();
    }

    /// Overwrite the mutable request metadata used on rotation
    pub fn set_metadata(&mut self, name: impl Into<String>, description: Option<String>) {
        self.name = name.into();
        self.description = description;
        self.touch();
    }

    /// Take a new limit, if given, and add the requested domains on rotation
    pub fn refresh_limits(&mut self, rate_limit_per_minute: Option<u32>, domains: &Whitelist) {
        if let Some(limit) = rate_limit_per_minute {
            self.rate_limit_per_minute = limit;
        }

        for domain in domains.iter() {
            self.domain_whitelist.insert(domain);
        }

        self.touch();
    }

    /// Count one use and grow the whitelists
    pub fn record_usage(&mut self, ip_address: &str, domain: Option<&str>, now: DateTime<Utc>) {
        self.usage_count = self.usage_count.saturating_add(1);
        self.last_used_at = Some(now);
        self.last_used_ip = Some(ip_address.to_string());
        self.ip_whitelist.insert(ip_address);

        if let Some(domain) = domain {
            self.domain_whitelist.insert(domain);
        }

        self.updated_at = now;
    }

    /// Apply the allow-listed extra fields
    pub fn apply_update(&mut self, update: &CredentialUpdate) {
        if let Some(limit) = update.rate_limit_per_minute {
            self.rate_limit_per_minute = limit;
        }

        if let Some(permissions) = &update.permissions {
            self.permissions = permissions.clone();
        }

        if let Some(description) = &update.description {
            self.description = Some(description.clone());
        }

        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

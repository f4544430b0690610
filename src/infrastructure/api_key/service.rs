//! Credential service
//!
//! Orchestrates pair creation and rotation, revocation, verification,
//! usage recording, rate limiting and the expiry sweep.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::domain::api_key::{
    parse_token, validate_credential_name, Credential, CredentialError, CredentialId,
    CredentialRepository, CredentialStatus, CredentialUpdate, Environment, KeyType, Permissions,
    UsageIncrement, Whitelist, DEFAULT_RATE_LIMIT_PER_MINUTE,
};
use crate::domain::cache::{Cache, JsonCache};
use crate::domain::notification::{
    mask_key, CredentialEvent, CredentialEventKind, CredentialNotifier,
};

use super::generator::KeyPairGenerator;
use super::hasher::fingerprint;
use super::rate_limiter::{RateLimitDecision, RateLimiter};

/// Tunables for [`CredentialService`]
#[derive(Debug, Clone)]
pub struct CredentialServiceConfig {
    /// Lifetime of a newly created pair
    pub validity: ChronoDuration,
    /// How long a successful verification is cached
    pub verification_cache_ttl: Duration,
    /// Per-minute limit given to new pairs
    pub default_rate_limit_per_minute: u32,
}

impl Default for CredentialServiceConfig {
    fn default() -> Self {
        Self {
            validity: ChronoDuration::days(730),
            verification_cache_ttl: Duration::from_secs(3600),
            default_rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
        }
    }
}

/// Request to create or rotate a pair
#[derive(Debug, Clone, Default)]
pub struct CreatePairRequest {
    pub environment: Environment,
    pub name: Option<String>,
    pub description: Option<String>,
    /// `None` means the default capability map
    pub permissions: Option<Permissions>,
    pub ip_whitelist: Whitelist,
    pub domain_whitelist: Whitelist,
    pub rate_limit_per_minute: Option<u32>,
    pub created_by: Option<String>,
}

impl CreatePairRequest {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_ip_whitelist(mut self, whitelist: Whitelist) -> Self {
        self.ip_whitelist = whitelist;
        self
    }

    pub fn with_rate_limit_per_minute(mut self, limit: u32) -> Self {
        self.rate_limit_per_minute = Some(limit);
        self
    }

    pub fn with_created_by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = Some(actor.into());
        self
    }

    fn resolved_permissions(&self) -> Permissions {
        self.permissions.clone().unwrap_or_else(Permissions::defaults)
    }
}

/// Whether a request created a new pair or rotated an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairOutcome {
    Created,
    Rotated,
}

/// Result of create-or-rotate. The plaintext tokens are returned only here.
#[derive(Clone)]
pub struct IssuedPair {
    pub outcome: PairOutcome,
    pub public: Credential,
    pub private: Credential,
    pub public_token: String,
    pub private_token: String,
}

impl fmt::Debug for IssuedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedPair")
            .field("outcome", &self.outcome)
            .field("public", &self.public.id())
            .field("private", &self.private.id())
            .field("public_token", &self.public_token)
            .field("private_token", &"<redacted>")
            .finish()
    }
}

/// Identity resolved from a verified pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub owner_user_id: String,
    pub owner_company_id: String,
    pub environment: Environment,
    pub public_credential_id: CredentialId,
    pub private_credential_id: CredentialId,
    pub permissions: Permissions,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Cached result of a successful verification
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedVerification {
    private_fingerprint: String,
    identity: VerifiedIdentity,
}

/// Usage figures for one credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyUsageStats {
    pub credential_id: CredentialId,
    pub key_id: String,
    pub key_type: KeyType,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub rate_limit_per_minute: u32,
    pub status: CredentialStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub ip_whitelist: Whitelist,
    pub domain_whitelist: Whitelist,
    /// Negative once past, `None` if the key never expires
    pub days_until_expiry: Option<i64>,
}

impl KeyUsageStats {
    pub fn from_credential(credential: &Credential, now: DateTime<Utc>) -> Self {
        Self {
            credential_id: credential.id().clone(),
            key_id: mask_key(credential.key_id()),
            key_type: credential.key_type(),
            usage_count: credential.usage_count(),
            last_used_at: credential.last_used_at(),
            last_used_ip: credential.last_used_ip().map(str::to_string),
            rate_limit_per_minute: credential.rate_limit_per_minute(),
            status: credential.status(),
            expires_at: credential.expires_at(),
            ip_whitelist: credential.ip_whitelist().clone(),
            domain_whitelist: credential.domain_whitelist().clone(),
            days_until_expiry: credential.days_until_expiry(now),
        }
    }
}

/// One credential the sweep could not expire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub key_id: String,
    pub error: String,
}

/// Outcome of an expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub total_checked: usize,
    pub expired_count: usize,
    /// Candidates revoked or expired by someone else before the sweep reached them
    #[serde(default)]
    pub skipped_count: usize,
    pub expired: Vec<KeyUsageStats>,
    pub errors: Vec<SweepFailure>,
}

/// Credential lifecycle service
#[derive(Debug, Clone)]
pub struct CredentialService {
    repository: Arc<dyn CredentialRepository>,
    cache: Arc<dyn Cache>,
    rate_limiter: RateLimiter,
    generator: KeyPairGenerator,
    notifier: Arc<dyn CredentialNotifier>,
    config: CredentialServiceConfig,
}

fn verification_key(owner_user_id: &str, public_token: &str) -> String {
    format!(
        "verification:{}:{}",
        owner_user_id,
        fingerprint(public_token)
    )
}

impl CredentialService {
    pub fn new(
        repository: Arc<dyn CredentialRepository>,
        cache: Arc<dyn Cache>,
        generator: KeyPairGenerator,
        notifier: Arc<dyn CredentialNotifier>,
    ) -> Self {
        Self {
            repository,
            rate_limiter: RateLimiter::new(cache.clone()),
            cache,
            generator,
            notifier,
            config: CredentialServiceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CredentialServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Create a new pair, or rotate the active pair with identical
    /// permissions and IP whitelist for the same owner, company and environment
    pub async fn create_or_rotate_pair(
        &self,
        owner_user_id: &str,
        owner_company_id: &str,
        request: CreatePairRequest,
    ) -> Result<IssuedPair, CredentialError> {
        if let Some(name) = &request.name {
            validate_credential_name(name)?;
        }

        let permissions = request.resolved_permissions();
        let environment = request.environment;

        // Hash outside the transaction to keep the lock short
        let generated = self.generator.generate(environment)?;
        let now = Utc::now();

        let mut tx = self.repository.begin().await?;
        let active = tx
            .find_active_by_scope(owner_user_id, owner_company_id, environment, now)
            .await?;

        let matching = |key_type: KeyType| {
            active
                .iter()
                .find(|c| {
                    c.key_type() == key_type
                        && c.matches_request(&permissions, &request.ip_whitelist)
                })
                .cloned()
        };

        let (outcome, public, private) =
            match (matching(KeyType::Public), matching(KeyType::Private)) {
                (Some(mut public), Some(mut private)) => {
                    for (credential, key_id, key_hash) in [
                        (&mut private, &generated.private_key_id, &generated.private_hash),
                        (&mut public, &generated.public_token, &generated.public_hash),
                    ] {
                        credential.rotate(key_id.as_str(), key_hash.as_str());
                        let name = request
                            .name
                            .clone()
                            .unwrap_or_else(|| credential.name().to_string());
                        let description = request
                            .description
                            .clone()
                            .or_else(|| credential.description().map(str::to_string));
                        credential.set_metadata(name, description);
                        credential.refresh_limits(
                            request.rate_limit_per_minute,
                            &request.domain_whitelist,
                        );
                    }

                    let private = tx.update(&private).await?;
                    let public = tx.update(&public).await?;
                    (PairOutcome::Rotated, public, private)
                }
                _ => {
                    let expires_at = now + self.config.validity;
                    let build = |key_type: KeyType, key_id: &str, key_hash: &str| {
                        Credential::new(
                            key_type,
                            environment,
                            owner_user_id,
                            owner_company_id,
                            key_id,
                            key_hash,
                        )
                        .with_name(request.name.clone().unwrap_or_else(|| "default".to_string()))
                        .with_description(request.description.clone())
                        .with_permissions(permissions.clone())
                        .with_ip_whitelist(request.ip_whitelist.clone())
                        .with_domain_whitelist(request.domain_whitelist.clone())
                        .with_rate_limit_per_minute(
                            request
                                .rate_limit_per_minute
                                .unwrap_or(self.config.default_rate_limit_per_minute),
                        )
                        .with_created_by(request.created_by.clone())
                        .with_expiration(expires_at)
                    };

                    let private = tx
                        .insert(build(
                            KeyType::Private,
                            &generated.private_key_id,
                            &generated.private_hash,
                        ))
                        .await?;
                    let public = tx
                        .insert(build(
                            KeyType::Public,
                            &generated.public_token,
                            &generated.public_hash,
                        ))
                        .await?;
                    (PairOutcome::Created, public, private)
                }
            };

        tx.commit().await?;

        let kind = match outcome {
            PairOutcome::Created => CredentialEventKind::PairCreated,
            PairOutcome::Rotated => {
                self.invalidate_verifications(owner_user_id).await;
                CredentialEventKind::PairRotated
            }
        };

        info!(
            user_id = %owner_user_id,
            company_id = %owner_company_id,
            environment = %environment,
            public_key_id = %public.id(),
            private_key_id = %private.id(),
            outcome = ?outcome,
            "Credential pair issued"
        );

        self.notify(CredentialEvent::new(kind, &[&public, &private]))
            .await;

        Ok(IssuedPair {
            outcome,
            public,
            private,
            public_token: generated.public_token,
            private_token: generated.private_token,
        })
    }

    /// Resolve a stored key id from either a key id or a presented token
    fn stored_key_id(key_id: &str) -> String {
        match parse_token(key_id) {
            Ok(parsed) => parsed.lookup_id(),
            Err(_) => key_id.to_string(),
        }
    }

    async fn find(&self, key_id: &str) -> Result<Credential, CredentialError> {
        self.repository
            .find_by_key_id(&Self::stored_key_id(key_id))
            .await?
            .ok_or_else(|| CredentialError::not_found(mask_key(key_id)))
    }

    /// Revoke a credential
    pub async fn revoke(
        &self,
        key_id: &str,
        actor: &str,
        reason: &str,
    ) -> Result<Credential, CredentialError> {
        let mut credential = self.find(key_id).await?;
        let observed = credential.status();

        credential.revoke(actor, reason, Utc::now())?;
        let Some(revoked) = self
            .repository
            .transition(credential.id(), &credential.status_change_from(observed))
            .await?
        else {
            return Err(self.lost_transition(&credential).await?);
        };

        info!(
            key_id = %mask_key(revoked.key_id()),
            user_id = %revoked.owner_user_id(),
            revoked_by = %actor,
            "Credential revoked"
        );

        self.invalidate_verifications(revoked.owner_user_id()).await;
        self.notify(
            CredentialEvent::new(CredentialEventKind::Revoked, &[&revoked]).with_reason(reason),
        )
        .await;

        Ok(revoked)
    }

    /// Error for a revoke that found the row already moved on
    async fn lost_transition(
        &self,
        credential: &Credential,
    ) -> Result<CredentialError, CredentialError> {
        let masked = mask_key(credential.key_id());

        Ok(match self.repository.get(credential.id()).await? {
            None => CredentialError::not_found(masked),
            Some(current) if current.status() == CredentialStatus::Revoked => {
                CredentialError::AlreadyRevoked { key_id: masked }
            }
            Some(current) => CredentialError::Inactive {
                key_id: masked,
                status: current.status(),
            },
        })
    }

    /// Verify a presented pair, optionally checking an action permission
    pub async fn verify_pair(
        &self,
        public_token: &str,
        private_token: &str,
        environment: Environment,
        action: Option<&str>,
    ) -> Result<VerifiedIdentity, CredentialError> {
        let public_shape = parse_token(public_token).map_err(|_| CredentialError::InvalidPublicKey)?;
        if public_shape.key_type != KeyType::Public || public_shape.environment != environment {
            return Err(CredentialError::InvalidPublicKey);
        }

        let private_shape =
            parse_token(private_token).map_err(|_| CredentialError::InvalidPrivateKey)?;
        if private_shape.key_type != KeyType::Private || private_shape.environment != environment {
            return Err(CredentialError::InvalidPrivateKey);
        }

        let now = Utc::now();

        let public = match self.repository.find_by_key_id(public_token).await? {
            Some(c)
                if c.key_type() == KeyType::Public
                    && c.environment() == environment
                    && c.status() == CredentialStatus::Active =>
            {
                c
            }
            _ => return Err(CredentialError::InvalidPublicKey),
        };

        if public.is_expired_at(now) {
            self.expire(public.clone(), now).await?;
            return Err(CredentialError::key_expired(mask_key(public.key_id())));
        }

        let cache_key = verification_key(public.owner_user_id(), public_token);
        if let Some(identity) = self.cached_verification(&cache_key, private_token, now).await {
            debug!(key_id = %mask_key(public_token), "Verification served from cache");
            return Self::authorize(identity, action);
        }

        if !self.generator.hasher().verify(public_token, public.key_hash()) {
            return Err(CredentialError::InvalidPublicKey);
        }

        let private = match self
            .repository
            .find_by_key_id(&private_shape.lookup_id())
            .await?
        {
            Some(c)
                if c.key_type() == KeyType::Private
                    && c.same_scope_as(&public)
                    && c.status() == CredentialStatus::Active
                    && self.generator.hasher().verify(private_token, c.key_hash()) =>
            {
                c
            }
            _ => return Err(CredentialError::InvalidPrivateKey),
        };

        if private.is_expired_at(now) {
            self.expire(private, now).await?;
            return Err(CredentialError::InvalidPrivateKey);
        }

        let identity = VerifiedIdentity {
            owner_user_id: public.owner_user_id().to_string(),
            owner_company_id: public.owner_company_id().to_string(),
            environment,
            public_credential_id: public.id().clone(),
            private_credential_id: private.id().clone(),
            permissions: public.permissions().clone(),
            expires_at: public.expires_at(),
        };

        self.cache_verification(&cache_key, private_token, &identity, now)
            .await;

        Self::authorize(identity, action)
    }

    fn authorize(
        identity: VerifiedIdentity,
        action: Option<&str>,
    ) -> Result<VerifiedIdentity, CredentialError> {
        match action {
            Some(action) if !identity.permissions.allows(action) => {
                Err(CredentialError::action_not_permitted(action))
            }
            _ => Ok(identity),
        }
    }

    async fn cached_verification(
        &self,
        cache_key: &str,
        private_token: &str,
        now: DateTime<Utc>,
    ) -> Option<VerifiedIdentity> {
        let cached: CachedVerification = match self.cache.get_json(cache_key).await {
            Ok(Some(cached)) => cached,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Verification cache read failed");
                return None;
            }
        };

        let still_valid = cached
            .identity
            .expires_at
            .is_none_or(|expires_at| expires_at > now);

        if cached.private_fingerprint == fingerprint(private_token) && still_valid {
            Some(cached.identity)
        } else {
            None
        }
    }

    async fn cache_verification(
        &self,
        cache_key: &str,
        private_token: &str,
        identity: &VerifiedIdentity,
        now: DateTime<Utc>,
    ) {
        let mut ttl = self.config.verification_cache_ttl;

        if let Some(remaining) = identity
            .expires_at
            .and_then(|expires_at| (expires_at - now).to_std().ok())
        {
            ttl = ttl.min(remaining);
        }

        if ttl.is_zero() {
            return;
        }

        let entry = CachedVerification {
            private_fingerprint: fingerprint(private_token),
            identity: identity.clone(),
        };

        if let Err(e) = self.cache.put_json(cache_key, &entry, ttl).await {
            warn!(error = %e, "Verification cache write failed");
        }
    }

    async fn invalidate_verifications(&self, owner_user_id: &str) {
        let pattern = format!("verification:{}:*", owner_user_id);

        if let Err(e) = self.cache.delete_pattern(&pattern).await {
            warn!(user_id = %owner_user_id, error = %e, "Failed to invalidate cached verifications");
        }
    }

    /// Count one use of a credential
    ///
    /// Rejections are logged and returned as errors. An overdue credential is
    /// expired as a side effect.
    pub async fn record_usage(
        &self,
        key_id: &str,
        ip_address: &str,
        domain: Option<&str>,
        update: CredentialUpdate,
    ) -> Result<Credential, CredentialError> {
        let credential = match self.find(key_id).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(key_id = %mask_key(key_id), "Usage rejected: credential not found");
                return Err(e);
            }
        };

        if credential.status() != CredentialStatus::Active {
            warn!(
                key_id = %mask_key(key_id),
                status = %credential.status(),
                "Usage rejected: credential not active"
            );
            return Err(CredentialError::Inactive {
                key_id: mask_key(credential.key_id()),
                status: credential.status(),
            });
        }

        let now = Utc::now();

        if credential.is_expired_at(now) {
            warn!(key_id = %mask_key(key_id), "Usage rejected: credential expired");
            self.expire(credential.clone(), now).await?;
            return Err(CredentialError::key_expired(mask_key(credential.key_id())));
        }

        let usage = UsageIncrement {
            ip_address: ip_address.to_string(),
            domain: domain.map(str::to_string),
            used_at: now,
            update,
        };

        match self.repository.record_usage(credential.id(), &usage).await? {
            Some(updated) => {
                debug!(
                    key_id = %mask_key(key_id),
                    usage_count = updated.usage_count(),
                    "Usage recorded"
                );
                Ok(updated)
            }
            None => {
                // Lost a race with a revoke or expiry
                let status = self
                    .repository
                    .get(credential.id())
                    .await?
                    .map(|c| c.status())
                    .unwrap_or(CredentialStatus::Inactive);

                warn!(key_id = %mask_key(key_id), status = %status, "Usage rejected: credential changed");
                Err(CredentialError::Inactive {
                    key_id: mask_key(credential.key_id()),
                    status,
                })
            }
        }
    }

    /// Count a request against the credential's per-minute limit
    ///
    /// Missing, inactive and expired credentials get a closed decision.
    pub async fn check_rate_limit(&self, key_id: &str) -> Result<RateLimitDecision, CredentialError> {
        let now = Utc::now();

        let credential = match self.find(key_id).await {
            Ok(credential) if credential.status() == CredentialStatus::Active => credential,
            Ok(_) | Err(CredentialError::NotFound { .. }) => {
                debug!(key_id = %mask_key(key_id), "Rate limit closed: credential missing or inactive");
                return Ok(RateLimitDecision::denied(now));
            }
            Err(e) => return Err(e),
        };

        if credential.is_expired_at(now) {
            self.expire(credential, now).await?;
            return Ok(RateLimitDecision::denied(now));
        }

        Ok(self
            .rate_limiter
            .check_and_record(credential.key_id(), credential.rate_limit_per_minute(), now)
            .await?)
    }

    /// Like [`check_rate_limit`](Self::check_rate_limit), but a denial is an error
    pub async fn enforce_rate_limit(
        &self,
        key_id: &str,
    ) -> Result<RateLimitDecision, CredentialError> {
        let decision = self.check_rate_limit(key_id).await?;

        if decision.allowed {
            Ok(decision)
        } else {
            Err(CredentialError::RateLimitExceeded {
                limit: decision.limit,
                reset_at: decision.reset_at,
            })
        }
    }

    /// Expire an overdue credential
    ///
    /// Returns `None` if the row was revoked or expired concurrently; that
    /// row is left as it is.
    async fn expire(
        &self,
        mut credential: Credential,
        now: DateTime<Utc>,
    ) -> Result<Option<Credential>, CredentialError> {
        let observed = credential.status();
        credential.expire(now)?;

        let Some(expired) = self
            .repository
            .transition(credential.id(), &credential.status_change_from(observed))
            .await?
        else {
            debug!(
                key_id = %mask_key(credential.key_id()),
                "Credential left its status before expiry"
            );
            return Ok(None);
        };

        info!(
            key_id = %mask_key(expired.key_id()),
            user_id = %expired.owner_user_id(),
            "Credential expired"
        );

        self.invalidate_verifications(expired.owner_user_id()).await;
        self.notify(CredentialEvent::new(CredentialEventKind::Expired, &[&expired]))
            .await;

        Ok(Some(expired))
    }

    /// Expire every active credential past its expiry, optionally only one key
    ///
    /// A failure on one credential is recorded and does not stop the others.
    pub async fn sweep_expired(&self, key_id: Option<&str>) -> Result<SweepReport, CredentialError> {
        let now = Utc::now();
        let only = key_id.map(Self::stored_key_id);

        let candidates: Vec<Credential> = self
            .repository
            .find_expired_active(now)
            .await?
            .into_iter()
            .filter(|c| only.as_deref().is_none_or(|k| c.key_id() == k))
            .collect();

        let mut report = SweepReport {
            total_checked: candidates.len(),
            ..Default::default()
        };

        for credential in candidates {
            let masked = mask_key(credential.key_id());

            match self.expire(credential, now).await {
                Ok(Some(expired)) => {
                    report.expired_count += 1;
                    report.expired.push(KeyUsageStats::from_credential(&expired, now));
                }
                Ok(None) => report.skipped_count += 1,
                Err(e) => {
                    error!(key_id = %masked, error = %e, "Failed to expire credential");
                    report.errors.push(SweepFailure {
                        key_id: masked,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            total_checked = report.total_checked,
            expired_count = report.expired_count,
            skipped_count = report.skipped_count,
            errors = report.errors.len(),
            "Expiry sweep finished"
        );

        Ok(report)
    }

    /// Usage figures for a credential, by key id or credential id
    pub async fn key_usage_stats(&self, key: &str) -> Result<KeyUsageStats, CredentialError> {
        let credential = match self
            .repository
            .find_by_key_id(&Self::stored_key_id(key))
            .await?
        {
            Some(credential) => credential,
            None => match CredentialId::new(key) {
                Ok(id) => self
                    .repository
                    .get(&id)
                    .await?
                    .ok_or_else(|| CredentialError::not_found(key))?,
                Err(_) => return Err(CredentialError::not_found(mask_key(key))),
            },
        };

        Ok(KeyUsageStats::from_credential(&credential, Utc::now()))
    }

    /// Every credential row owned by a user
    pub async fn list_for_owner(&self, owner_user_id: &str) -> Result<Vec<Credential>, CredentialError> {
        Ok(self.repository.list_by_owner(owner_user_id).await?)
    }

    async fn notify(&self, event: CredentialEvent) {
        if let Err(e) = self.notifier.notify(&event).await {
            error!(
                event = event.kind.as_str(),
                user_id = %event.owner_user_id,
                error = %e,
                "Credential notification failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::domain::api_key::{CredentialTransaction, PermissionLimits, StatusChange};
    use crate::domain::cache::MockCache;
    use crate::domain::notification::MockCredentialNotifier;
    use crate::domain::DomainError;
    use crate::infrastructure::api_key::hasher::{Argon2SecretHasher, HashCost, SecretHasher};
    use crate::infrastructure::api_key::repository::InMemoryCredentialRepository;
    use crate::infrastructure::cache::InMemoryCache;

    /// Write that lands right before the service's status change
    #[derive(Debug, Clone, Copy)]
    enum Interleaved {
        Usage,
        Revoke,
    }

    /// Repository wrapper whose status changes fail or race for chosen key ids
    #[derive(Debug, Default)]
    struct FlakyCredentialRepository {
        inner: InMemoryCredentialRepository,
        failing_key_ids: Mutex<Vec<String>>,
        interleaved: Mutex<Vec<(String, Interleaved)>>,
    }

    impl FlakyCredentialRepository {
        fn fail_updates_for(&self, key_id: &str) {
            self.failing_key_ids.lock().unwrap().push(key_id.to_string());
        }

        fn interleave(&self, key_id: &str, write: Interleaved) {
            self.interleaved
                .lock()
                .unwrap()
                .push((key_id.to_string(), write));
        }

        async fn run_interleaved(&self, current: &Credential) {
            let writes: Vec<Interleaved> = {
                let mut pending = self.interleaved.lock().unwrap();
                let (due, rest): (Vec<_>, Vec<_>) = pending
                    .drain(..)
                    .partition(|(key_id, _)| key_id == current.key_id());
                *pending = rest;
                due.into_iter().map(|(_, write)| write).collect()
            };

            for write in writes {
                match write {
                    Interleaved::Usage => {
                        let usage = UsageIncrement {
                            ip_address: "10.9.9.9".to_string(),
                            domain: None,
                            used_at: Utc::now(),
                            update: CredentialUpdate::default(),
                        };
                        self.inner.record_usage(current.id(), &usage).await.unwrap();
                    }
                    Interleaved::Revoke => {
                        let mut revoking = self.inner.get(current.id()).await.unwrap().unwrap();
                        let observed = revoking.status();
                        revoking.revoke("admin-2", "leaked", Utc::now()).unwrap();
                        self.inner
                            .transition(current.id(), &revoking.status_change_from(observed))
                            .await
                            .unwrap()
                            .unwrap();
                    }
                }
            }
        }
    }

    #[async_trait]
    impl CredentialRepository for FlakyCredentialRepository {
        async fn begin(&self) -> Result<Box<dyn CredentialTransaction>, DomainError> {
            self.inner.begin().await
        }

        async fn get(&self, id: &CredentialId) -> Result<Option<Credential>, DomainError> {
            self.inner.get(id).await
        }

        async fn find_by_key_id(&self, key_id: &str) -> Result<Option<Credential>, DomainError> {
            self.inner.find_by_key_id(key_id).await
        }

        async fn transition(
            &self,
            id: &CredentialId,
            change: &StatusChange,
        ) -> Result<Option<Credential>, DomainError> {
            if let Some(current) = self.inner.get(id).await? {
                let failing = self
                    .failing_key_ids
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|k| k == current.key_id());
                if failing {
                    return Err(DomainError::storage("injected write failure"));
                }

                self.run_interleaved(&current).await;
            }

            self.inner.transition(id, change).await
        }

        async fn find_expired_active(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Result<Vec<Credential>, DomainError> {
            self.inner.find_expired_active(cutoff).await
        }

        async fn list_by_owner(&self, owner_user_id: &str) -> Result<Vec<Credential>, DomainError> {
            self.inner.list_by_owner(owner_user_id).await
        }

        async fn record_usage(
            &self,
            id: &CredentialId,
            usage: &UsageIncrement,
        ) -> Result<Option<Credential>, DomainError> {
            self.inner.record_usage(id, usage).await
        }
    }

    fn hasher() -> Arc<dyn SecretHasher> {
        Arc::new(Argon2SecretHasher::new(HashCost::minimal()).unwrap())
    }

    fn quiet_notifier() -> Arc<dyn CredentialNotifier> {
        let mut notifier = MockCredentialNotifier::new();
        notifier.expect_notify().returning(|_| Ok(()));
        Arc::new(notifier)
    }

    fn service_with(
        repository: Arc<dyn CredentialRepository>,
        cache: Arc<dyn Cache>,
        notifier: Arc<dyn CredentialNotifier>,
    ) -> CredentialService {
        CredentialService::new(repository, cache, KeyPairGenerator::new(hasher()), notifier)
    }

    fn service() -> (CredentialService, Arc<InMemoryCredentialRepository>) {
        let repository = Arc::new(InMemoryCredentialRepository::new());
        let service = service_with(
            repository.clone(),
            Arc::new(InMemoryCache::new()),
            quiet_notifier(),
        );
        (service, repository)
    }

    async fn seed(repository: &dyn CredentialRepository, credential: Credential) -> Credential {
        let mut tx = repository.begin().await.unwrap();
        let stored = tx.insert(credential).await.unwrap();
        tx.commit().await.unwrap();
        stored
    }

    fn overdue(key_id: &str) -> Credential {
        Credential::new(KeyType::Public, Environment::Test, "user-1", "company-1", key_id, "hash")
            .with_expiration(Utc::now() - ChronoDuration::hours(1))
    }

    #[tokio::test]
    async fn test_create_pair() {
        let (service, repository) = service();

        let issued = service
            .create_or_rotate_pair("user-1", "company-1", CreatePairRequest::new(Environment::Live))
            .await
            .unwrap();

        assert_eq!(issued.outcome, PairOutcome::Created);
        assert!(issued.public_token.starts_with("pk_live_"));
        assert!(issued.private_token.starts_with("sk_live_"));
        assert_eq!(issued.public.key_id(), issued.public_token);
        assert_ne!(issued.private.key_id(), issued.private_token);
        assert!(!issued.private.key_hash().contains(&issued.private_token));
        assert_eq!(issued.public.permissions(), &Permissions::defaults());
        assert_eq!(issued.public.name(), "default");

        let expires_at = issued.public.expires_at().unwrap();
        let expected = Utc::now() + ChronoDuration::days(730);
        assert!((expected - expires_at).num_seconds().abs() < 60);

        assert_eq!(repository.len().await, 2);
    }

    #[tokio::test]
    async fn test_identical_request_rotates() {
        let (service, repository) = service();
        let request = CreatePairRequest::new(Environment::Test)
            .with_ip_whitelist(["10.0.0.2", "10.0.0.1"].into_iter().collect());

        let first = service
            .create_or_rotate_pair("user-1", "company-1", request.clone())
            .await
            .unwrap();

        service
            .record_usage(&first.public_token, "10.0.0.1", None, CredentialUpdate::default())
            .await
            .unwrap();

        let reordered = CreatePairRequest::new(Environment::Test)
            .with_ip_whitelist(["10.0.0.1", "10.0.0.2"].into_iter().collect())
            .with_name("renamed");
        let second = service
            .create_or_rotate_pair("user-1", "company-1", reordered)
            .await
            .unwrap();

        assert_eq!(second.outcome, PairOutcome::Rotated);
        assert_eq!(second.public.id(), first.public.id());
        assert_eq!(second.private.id(), first.private.id());
        assert_ne!(second.public_token, first.public_token);
        assert_ne!(second.private.key_id(), first.private.key_id());
        assert_eq!(second.public.usage_count(), 0);
        assert!(second.public.last_used_at().is_none());
        assert_eq!(second.public.name(), "renamed");
        assert_eq!(second.public.created_at(), first.public.created_at());

        assert_eq!(repository.len().await, 2);
        assert!(repository.find_by_key_id(&first.public_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_different_permissions_create_second_pair() {
        let (service, repository) = service();

        service
            .create_or_rotate_pair("user-1", "company-1", CreatePairRequest::new(Environment::Test))
            .await
            .unwrap();

        let read_only = Permissions::new()
            .with_operation("payments", "read", true)
            .with_limits(PermissionLimits::default());
        let second = service
            .create_or_rotate_pair(
                "user-1",
                "company-1",
                CreatePairRequest::new(Environment::Test).with_permissions(read_only),
            )
            .await
            .unwrap();

        assert_eq!(second.outcome, PairOutcome::Created);
        assert_eq!(repository.len().await, 4);
        assert_eq!(service.list_for_owner("user-1").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_yield_one_pair() {
        let (service, repository) = service();
        let service = Arc::new(service);
        let mut handles = Vec::new();

        for _ in 0..4 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .create_or_rotate_pair(
                        "user-1",
                        "company-1",
                        CreatePairRequest::new(Environment::Sandbox),
                    )
                    .await
                    .unwrap()
                    .outcome
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() == PairOutcome::Created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(repository.len().await, 2);
    }

    #[tokio::test]
    async fn test_name_too_long_is_rejected() {
        let (service, _) = service();

        let result = service
            .create_or_rotate_pair(
                "user-1",
                "company-1",
                CreatePairRequest::new(Environment::Test).with_name("x".repeat(101)),
            )
            .await;

        assert!(matches!(result, Err(CredentialError::Validation(_))));
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_create() {
        let repository = Arc::new(InMemoryCredentialRepository::new());
        let mut notifier = MockCredentialNotifier::new();
        notifier
            .expect_notify()
            .times(1)
            .returning(|_| Err(DomainError::transient("webhook", "connection refused")));

        let service = service_with(
            repository.clone(),
            Arc::new(InMemoryCache::new()),
            Arc::new(notifier),
        );

        let issued = service
            .create_or_rotate_pair("user-1", "company-1", CreatePairRequest::new(Environment::Test))
            .await;

        assert!(issued.is_ok());
        assert_eq!(repository.len().await, 2);
    }

    #[tokio::test]
    async fn test_notification_never_carries_private_token() {
        let repository = Arc::new(InMemoryCredentialRepository::new());
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut notifier = MockCredentialNotifier::new();
        notifier.expect_notify().returning(move |event| {
            sink.lock().unwrap().push(serde_json::to_string(event).unwrap());
            Ok(())
        });

        let service = service_with(repository, Arc::new(InMemoryCache::new()), Arc::new(notifier));
        let issued = service
            .create_or_rotate_pair("user-1", "company-1", CreatePairRequest::new(Environment::Test))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("pair_created"));
        assert!(!seen[0].contains(&issued.private_token));
        assert!(!seen[0].contains(&issued.public_token));
    }

    #[tokio::test]
    async fn test_verify_pair_success() {
        let (service, _) = service();
        let issued = service
            .create_or_rotate_pair("user-1", "company-1", CreatePairRequest::new(Environment::Test))
            .await
            .unwrap();

        let identity = service
            .verify_pair(
                &issued.public_token,
                &issued.private_token,
                Environment::Test,
                Some("payments.create"),
            )
            .await
            .unwrap();

        assert_eq!(identity.owner_user_id, "user-1");
        assert_eq!(identity.owner_company_id, "company-1");
        assert_eq!(identity.permissions, Permissions::defaults());

        // Second call is served from the cache and still checks the action
        let denied = service
            .verify_pair(
                &issued.public_token,
                &issued.private_token,
                Environment::Test,
                Some("payments.update"),
            )
            .await;
        assert!(matches!(denied, Err(CredentialError::ActionNotPermitted { .. })));

        let malformed = service
            .verify_pair(
                &issued.public_token,
                &issued.private_token,
                Environment::Test,
                Some("payments"),
            )
            .await;
        assert!(matches!(malformed, Err(CredentialError::ActionNotPermitted { .. })));
    }

    #[tokio::test]
    async fn test_verify_pair_rejections() {
        let (service, _) = service();
        let issued = service
            .create_or_rotate_pair("user-1", "company-1", CreatePairRequest::new(Environment::Test))
            .await
            .unwrap();
        let other = service
            .create_or_rotate_pair("user-2", "company-1", CreatePairRequest::new(Environment::Test))
            .await
            .unwrap();

        let wrong_private = service
            .verify_pair(&issued.public_token, &other.private_token, Environment::Test, None)
            .await;
        assert!(matches!(wrong_private, Err(CredentialError::InvalidPrivateKey)));

        let unknown_public = service
            .verify_pair(
                "pk_test_AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
                &issued.private_token,
                Environment::Test,
                None,
            )
            .await;
        assert!(matches!(unknown_public, Err(CredentialError::InvalidPublicKey)));

        let wrong_env = service
            .verify_pair(&issued.public_token, &issued.private_token, Environment::Live, None)
            .await;
        assert!(matches!(wrong_env, Err(CredentialError::InvalidPublicKey)));

        let swapped = service
            .verify_pair(&issued.private_token, &issued.public_token, Environment::Test, None)
            .await;
        assert!(matches!(swapped, Err(CredentialError::InvalidPublicKey)));
    }

    #[tokio::test]
    async fn test_verify_revoked_public_key_after_cached_success() {
        let (service, _) = service();
        let issued = service
            .create_or_rotate_pair("user-1", "company-1", CreatePairRequest::new(Environment::Test))
            .await
            .unwrap();

        service
            .verify_pair(&issued.public_token, &issued.private_token, Environment::Test, None)
            .await
            .unwrap();

        service
            .revoke(&issued.public_token, "admin-1", "compromised")
            .await
            .unwrap();

        let result = service
            .verify_pair(&issued.public_token, &issued.private_token, Environment::Test, None)
            .await;
        assert!(matches!(result, Err(CredentialError::InvalidPublicKey)));
    }

    #[tokio::test]
    async fn test_verify_expired_public_key_expires_it() {
        let (service, repository) = service();
        let hasher = hasher();

        let public_token = "pk_test_EXPIREDexpiredEXPIREDexpired12";
        let private_token = "sk_test_EXPIREDexpiredEXPIREDexpiredEXPIREDexpiredEXPIREDexpired1234";
        let past = Utc::now() - ChronoDuration::minutes(1);

        let public = seed(
            repository.as_ref(),
            Credential::new(
                KeyType::Public,
                Environment::Test,
                "user-1",
                "company-1",
                public_token,
                hasher.hash(public_token).unwrap(),
            )
            .with_expiration(past),
        )
        .await;

        let result = service
            .verify_pair(public_token, private_token, Environment::Test, None)
            .await;

        assert!(matches!(result, Err(CredentialError::KeyExpired { .. })));
        let stored = repository.get(public.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), CredentialStatus::Expired);
    }

    #[tokio::test]
    async fn test_revoke() {
        let (service, _) = service();
        let issued = service
            .create_or_rotate_pair("user-1", "company-1", CreatePairRequest::new(Environment::Test))
            .await
            .unwrap();

        let revoked = service
            .revoke(&issued.public_token, "admin-1", "rotation policy")
            .await
            .unwrap();
        assert_eq!(revoked.status(), CredentialStatus::Revoked);
        assert_eq!(revoked.revoked_by(), Some("admin-1"));
        assert_eq!(revoked.revocation_reason(), Some("rotation policy"));

        let again = service.revoke(&issued.public_token, "admin-1", "again").await;
        assert!(matches!(again, Err(CredentialError::AlreadyRevoked { .. })));

        let missing = service.revoke("pk_test_nothere", "admin-1", "x").await;
        assert!(matches!(missing, Err(CredentialError::NotFound { .. })));

        // Private rows can be revoked with the full token
        let private = service
            .revoke(&issued.private_token, "admin-1", "x")
            .await
            .unwrap();
        assert_eq!(private.id(), issued.private.id());
    }

    #[tokio::test]
    async fn test_revoke_invalidates_cached_verifications() {
        let repository = Arc::new(InMemoryCredentialRepository::new());
        let cache = Arc::new(MockCache::new());
        let service = service_with(repository, cache.clone(), quiet_notifier());

        let issued = service
            .create_or_rotate_pair("user-1", "company-1", CreatePairRequest::new(Environment::Test))
            .await
            .unwrap();
        service
            .verify_pair(&issued.public_token, &issued.private_token, Environment::Test, None)
            .await
            .unwrap();

        assert_eq!(cache.keys("verification:user-1:*").await.unwrap().len(), 1);

        service
            .revoke(&issued.private_token, "admin-1", "x")
            .await
            .unwrap();

        assert!(cache.keys("verification:user-1:*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_usage() {
        let (service, _) = service();
        let issued = service
            .create_or_rotate_pair("user-1", "company-1", CreatePairRequest::new(Environment::Test))
            .await
            .unwrap();

        let update = CredentialUpdate {
            rate_limit_per_minute: Some(50),
            ..Default::default()
        };
        let updated = service
            .record_usage(&issued.public_token, "10.1.1.1", Some("shop.example.com"), update)
            .await
            .unwrap();

        assert_eq!(updated.usage_count(), 1);
        assert_eq!(updated.last_used_ip(), Some("10.1.1.1"));
        assert!(updated.ip_whitelist().contains("10.1.1.1"));
        assert!(updated.domain_whitelist().contains("shop.example.com"));
        assert_eq!(updated.rate_limit_per_minute(), 50);

        let again = service
            .record_usage(&issued.public_token, "10.1.1.1", None, CredentialUpdate::default())
            .await
            .unwrap();
        assert_eq!(again.usage_count(), 2);
        assert_eq!(again.ip_whitelist().len(), 1);
    }

    #[tokio::test]
    async fn test_record_usage_rejections() {
        let (service, repository) = service();

        let missing = service
            .record_usage("pk_test_missing", "10.0.0.1", None, CredentialUpdate::default())
            .await;
        assert!(matches!(missing, Err(CredentialError::NotFound { .. })));

        let stored = seed(repository.as_ref(), overdue("pk_test_overdue")).await;
        let expired = service
            .record_usage("pk_test_overdue", "10.0.0.1", None, CredentialUpdate::default())
            .await;
        assert!(matches!(expired, Err(CredentialError::KeyExpired { .. })));
        assert_eq!(
            repository.get(stored.id()).await.unwrap().unwrap().status(),
            CredentialStatus::Expired
        );

        let after = service
            .record_usage("pk_test_overdue", "10.0.0.1", None, CredentialUpdate::default())
            .await;
        assert!(matches!(after, Err(CredentialError::Inactive { .. })));
        assert_eq!(
            repository.get(stored.id()).await.unwrap().unwrap().usage_count(),
            0
        );
    }

    #[tokio::test]
    async fn test_check_rate_limit() {
        let (service, _) = service();
        let issued = service
            .create_or_rotate_pair(
                "user-1",
                "company-1",
                CreatePairRequest::new(Environment::Test).with_rate_limit_per_minute(3),
            )
            .await
            .unwrap();

        let mut last = None;
        for _ in 0..3 {
            let decision = service.check_rate_limit(&issued.public_token).await.unwrap();
            assert!(decision.allowed);
            last = Some(decision);
        }

        let denied = service.check_rate_limit(&issued.public_token).await.unwrap();

        // A minute boundary may fall between calls; compare only within one bucket
        if denied.reset_at == last.unwrap().reset_at {
            assert!(!denied.allowed);
            assert_eq!(denied.remaining, 0);

            let enforced = service.enforce_rate_limit(&issued.public_token).await;
            assert!(matches!(
                enforced,
                Err(CredentialError::RateLimitExceeded { limit: 3, .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_check_rate_limit_fails_closed() {
        let (service, repository) = service();

        let missing = service.check_rate_limit("pk_test_missing").await.unwrap();
        assert!(!missing.allowed);

        let stored = seed(repository.as_ref(), overdue("pk_test_late")).await;
        let expired = service.check_rate_limit("pk_test_late").await.unwrap();
        assert!(!expired.allowed);
        assert_eq!(
            repository.get(stored.id()).await.unwrap().unwrap().status(),
            CredentialStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_sweep_isolates_failures() {
        let repository = Arc::new(FlakyCredentialRepository::default());
        let service = service_with(
            repository.clone(),
            Arc::new(InMemoryCache::new()),
            quiet_notifier(),
        );
        let now = Utc::now();

        let mut keep = Vec::new();
        for i in 0..3 {
            let credential = Credential::new(
                KeyType::Public,
                Environment::Test,
                "user-1",
                "company-1",
                format!("pk_test_fresh{}", i),
                "hash",
            )
            .with_expiration(now + ChronoDuration::days(30));
            keep.push(seed(repository.as_ref(), credential).await);
        }

        let late_ok = seed(repository.as_ref(), overdue("pk_test_lateok")).await;
        let late_bad = seed(repository.as_ref(), overdue("pk_test_latebad")).await;
        repository.fail_updates_for("pk_test_latebad");

        let report = service.sweep_expired(None).await.unwrap();

        assert_eq!(report.total_checked, 2);
        assert_eq!(report.expired_count, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].error.contains("injected"));
        assert_eq!(report.expired[0].credential_id, *late_ok.id());
        assert!(report.expired[0].days_until_expiry.unwrap() <= 0);

        let stored = repository.get(late_ok.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), CredentialStatus::Expired);
        assert_eq!(
            repository.get(late_bad.id()).await.unwrap().unwrap().status(),
            CredentialStatus::Active
        );

        for credential in keep {
            let stored = repository.get(credential.id()).await.unwrap().unwrap();
            assert_eq!(stored.status(), CredentialStatus::Active);
            assert_eq!(stored.usage_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent_and_filters_by_key() {
        let (service, repository) = service();
        seed(repository.as_ref(), overdue("pk_test_one")).await;
        seed(repository.as_ref(), overdue("pk_test_two")).await;

        let only_one = service.sweep_expired(Some("pk_test_one")).await.unwrap();
        assert_eq!(only_one.total_checked, 1);
        assert_eq!(only_one.expired_count, 1);

        let rest = service.sweep_expired(None).await.unwrap();
        assert_eq!(rest.expired_count, 1);

        let again = service.sweep_expired(None).await.unwrap();
        assert_eq!(again.total_checked, 0);
        assert!(again.errors.is_empty());
    }

    #[tokio::test]
    async fn test_key_usage_stats() {
        let (service, _) = service();
        let issued = service
            .create_or_rotate_pair("user-1", "company-1", CreatePairRequest::new(Environment::Test))
            .await
            .unwrap();

        service
            .record_usage(&issued.public_token, "10.0.0.1", None, CredentialUpdate::default())
            .await
            .unwrap();

        let by_key = service.key_usage_stats(&issued.public_token).await.unwrap();
        assert_eq!(by_key.usage_count, 1);
        assert_eq!(by_key.status, CredentialStatus::Active);
        assert!(by_key.days_until_expiry.unwrap() >= 729);
        assert!(!by_key.key_id.contains(&issued.public_token[12..]));

        let by_id = service
            .key_usage_stats(issued.private.id().as_str())
            .await
            .unwrap();
        assert_eq!(by_id.key_type, KeyType::Private);

        assert!(matches!(
            service.key_usage_stats("nope").await,
            Err(CredentialError::NotFound { .. })
        ));
    }

    fn flaky_service() -> (CredentialService, Arc<FlakyCredentialRepository>) {
        let repository = Arc::new(FlakyCredentialRepository::default());
        let service = service_with(
            repository.clone(),
            Arc::new(InMemoryCache::new()),
            quiet_notifier(),
        );
        (service, repository)
    }

    fn current(key_id: &str) -> Credential {
        Credential::new(KeyType::Public, Environment::Test, "user-1", "company-1", key_id, "hash")
            .with_expiration(Utc::now() + ChronoDuration::days(30))
    }

    #[tokio::test]
    async fn test_revoke_keeps_concurrent_usage() {
        let (service, repository) = flaky_service();
        let stored = seed(repository.as_ref(), current("pk_test_busy")).await;

        service
            .record_usage("pk_test_busy", "10.0.0.1", None, CredentialUpdate::default())
            .await
            .unwrap();
        repository.interleave("pk_test_busy", Interleaved::Usage);

        let revoked = service
            .revoke("pk_test_busy", "admin-1", "rotation policy")
            .await
            .unwrap();

        assert_eq!(revoked.status(), CredentialStatus::Revoked);
        assert_eq!(revoked.usage_count(), 2);
        assert_eq!(revoked.last_used_ip(), Some("10.9.9.9"));

        let stored = repository.get(stored.id()).await.unwrap().unwrap();
        assert_eq!(stored.usage_count(), 2);
        assert_eq!(stored.revoked_by(), Some("admin-1"));
    }

    #[tokio::test]
    async fn test_revoke_racing_another_revoke() {
        let (service, repository) = flaky_service();
        let stored = seed(repository.as_ref(), current("pk_test_twice")).await;
        repository.interleave("pk_test_twice", Interleaved::Revoke);

        let result = service.revoke("pk_test_twice", "admin-1", "late").await;

        assert!(matches!(result, Err(CredentialError::AlreadyRevoked { .. })));
        let stored = repository.get(stored.id()).await.unwrap().unwrap();
        assert_eq!(stored.revoked_by(), Some("admin-2"));
        assert_eq!(stored.revocation_reason(), Some("leaked"));
    }

    #[tokio::test]
    async fn test_sweep_skips_concurrently_revoked() {
        let (service, repository) = flaky_service();
        let raced = seed(repository.as_ref(), overdue("pk_test_raced")).await;
        let plain = seed(repository.as_ref(), overdue("pk_test_plain")).await;
        repository.interleave("pk_test_raced", Interleaved::Revoke);

        let report = service.sweep_expired(None).await.unwrap();

        assert_eq!(report.total_checked, 2);
        assert_eq!(report.expired_count, 1);
        assert_eq!(report.skipped_count, 1);
        assert!(report.errors.is_empty());
        assert_eq!(report.expired[0].credential_id, *plain.id());

        let raced = repository.get(raced.id()).await.unwrap().unwrap();
        assert_eq!(raced.status(), CredentialStatus::Revoked);
        assert_eq!(raced.revoked_by(), Some("admin-2"));
        assert_eq!(raced.revocation_reason(), Some("leaked"));

        let again = service.sweep_expired(None).await.unwrap();
        assert_eq!(again.total_checked, 0);
        assert_eq!(again.expired_count, 0);
    }

    #[tokio::test]
    async fn test_verify_expired_private_key_expires_it() {
        let (service, repository) = service();
        let hasher = hasher();

        let public_token = "pk_test_LIVEpublicLIVEpublicLIVEpublic12";
        let private_token = "sk_test_PASTprivatePASTprivatePASTprivatePASTprivatePASTprivate12";
        let now = Utc::now();

        let public = seed(
            repository.as_ref(),
            Credential::new(
                KeyType::Public,
                Environment::Test,
                "user-1",
                "company-1",
                public_token,
                hasher.hash(public_token).unwrap(),
            )
            .with_expiration(now + ChronoDuration::days(30)),
        )
        .await;
        let lookup = parse_token(private_token).unwrap().lookup_id();
        let private = seed(
            repository.as_ref(),
            Credential::new(
                KeyType::Private,
                Environment::Test,
                "user-1",
                "company-1",
                lookup,
                hasher.hash(private_token).unwrap(),
            )
            .with_expiration(now - ChronoDuration::minutes(1)),
        )
        .await;

        let result = service
            .verify_pair(public_token, private_token, Environment::Test, None)
            .await;

        assert!(matches!(result, Err(CredentialError::InvalidPrivateKey)));
        assert_eq!(
            repository.get(private.id()).await.unwrap().unwrap().status(),
            CredentialStatus::Expired
        );
        assert_eq!(
            repository.get(public.id()).await.unwrap().unwrap().status(),
            CredentialStatus::Active
        );
    }

    #[tokio::test]
    async fn test_rotation_applies_requested_limits() {
        let (service, _) = service();
        let first = service
            .create_or_rotate_pair("user-1", "company-1", CreatePairRequest::new(Environment::Test))
            .await
            .unwrap();
        assert_eq!(
            first.public.rate_limit_per_minute(),
            DEFAULT_RATE_LIMIT_PER_MINUTE
        );

        let request = CreatePairRequest {
            domain_whitelist: ["shop.example.com"].into_iter().collect(),
            ..CreatePairRequest::new(Environment::Test).with_rate_limit_per_minute(25)
        };
        let second = service
            .create_or_rotate_pair("user-1", "company-1", request)
            .await
            .unwrap();

        assert_eq!(second.outcome, PairOutcome::Rotated);
        for credential in [&second.public, &second.private] {
            assert_eq!(credential.rate_limit_per_minute(), 25);
            assert!(credential.domain_whitelist().contains("shop.example.com"));
        }
    }
}

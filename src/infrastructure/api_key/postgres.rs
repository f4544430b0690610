//! PostgreSQL credential repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};

use crate::domain::api_key::{
    Credential, CredentialId, CredentialRepository, CredentialState, CredentialTransaction,
    Environment, Permissions, StatusChange, UsageIncrement, Whitelist,
};
use crate::domain::DomainError;
use crate::infrastructure::storage::storage_error;

const COLUMNS: &str = "id, key_id, key_hash, key_type, environment, owner_user_id, \
    owner_company_id, name, description, permissions, ip_whitelist, domain_whitelist, status, \
    expires_at, last_used_at, last_used_ip, usage_count, rate_limit_per_minute, created_by, \
    revoked_at, revoked_by, revocation_reason, created_at, updated_at";

fn json_column<T: serde::de::DeserializeOwned>(row: &PgRow, column: &str) -> Result<T, DomainError> {
    let value: serde_json::Value = row
        .try_get(column)
        .map_err(|e| storage_error("Failed to read credential row", e))?;

    serde_json::from_value(value)
        .map_err(|e| DomainError::storage(format!("Invalid {} column: {}", column, e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, DomainError> {
    serde_json::to_value(value)
        .map_err(|e| DomainError::storage(format!("Failed to serialize credential: {}", e)))
}

fn from_row(row: &PgRow) -> Result<Credential, DomainError> {
    let get = |e: sqlx::Error| storage_error("Failed to read credential row", e);
    let parse = |e: crate::domain::api_key::CredentialValidationError| {
        DomainError::storage(format!("Invalid credential row: {}", e))
    };

    let id: String = row.try_get("id").map_err(get)?;
    let key_type: String = row.try_get("key_type").map_err(get)?;
    let environment: String = row.try_get("environment").map_err(get)?;
    let status: String = row.try_get("status").map_err(get)?;
    let usage_count: i64 = row.try_get("usage_count").map_err(get)?;
    let rate_limit: i32 = row.try_get("rate_limit_per_minute").map_err(get)?;

    let permissions: Permissions = json_column(row, "permissions")?;
    let ip_whitelist: Whitelist = json_column(row, "ip_whitelist")?;
    let domain_whitelist: Whitelist = json_column(row, "domain_whitelist")?;

    let mut credential = Credential::new(
        key_type.parse().map_err(parse)?,
        environment.parse::<Environment>().map_err(parse)?,
        row.try_get::<String, _>("owner_user_id").map_err(get)?,
        row.try_get::<String, _>("owner_company_id").map_err(get)?,
        row.try_get::<String, _>("key_id").map_err(get)?,
        row.try_get::<String, _>("key_hash").map_err(get)?,
    )
    .with_name(row.try_get::<String, _>("name").map_err(get)?)
    .with_description(row.try_get("description").map_err(get)?)
    .with_permissions(permissions)
    .with_ip_whitelist(ip_whitelist)
    .with_domain_whitelist(domain_whitelist)
    .with_rate_limit_per_minute(u32::try_from(rate_limit).unwrap_or_default())
    .with_created_by(row.try_get("created_by").map_err(get)?)
    .with_created_at(row.try_get("created_at").map_err(get)?);

    if let Some(expires_at) = row
        .try_get::<Option<DateTime<Utc>>, _>("expires_at")
        .map_err(get)?
    {
        credential = credential.with_expiration(expires_at);
    }

    Ok(credential.restore(CredentialState {
        id: CredentialId::new(id).map_err(parse)?,
        status: status.parse().map_err(parse)?,
        last_used_at: row.try_get("last_used_at").map_err(get)?,
        last_used_ip: row.try_get("last_used_ip").map_err(get)?,
        usage_count: u64::try_from(usage_count).unwrap_or_default(),
        updated_at: row.try_get("updated_at").map_err(get)?,
        revoked_at: row.try_get("revoked_at").map_err(get)?,
        revoked_by: row.try_get("revoked_by").map_err(get)?,
        revocation_reason: row.try_get("revocation_reason").map_err(get)?,
    }))
}

fn from_rows(rows: &[PgRow]) -> Result<Vec<Credential>, DomainError> {
    rows.iter().map(from_row).collect()
}

async fn insert_credential<'e, E>(executor: E, credential: &Credential) -> Result<(), DomainError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let query = format!(
        "INSERT INTO api_keys ({}) VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, \
          $20, $21, $22, $23, $24)",
        COLUMNS
    );

    sqlx::query(&query)
        .bind(credential.id().as_str())
        .bind(credential.key_id())
        .bind(credential.key_hash())
        .bind(credential.key_type().as_str())
        .bind(credential.environment().as_str())
        .bind(credential.owner_user_id())
        .bind(credential.owner_company_id())
        .bind(credential.name())
        .bind(credential.description())
        .bind(to_json(credential.permissions())?)
        .bind(to_json(credential.ip_whitelist())?)
        .bind(to_json(credential.domain_whitelist())?)
        .bind(credential.status().as_str())
        .bind(credential.expires_at())
        .bind(credential.last_used_at())
        .bind(credential.last_used_ip())
        .bind(i64::try_from(credential.usage_count()).unwrap_or(i64::MAX))
        .bind(i32::try_from(credential.rate_limit_per_minute()).unwrap_or(i32::MAX))
        .bind(credential.created_by())
        .bind(credential.revoked_at())
        .bind(credential.revoked_by())
        .bind(credential.revocation_reason())
        .bind(credential.created_at())
        .bind(credential.updated_at())
        .execute(executor)
        .await
        .map_err(|e| storage_error("Failed to insert credential", e))?;

    Ok(())
}

/// Full-row write used by rotation inside a transaction
async fn update_credential<'e, E>(executor: E, credential: &Credential) -> Result<(), DomainError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE api_keys SET
            key_id = $2, key_hash = $3, name = $4, description = $5, permissions = $6,
            ip_whitelist = $7, domain_whitelist = $8, status = $9, expires_at = $10,
            last_used_at = $11, last_used_ip = $12, usage_count = $13,
            rate_limit_per_minute = $14, revoked_at = $15, revoked_by = $16,
            revocation_reason = $17, updated_at = $18
        WHERE id = $1
        "#,
    )
    .bind(credential.id().as_str())
    .bind(credential.key_id())
    .bind(credential.key_hash())
    .bind(credential.name())
    .bind(credential.description())
    .bind(to_json(credential.permissions())?)
    .bind(to_json(credential.ip_whitelist())?)
    .bind(to_json(credential.domain_whitelist())?)
    .bind(credential.status().as_str())
    .bind(credential.expires_at())
    .bind(credential.last_used_at())
    .bind(credential.last_used_ip())
    .bind(i64::try_from(credential.usage_count()).unwrap_or(i64::MAX))
    .bind(i32::try_from(credential.rate_limit_per_minute()).unwrap_or(i32::MAX))
    .bind(credential.revoked_at())
    .bind(credential.revoked_by())
    .bind(credential.revocation_reason())
    .bind(credential.updated_at())
    .execute(executor)
    .await
    .map_err(|e| storage_error("Failed to update credential", e))?;

    if result.rows_affected() == 0 {
        return Err(DomainError::not_found(format!(
            "Credential '{}' not found",
            credential.id()
        )));
    }

    Ok(())
}

/// Advisory lock key for one owner, company and environment
fn scope_lock_key(owner_user_id: &str, owner_company_id: &str, environment: Environment) -> String {
    format!(
        "api_keys:{}:{}:{}",
        owner_user_id,
        owner_company_id,
        environment.as_str()
    )
}

/// PostgreSQL implementation of [`CredentialRepository`]
#[derive(Debug, Clone)]
pub struct PostgresCredentialRepository {
    pool: PgPool,
}

impl PostgresCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<Credential>, DomainError> {
        let query = format!("SELECT {} FROM api_keys WHERE {} = $1", COLUMNS, clause);

        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to load credential", e))?;

        row.as_ref().map(from_row).transpose()
    }
}

/// Transaction scoped to one create-or-rotate flow
///
/// The first scope lookup takes a transaction-level advisory lock on the
/// scope, serializing concurrent flows for the same owner and environment.
struct PostgresCredentialTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CredentialTransaction for PostgresCredentialTransaction {
    async fn find_active_by_scope(
        &mut self,
        owner_user_id: &str,
        owner_company_id: &str,
        environment: Environment,
        now: DateTime<Utc>,
    ) -> Result<Vec<Credential>, DomainError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(scope_lock_key(owner_user_id, owner_company_id, environment))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| storage_error("Failed to lock credential scope", e))?;

        let query = format!(
            "SELECT {} FROM api_keys \
             WHERE owner_user_id = $1 AND owner_company_id = $2 AND environment = $3 \
               AND status = 'active' AND (expires_at IS NULL OR expires_at > $4) \
             ORDER BY created_at",
            COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(owner_user_id)
            .bind(owner_company_id)
            .bind(environment.as_str())
            .bind(now)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| storage_error("Failed to load credentials", e))?;

        from_rows(&rows)
    }

    async fn insert(&mut self, credential: Credential) -> Result<Credential, DomainError> {
        insert_credential(&mut *self.tx, &credential).await?;
        Ok(credential)
    }

    async fn update(&mut self, credential: &Credential) -> Result<Credential, DomainError> {
        update_credential(&mut *self.tx, credential).await?;
        Ok(credential.clone())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.tx
            .commit()
            .await
            .map_err(|e| storage_error("Failed to commit credential transaction", e))
    }
}

#[async_trait]
impl CredentialRepository for PostgresCredentialRepository {
    async fn begin(&self) -> Result<Box<dyn CredentialTransaction>, DomainError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin transaction", e))?;

        Ok(Box::new(PostgresCredentialTransaction { tx }))
    }

    async fn get(&self, id: &CredentialId) -> Result<Option<Credential>, DomainError> {
        self.fetch_one_where("id", id.as_str()).await
    }

    async fn find_by_key_id(&self, key_id: &str) -> Result<Option<Credential>, DomainError> {
        self.fetch_one_where("key_id", key_id).await
    }

    async fn transition(
        &self,
        id: &CredentialId,
        change: &StatusChange,
    ) -> Result<Option<Credential>, DomainError> {
        let query = format!(
            "UPDATE api_keys SET status = $3, revoked_at = $4, revoked_by = $5, \
                 revocation_reason = $6, updated_at = $7 \
             WHERE id = $1 AND status = $2 RETURNING {}",
            COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(id.as_str())
            .bind(change.from.as_str())
            .bind(change.to.as_str())
            .bind(change.revoked_at)
            .bind(change.revoked_by.as_deref())
            .bind(change.revocation_reason.as_deref())
            .bind(change.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to change credential status", e))?;

        row.as_ref().map(from_row).transpose()
    }

    async fn find_expired_active(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Credential>, DomainError> {
        let query = format!(
            "SELECT {} FROM api_keys \
             WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= $1 \
             ORDER BY expires_at",
            COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to load expired credentials", e))?;

        from_rows(&rows)
    }

    async fn list_by_owner(&self, owner_user_id: &str) -> Result<Vec<Credential>, DomainError> {
        let query = format!(
            "SELECT {} FROM api_keys WHERE owner_user_id = $1 ORDER BY created_at",
            COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(owner_user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to list credentials", e))?;

        from_rows(&rows)
    }

    async fn record_usage(
        &self,
        id: &CredentialId,
        usage: &UsageIncrement,
    ) -> Result<Option<Credential>, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin transaction", e))?;

        // The row lock keeps the whitelist merge below consistent
        let query = format!(
            "UPDATE api_keys SET usage_count = usage_count + 1, last_used_at = $2, \
                 last_used_ip = $3, updated_at = $2 \
             WHERE id = $1 AND status = 'active' RETURNING {}",
            COLUMNS
        );

        let Some(row) = sqlx::query(&query)
            .bind(id.as_str())
            .bind(usage.used_at)
            .bind(&usage.ip_address)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| storage_error("Failed to record usage", e))?
        else {
            return Ok(None);
        };

        let counted = from_row(&row)?;
        let mut merged = counted.clone();
        merged.record_usage(&usage.ip_address, usage.domain.as_deref(), usage.used_at);
        if !usage.update.is_empty() {
            merged.apply_update(&usage.update);
        }

        // record_usage on the entity counted once more; keep the database count
        let updated_at = merged.updated_at();
        let merged = merged.restore(CredentialState {
            id: counted.id().clone(),
            status: counted.status(),
            last_used_at: counted.last_used_at(),
            last_used_ip: counted.last_used_ip().map(str::to_string),
            usage_count: counted.usage_count(),
            updated_at,
            revoked_at: counted.revoked_at(),
            revoked_by: counted.revoked_by().map(str::to_string),
            revocation_reason: counted.revocation_reason().map(str::to_string),
        });

        sqlx::query(
            "UPDATE api_keys SET ip_whitelist = $2, domain_whitelist = $3, \
                 rate_limit_per_minute = $4, permissions = $5, description = $6, updated_at = $7 \
             WHERE id = $1",
        )
        .bind(merged.id().as_str())
        .bind(to_json(merged.ip_whitelist())?)
        .bind(to_json(merged.domain_whitelist())?)
        .bind(i32::try_from(merged.rate_limit_per_minute()).unwrap_or(i32::MAX))
        .bind(to_json(merged.permissions())?)
        .bind(merged.description())
        .bind(merged.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error("Failed to record usage", e))?;

        tx.commit()
            .await
            .map_err(|e| storage_error("Failed to commit usage", e))?;

        Ok(Some(merged))
    }
}

//! Schema migrations
//!
//! Each migration is applied together with its ledger row in one
//! transaction, so a failed migration leaves nothing behind.

use sqlx::postgres::PgPool;
use tracing::info;

use crate::domain::DomainError;

use super::postgres::storage_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: &'static str,
}

/// Credential and usage log schema, in version order
pub const SCHEMA: &[Migration] = &[
    Migration {
        version: 1,
        description: "credentials",
        up: r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                id VARCHAR(36) PRIMARY KEY,
                key_id VARCHAR(255) NOT NULL UNIQUE,
                key_hash TEXT NOT NULL,
                key_type VARCHAR(16) NOT NULL,
                environment VARCHAR(16) NOT NULL,
                owner_user_id VARCHAR(255) NOT NULL,
                owner_company_id VARCHAR(255) NOT NULL,
                name VARCHAR(100) NOT NULL,
                description TEXT,
                permissions JSONB NOT NULL,
                ip_whitelist JSONB NOT NULL DEFAULT '[]'::jsonb,
                domain_whitelist JSONB NOT NULL DEFAULT '[]'::jsonb,
                status VARCHAR(16) NOT NULL,
                expires_at TIMESTAMPTZ,
                last_used_at TIMESTAMPTZ,
                last_used_ip VARCHAR(64),
                usage_count BIGINT NOT NULL DEFAULT 0,
                rate_limit_per_minute INTEGER NOT NULL,
                created_by VARCHAR(255),
                revoked_at TIMESTAMPTZ,
                revoked_by VARCHAR(255),
                revocation_reason TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_api_keys_scope
                ON api_keys(owner_user_id, owner_company_id, environment, status);
            CREATE INDEX IF NOT EXISTS idx_api_keys_expiry ON api_keys(status, expires_at);
        "#,
    },
    Migration {
        version: 2,
        description: "usage logs",
        up: r#"
            CREATE TABLE IF NOT EXISTS api_key_usage_logs (
                id VARCHAR(36) PRIMARY KEY,
                user_id VARCHAR(255),
                public_key_id VARCHAR(255),
                private_key_id VARCHAR(255),
                action VARCHAR(255),
                endpoint TEXT,
                http_method VARCHAR(16) NOT NULL,
                request_uuid VARCHAR(255),
                request_id VARCHAR(255),
                ip_address VARCHAR(64) NOT NULL,
                user_agent TEXT,
                country_code VARCHAR(8),
                city VARCHAR(255),
                region VARCHAR(255),
                latitude DOUBLE PRECISION,
                longitude DOUBLE PRECISION,
                environment VARCHAR(16) NOT NULL,
                response_time_ms BIGINT,
                response_status_code INTEGER,
                request_size_bytes BIGINT,
                response_size_bytes BIGINT,
                signature_valid BOOLEAN NOT NULL DEFAULT TRUE,
                source_service VARCHAR(255),
                request_headers JSONB NOT NULL DEFAULT '{}'::jsonb,
                amount DOUBLE PRECISION,
                currency VARCHAR(8),
                status VARCHAR(16) NOT NULL,
                is_suspicious BOOLEAN NOT NULL DEFAULT FALSE,
                error_message TEXT,
                error_code VARCHAR(64),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_usage_logs_created_at
                ON api_key_usage_logs(created_at);
            CREATE INDEX IF NOT EXISTS idx_usage_logs_key_created_at
                ON api_key_usage_logs(public_key_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_usage_logs_user_created_at
                ON api_key_usage_logs(user_id, created_at);
        "#,
    },
];

/// Migrations not yet in `applied`, lowest version first
fn pending<'a>(migrations: &'a [Migration], applied: &[i64]) -> Vec<&'a Migration> {
    let mut pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .collect();
    pending.sort_by_key(|m| m.version);
    pending
}

#[derive(Debug, Clone)]
pub struct PostgresMigrator {
    pool: PgPool,
}

impl PostgresMigrator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_ledger(&self) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to create migration ledger", e))?;

        Ok(())
    }

    pub async fn applied_versions(&self) -> Result<Vec<i64>, DomainError> {
        self.ensure_ledger().await?;

        sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to read migration ledger", e))
    }

    /// Apply every pending migration; returns how many ran
    pub async fn run(&self, migrations: &[Migration]) -> Result<usize, DomainError> {
        let applied = self.applied_versions().await?;
        let pending = pending(migrations, &applied);

        for migration in &pending {
            let context = format!("Migration {} ({})", migration.version, migration.description);
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| storage_error(&context, e))?;

            // raw_sql: the body holds several statements
            sqlx::raw_sql(migration.up)
                .execute(&mut *tx)
                .await
                .map_err(|e| storage_error(&context, e))?;

            sqlx::query("INSERT INTO schema_migrations (version, description) VALUES ($1, $2)")
                .bind(migration.version)
                .bind(migration.description)
                .execute(&mut *tx)
                .await
                .map_err(|e| storage_error(&context, e))?;

            tx.commit().await.map_err(|e| storage_error(&context, e))?;

            info!(
                version = migration.version,
                description = migration.description,
                "Migration applied"
            );
        }

        Ok(pending.len())
    }
}

/// Bring the database up to [`SCHEMA`]
pub async fn ensure_schema(pool: &PgPool) -> Result<usize, DomainError> {
    PostgresMigrator::new(pool.clone()).run(SCHEMA).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_versions_are_unique_and_ascending() {
        let versions: Vec<i64> = SCHEMA.iter().map(|m| m.version).collect();

        assert!(versions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(SCHEMA.iter().all(|m| !m.description.is_empty()));
    }

    #[test]
    fn test_schema_creates_both_tables() {
        let all_up: String = SCHEMA.iter().map(|m| m.up).collect();

        assert!(all_up.contains("CREATE TABLE IF NOT EXISTS api_keys"));
        assert!(all_up.contains("key_id VARCHAR(255) NOT NULL UNIQUE"));
        assert!(all_up.contains("CREATE TABLE IF NOT EXISTS api_key_usage_logs"));
    }

    #[test]
    fn test_pending_skips_applied_and_sorts() {
        let migrations = [
            Migration { version: 3, description: "c", up: "" },
            Migration { version: 1, description: "a", up: "" },
            Migration { version: 2, description: "b", up: "" },
        ];

        let versions: Vec<i64> = pending(&migrations, &[2]).iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 3]);

        assert!(pending(&migrations, &[1, 2, 3]).is_empty());
    }
}

// dbvault/src/store/migrate.rs
use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::debug;

const SCHEMA: &[(&str, &str)] = &[
    (
        "backup_settings",
        r#"
        CREATE TABLE IF NOT EXISTS backup_settings (
            database_id BIGINT PRIMARY KEY,
            enabled BOOLEAN NOT NULL DEFAULT FALSE,
            provider TEXT NOT NULL DEFAULT 's3',
            endpoint TEXT NOT NULL DEFAULT '',
            region TEXT NOT NULL DEFAULT 'us-east-1',
            bucket TEXT NOT NULL DEFAULT '',
            access_key TEXT NOT NULL DEFAULT '',
            secret_key TEXT NOT NULL DEFAULT '',
            path_prefix TEXT NOT NULL DEFAULT '',
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "backups",
        r#"
        CREATE TABLE IF NOT EXISTS backups (
            id BIGSERIAL PRIMARY KEY,
            database_id BIGINT NOT NULL,
            filename TEXT NOT NULL,
            object_key TEXT,
            size_bytes BIGINT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'completed', 'failed')),
            s3_url TEXT,
            error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "backups_database_created_idx",
        "CREATE INDEX IF NOT EXISTS backups_database_created_idx ON backups (database_id, created_at DESC)",
    ),
];

/// Creates the metadata tables if they are missing. Safe to run on every start.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, statement) in SCHEMA {
        debug!(object = name, "ensuring schema object");
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create schema object {}", name))?;
    }
    Ok(())
}

// dbvault/src/store/settings.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::{BackupSettings, SettingsStore};

pub struct PgSettingsStore {
    pool: PgPool,
    product_name: String,
}

impl PgSettingsStore {
    pub fn new(pool: PgPool, product_name: impl Into<String>) -> Self {
        Self {
            pool,
            product_name: product_name.into(),
        }
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn get(&self, database_id: i64) -> Result<BackupSettings> {
        let row = sqlx::query_as::<_, BackupSettings>(
            "SELECT database_id, enabled, provider, endpoint, region, bucket,
                    access_key, secret_key, path_prefix
             FROM backup_settings WHERE database_id = $1",
        )
        .bind(database_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load backup settings for database {}", database_id))?;

        Ok(row.unwrap_or_else(|| BackupSettings::defaults(database_id, &self.product_name)))
    }

    async fn upsert(&self, settings: &BackupSettings) -> Result<()> {
        sqlx::query(
            "INSERT INTO backup_settings
                (database_id, enabled, provider, endpoint, region, bucket,
                 access_key, secret_key, path_prefix, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
             ON CONFLICT (database_id) DO UPDATE SET
                enabled = EXCLUDED.enabled,
                provider = EXCLUDED.provider,
                endpoint = EXCLUDED.endpoint,
                region = EXCLUDED.region,
                bucket = EXCLUDED.bucket,
                access_key = EXCLUDED.access_key,
                secret_key = EXCLUDED.secret_key,
                path_prefix = EXCLUDED.path_prefix,
                updated_at = NOW()",
        )
        .bind(settings.database_id)
        .bind(settings.enabled)
        .bind(&settings.provider)
        .bind(&settings.endpoint)
        .bind(&settings.region)
        .bind(&settings.bucket)
        .bind(&settings.access_key)
        .bind(&settings.secret_key)
        .bind(&settings.path_prefix)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!("Failed to save backup settings for database {}", settings.database_id)
        })?;
        Ok(())
    }
}

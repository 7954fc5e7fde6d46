// dbvault/src/store/records.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::{Backup, BackupStatus, BackupStore, NewBackup};

const BACKUP_COLUMNS: &str =
    "id, database_id, filename, object_key, size_bytes, status, s3_url, error, created_at";

pub struct PgBackupStore {
    pool: PgPool,
}

impl PgBackupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn finish(
        &self,
        backup_id: i64,
        status: BackupStatus,
        size_bytes: Option<i64>,
        s3_url: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE backups
             SET status = $2, size_bytes = $3, s3_url = COALESCE($4, s3_url), error = $5
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(backup_id)
        .bind(status.as_str())
        .bind(size_bytes)
        .bind(s3_url)
        .bind(error)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark backup {} as {}", backup_id, status))?;

        if result.rows_affected() != 1 {
            anyhow::bail!(
                "Backup {} cannot transition to {}: it is missing or no longer pending",
                backup_id,
                status
            );
        }
        Ok(())
    }
}

#[async_trait]
impl BackupStore for PgBackupStore {
    async fn create_pending(&self, new: &NewBackup) -> Result<Backup> {
        sqlx::query_as::<_, Backup>(&format!(
            "INSERT INTO backups (database_id, filename, object_key, status)
             VALUES ($1, $2, $3, 'pending')
             RETURNING {}",
            BACKUP_COLUMNS
        ))
        .bind(new.database_id)
        .bind(&new.filename)
        .bind(&new.object_key)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to create backup record for database {}", new.database_id))
    }

    async fn mark_completed(&self, backup_id: i64, size_bytes: i64, s3_url: &str) -> Result<()> {
        self.finish(backup_id, BackupStatus::Completed, Some(size_bytes), Some(s3_url), None)
            .await
    }

    async fn mark_failed(&self, backup_id: i64, error: &str) -> Result<()> {
        self.finish(backup_id, BackupStatus::Failed, None, None, Some(error))
            .await
    }

    async fn get(&self, backup_id: i64) -> Result<Option<Backup>> {
        sqlx::query_as::<_, Backup>(&format!(
            "SELECT {} FROM backups WHERE id = $1",
            BACKUP_COLUMNS
        ))
        .bind(backup_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load backup {}", backup_id))
    }

    async fn list_for_database(&self, database_id: i64) -> Result<Vec<Backup>> {
        sqlx::query_as::<_, Backup>(&format!(
            "SELECT {} FROM backups WHERE database_id = $1 ORDER BY created_at DESC, id DESC",
            BACKUP_COLUMNS
        ))
        .bind(database_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list backups for database {}", database_id))
    }
}

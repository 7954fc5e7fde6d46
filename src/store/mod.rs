// dbvault/src/store/mod.rs
pub(crate) mod migrate;
pub(crate) mod records;
pub(crate) mod settings;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use records::PgBackupStore;
pub use settings::PgSettingsStore;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_PROVIDER: &str = "s3";

/// Per-database object storage settings.
#[derive(Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct BackupSettings {
    pub database_id: i64,
    pub enabled: bool,
    pub provider: String,
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub path_prefix: String,
}

impl BackupSettings {
    /// Effective settings for a database that has no stored row.
    pub fn defaults(database_id: i64, product_name: &str) -> Self {
        Self {
            database_id,
            enabled: false,
            provider: DEFAULT_PROVIDER.to_string(),
            endpoint: String::new(),
            region: DEFAULT_REGION.to_string(),
            bucket: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            path_prefix: format!("/{}/backups", product_name),
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.access_key.trim().is_empty() && !self.secret_key.trim().is_empty()
    }

    /// Checks that a backup or restore can actually talk to object storage.
    pub fn validate_for_transfer(&self) -> std::result::Result<(), String> {
        if !self.enabled {
            return Err(format!("backups are disabled for database {}", self.database_id));
        }
        if !self.has_credentials() {
            return Err(format!(
                "no object storage credentials configured for database {}",
                self.database_id
            ));
        }
        if self.bucket.trim().is_empty() {
            return Err(format!("no bucket configured for database {}", self.database_id));
        }
        Ok(())
    }
}

impl fmt::Debug for BackupSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupSettings")
            .field("database_id", &self.database_id)
            .field("enabled", &self.enabled)
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("path_prefix", &self.path_prefix)
            .finish()
    }
}

/// Partial settings as accepted by the `configure` command; absent fields keep
/// their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    pub enabled: Option<bool>,
    pub provider: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_prefix: Option<String>,
}

impl SettingsUpdate {
    pub fn apply(self, mut base: BackupSettings) -> BackupSettings {
        if let Some(v) = self.enabled {
            base.enabled = v;
        }
        if let Some(v) = self.provider {
            base.provider = v;
        }
        if let Some(v) = self.endpoint {
            base.endpoint = v;
        }
        if let Some(v) = self.region {
            base.region = v;
        }
        if let Some(v) = self.bucket {
            base.bucket = v;
        }
        if let Some(v) = self.access_key {
            base.access_key = v;
        }
        if let Some(v) = self.secret_key {
            base.secret_key = v;
        }
        if let Some(v) = self.path_prefix {
            base.path_prefix = v;
        }
        base
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }
}

impl TryFrom<String> for BackupStatus {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(BackupStatus::Pending),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(format!("unknown backup status: {}", other)),
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backup attempt.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Backup {
    pub id: i64,
    pub database_id: i64,
    pub filename: String,
    /// Exact key written to object storage. `None` for records that predate
    /// explicit key storage.
    pub object_key: Option<String>,
    pub size_bytes: Option<i64>,
    #[sqlx(try_from = "String")]
    pub status: BackupStatus,
    /// Descriptive only; listing replaces it with a presigned URL.
    pub s3_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBackup {
    pub database_id: i64,
    pub filename: String,
    pub object_key: String,
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Returns defaults when no row exists; absence is not an error.
    async fn get(&self, database_id: i64) -> Result<BackupSettings>;
    async fn upsert(&self, settings: &BackupSettings) -> Result<()>;
}

/// Storage for backup records. Completion and failure only apply to records
/// still in `pending`; anything else is an error.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn create_pending(&self, new: &NewBackup) -> Result<Backup>;
    async fn mark_completed(&self, backup_id: i64, size_bytes: i64, s3_url: &str) -> Result<()>;
    async fn mark_failed(&self, backup_id: i64, error: &str) -> Result<()>;
    async fn get(&self, backup_id: i64) -> Result<Option<Backup>>;
    /// Newest first.
    async fn list_for_database(&self, database_id: i64) -> Result<Vec<Backup>>;
}

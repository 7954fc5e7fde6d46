// dbvault/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::catalog::{DatabaseRecord, validate_database_name};

const DEFAULT_PRODUCT_NAME: &str = "dbvault";
const DEFAULT_DB_USER: &str = "postgres";
const DEFAULT_PART_SIZE_MB: u64 = 8;
// S3 rejects multipart parts below 5 MiB (except the last one).
const MIN_PART_SIZE_MB: u64 = 5;
// ...and above 5 GiB.
const MAX_PART_SIZE_MB: u64 = 5 * 1024;
const DEFAULT_PIPE_CAPACITY: usize = 8;
const DEFAULT_SIGNED_URL_TTL_HOURS: u64 = 24;

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonDatabaseEntry {
    pub id: i64,
    pub name: String,
    pub container: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub metadata_database_url: Option<String>,
    pub product_name: Option<String>,
    pub docker_binary: Option<PathBuf>,
    #[serde(default)]
    pub docker_args: Vec<String>,
    pub upload_part_size_mb: Option<u64>,
    pub pipe_capacity: Option<usize>,
    pub signed_url_ttl_hours: Option<u64>,
    #[serde(default)]
    pub databases: Vec<JsonDatabaseEntry>,
}

/// Tuning knobs handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub pipe_capacity: usize,
    pub signed_url_ttl: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            signed_url_ttl: Duration::from_secs(DEFAULT_SIGNED_URL_TTL_HOURS * 3600),
        }
    }
}

// Application's internal configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub metadata_database_url: String,
    pub product_name: String,
    pub docker_binary: Option<PathBuf>,
    /// Arguments placed before `exec` on every docker invocation, e.g. `--context prod`.
    pub docker_args: Vec<String>,
    pub upload_part_size: usize,
    pub orchestrator: OrchestratorOptions,
    pub databases: Vec<DatabaseRecord>,
}

impl AppConfig {
    /// Location of config.json: `DBVAULT_CONFIG` if set, otherwise the working directory.
    pub fn default_path() -> PathBuf {
        env::var("DBVAULT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.json"))
    }

    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;

        Self::from_raw(raw, env::var("DATABASE_URL").ok())
    }

    /// Validates the raw JSON. `database_url_override` wins over the file's URL.
    pub fn from_raw(raw: RawJsonConfig, database_url_override: Option<String>) -> Result<Self> {
        let metadata_database_url = database_url_override
            .filter(|s| !s.trim().is_empty())
            .or(raw.metadata_database_url.filter(|s| !s.trim().is_empty()))
            .context("metadata_database_url must be set in config.json (or DATABASE_URL in the environment)")?;
        validate_postgres_url(&metadata_database_url)?;

        let product_name = raw
            .product_name
            .map(|s| s.trim().trim_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_PRODUCT_NAME.to_string());

        let part_size_mb = raw.upload_part_size_mb.unwrap_or(DEFAULT_PART_SIZE_MB);
        if !(MIN_PART_SIZE_MB..=MAX_PART_SIZE_MB).contains(&part_size_mb) {
            anyhow::bail!(
                "upload_part_size_mb must be between {} and {} (got {})",
                MIN_PART_SIZE_MB,
                MAX_PART_SIZE_MB,
                part_size_mb
            );
        }

        let pipe_capacity = raw.pipe_capacity.unwrap_or(DEFAULT_PIPE_CAPACITY);
        if pipe_capacity == 0 {
            anyhow::bail!("pipe_capacity must be greater than zero");
        }

        let ttl_hours = raw
            .signed_url_ttl_hours
            .unwrap_or(DEFAULT_SIGNED_URL_TTL_HOURS);
        if ttl_hours == 0 || ttl_hours > 24 * 7 {
            // Presigned URLs are capped at seven days by S3.
            anyhow::bail!("signed_url_ttl_hours must be between 1 and 168 (got {})", ttl_hours);
        }

        Ok(AppConfig {
            metadata_database_url,
            product_name,
            docker_binary: raw.docker_binary,
            docker_args: raw.docker_args,
            upload_part_size: (part_size_mb * 1024 * 1024) as usize,
            orchestrator: OrchestratorOptions {
                pipe_capacity,
                signed_url_ttl: Duration::from_secs(ttl_hours * 3600),
            },
            databases: parse_database_entries(raw.databases)?,
        })
    }
}

fn validate_postgres_url(database_url: &str) -> Result<()> {
    let parsed = Url::parse(database_url).context("metadata_database_url is not a valid URL")?;
    match parsed.scheme() {
        "postgres" | "postgresql" => Ok(()),
        other => anyhow::bail!(
            "metadata_database_url must use the postgres:// scheme (got {}://)",
            other
        ),
    }
}

/// `database_url` with any password masked, for log lines.
pub fn redact_database_url(database_url: &str) -> String {
    match Url::parse(database_url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("****"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable url>".to_string(),
    }
}

/// Turns the `databases` list into catalog records, rejecting duplicates and unsafe names.
fn parse_database_entries(entries: Vec<JsonDatabaseEntry>) -> Result<Vec<DatabaseRecord>> {
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(entries.len());

    for entry in entries {
        if !seen.insert(entry.id) {
            anyhow::bail!("database id {} appears more than once in databases", entry.id);
        }
        validate_database_name(&entry.name)
            .with_context(|| format!("Invalid name for database id {}", entry.id))?;
        if entry.container.trim().is_empty() {
            anyhow::bail!("database {} ({}) has an empty container", entry.id, entry.name);
        }

        records.push(DatabaseRecord {
            id: entry.id,
            name: entry.name,
            container_id: entry.container.trim().to_string(),
            username: entry
                .username
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DB_USER.to_string()),
        });
    }

    Ok(records)
}

//! Database Backup/Restore Orchestrator
//!
//! Streams dumps of containerised databases into S3-compatible storage and
//! restores them back, from the command line.

// dbvault/src/main.rs
mod backup;
mod catalog;
mod config;
mod errors;
mod exec;
mod locks;
mod orchestrator;
mod pipe;
mod restore;
mod storage;
mod store;
mod utils;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use catalog::StaticCatalog;
use config::{AppConfig, redact_database_url};
use exec::DockerCliExec;
use orchestrator::Orchestrator;
use storage::S3StoreProvider;
use store::{PgBackupStore, PgSettingsStore, SettingsStore, SettingsUpdate};

const USAGE: &str = "Usage:
  dbvault backup <database_id>
  dbvault restore <database_id> <backup_id>
  dbvault list <database_id>
  dbvault settings <database_id>
  dbvault configure <database_id> <settings.json>";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Backup { database_id: i64 },
    Restore { database_id: i64, backup_id: i64 },
    List { database_id: i64 },
    Settings { database_id: i64 },
    Configure { database_id: i64, settings_path: PathBuf },
}

/// Main entry point for the backup/restore tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    // stdout is reserved for command output (JSON listings).
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_id(value: Option<&String>, what: &str) -> Result<i64> {
    let value = value.with_context(|| format!("missing <{}>\n{}", what, USAGE))?;
    value
        .trim()
        .parse()
        .with_context(|| format!("<{}> must be an integer, got {:?}", what, value))
}

fn parse_command(args: &[String]) -> Result<CliCommand> {
    let Some(choice) = args.first() else {
        anyhow::bail!("no command given\n{}", USAGE);
    };

    let command = match choice.trim() {
        "backup" => CliCommand::Backup {
            database_id: parse_id(args.get(1), "database_id")?,
        },
        "restore" => CliCommand::Restore {
            database_id: parse_id(args.get(1), "database_id")?,
            backup_id: parse_id(args.get(2), "backup_id")?,
        },
        "list" => CliCommand::List {
            database_id: parse_id(args.get(1), "database_id")?,
        },
        "settings" => CliCommand::Settings {
            database_id: parse_id(args.get(1), "database_id")?,
        },
        "configure" => CliCommand::Configure {
            database_id: parse_id(args.get(1), "database_id")?,
            settings_path: args
                .get(2)
                .map(PathBuf::from)
                .with_context(|| format!("missing <settings.json>\n{}", USAGE))?,
        },
        other => anyhow::bail!("unknown command {:?}\n{}", other, USAGE),
    };
    Ok(command)
}

async fn run_app() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = parse_command(&args)?;

    let config_path = AppConfig::default_path();
    let app_config = AppConfig::load_from_json(&config_path).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            config_path.display()
        )
    })?;

    info!(
        database = %redact_database_url(&app_config.metadata_database_url),
        "connecting to metadata database"
    );
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&app_config.metadata_database_url)
        .await
        .context("Failed to connect to the metadata database")?;
    store::migrate::run_migrations(&pool).await?;

    let settings_store = Arc::new(PgSettingsStore::new(
        pool.clone(),
        app_config.product_name.clone(),
    ));

    match command {
        CliCommand::Settings { database_id } => {
            let settings = settings_store.get(database_id).await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        CliCommand::Configure {
            database_id,
            settings_path,
        } => {
            let content = fs::read_to_string(&settings_path)
                .with_context(|| format!("Failed to read {}", settings_path.display()))?;
            let update: SettingsUpdate = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse settings from {}", settings_path.display()))?;
            let merged = update.apply(settings_store.get(database_id).await?);
            settings_store.upsert(&merged).await?;
            println!("⚙️ Settings saved for database {}.", database_id);
            println!("{}", serde_json::to_string_pretty(&merged)?);
        }
        CliCommand::Backup { database_id } => {
            let orchestrator = build_orchestrator(&app_config, pool, settings_store, true)?;
            let cancel = cancel_on_ctrl_c();
            println!("🚀 Starting backup of database {}...", database_id);
            let backup = backup::run_backup_flow(&orchestrator, database_id, &cancel).await?;
            println!(
                "Backup {} stored as {} ({} bytes)",
                backup.id,
                backup.object_key.as_deref().unwrap_or(&backup.filename),
                backup.size_bytes.unwrap_or_default()
            );
        }
        CliCommand::Restore {
            database_id,
            backup_id,
        } => {
            let orchestrator = build_orchestrator(&app_config, pool, settings_store, true)?;
            let cancel = cancel_on_ctrl_c();
            println!("🔄 Restoring backup {} into database {}...", backup_id, database_id);
            let summary =
                restore::run_restore_flow(&orchestrator, database_id, backup_id, &cancel).await?;
            println!("Restored {} bytes.", summary.bytes_streamed);
        }
        CliCommand::List { database_id } => {
            let orchestrator = build_orchestrator(&app_config, pool, settings_store, false)?;
            let backups = backup::list_backups(&orchestrator, database_id).await?;
            println!("{}", serde_json::to_string_pretty(&backups)?);
        }
    }
    Ok(())
}

/// Wires the Postgres stores, config catalog, docker CLI and S3 client together.
/// Listing never runs exec, so it tolerates a missing docker binary.
fn build_orchestrator(
    app_config: &AppConfig,
    pool: sqlx::PgPool,
    settings_store: Arc<PgSettingsStore>,
    needs_docker: bool,
) -> Result<Orchestrator> {
    let docker = match &app_config.docker_binary {
        Some(path) => path.clone(),
        None if needs_docker => utils::find_docker_executable()?,
        None => utils::find_docker_executable().unwrap_or_else(|_| PathBuf::from("docker")),
    };

    Ok(Orchestrator::new(
        settings_store,
        Arc::new(PgBackupStore::new(pool)),
        Arc::new(StaticCatalog::new(app_config.databases.clone())),
        Arc::new(DockerCliExec::new(docker, app_config.docker_args.clone())),
        Arc::new(S3StoreProvider::new(app_config.upload_part_size)),
        app_config.orchestrator.clone(),
    ))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            trigger.cancel();
        }
    });
    cancel
}

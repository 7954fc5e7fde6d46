// dbvault/src/restore/logic.rs
use anyhow::anyhow;
use serde::Serialize;
use std::io;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::admin::{AdminStep, drain_output, kill_quietly, run_admin_step};
use crate::backup::object_key::resolve_object_key;
use crate::catalog::DatabaseRecord;
use crate::errors::{OrchestratorError, Result};
use crate::exec::{ExecInput, ExecSpec};
use crate::orchestrator::{Orchestrator, cancellable};
use crate::pipe::TaskGuard;
use crate::storage::ObjectReader;
use crate::store::{Backup, BackupStatus};
use crate::utils::pg_commands;

const RESTORE_STEP: &str = "restore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub backup_id: i64,
    pub database_id: i64,
    pub bytes_streamed: u64,
}

/// Replaces `database_id`'s database with the contents of `backup_id`.
///
/// The download is opened before anything destructive happens; the admin
/// steps then run strictly in order and the first failure stops the restore.
pub(crate) async fn perform_restore_orchestration(
    orchestrator: &Orchestrator,
    database_id: i64,
    backup_id: i64,
    cancel: &CancellationToken,
) -> Result<RestoreSummary> {
    let _lock = orchestrator.lock_database(database_id, cancel).await?;

    let backup = find_restorable_backup(orchestrator, database_id, backup_id).await?;
    let settings = orchestrator.resolve_transfer_settings(database_id).await?;
    let database = orchestrator.resolve_database(database_id).await?;
    let store = orchestrator.connect_storage(&settings).await?;
    let object_key = resolve_object_key(&backup, &settings.path_prefix);

    info!(
        backup_id,
        database_id,
        container = %database.container_id,
        bucket = %settings.bucket,
        object_key = %object_key,
        "starting restore"
    );

    let download = cancellable(cancel, "open download stream", async {
        store
            .get_stream(&settings.bucket, &object_key)
            .await
            .map_err(|e| OrchestratorError::transport("open download stream", e))
    })
    .await?;

    for step in AdminStep::SEQUENCE {
        run_admin_step(orchestrator, &database, step, cancel).await?;
        debug!(database_id, step = step.label(), "admin step succeeded");
    }

    let bytes_streamed = stream_restore(orchestrator, &database, download, cancel).await?;
    info!(backup_id, database_id, bytes_streamed, "restore completed");

    Ok(RestoreSummary {
        backup_id,
        database_id,
        bytes_streamed,
    })
}

async fn find_restorable_backup(
    orchestrator: &Orchestrator,
    database_id: i64,
    backup_id: i64,
) -> Result<Backup> {
    let backup = orchestrator
        .records
        .get(backup_id)
        .await
        .map_err(OrchestratorError::Store)?
        .filter(|b| b.database_id == database_id)
        .ok_or(OrchestratorError::BackupNotFound {
            backup_id,
            database_id,
        })?;

    if backup.status != BackupStatus::Completed {
        return Err(OrchestratorError::Config(format!(
            "backup {} is {}; only completed backups can be restored",
            backup_id, backup.status
        )));
    }
    Ok(backup)
}

/// Feeds the download into psql's stdin while draining its output.
async fn stream_restore(
    orchestrator: &Orchestrator,
    database: &DatabaseRecord,
    download: ObjectReader,
    cancel: &CancellationToken,
) -> Result<u64> {
    let spec = ExecSpec::interactive(pg_commands::restore_command(database));
    let session_id = cancellable(cancel, RESTORE_STEP, async {
        orchestrator
            .exec
            .exec_create(&database.container_id, spec)
            .await
            .map_err(|e| OrchestratorError::transport(RESTORE_STEP, e))
    })
    .await?;

    let outcome = cancellable(
        cancel,
        RESTORE_STEP,
        feed_and_wait(orchestrator, &session_id, download),
    )
    .await;

    if outcome.is_err() {
        kill_quietly(orchestrator, &session_id).await;
    }
    outcome
}

async fn feed_and_wait(
    orchestrator: &Orchestrator,
    session_id: &str,
    download: ObjectReader,
) -> Result<u64> {
    let mut attachment = orchestrator
        .exec
        .exec_attach(session_id)
        .await
        .map_err(|e| OrchestratorError::transport(RESTORE_STEP, e))?;
    let stdin = attachment.input.take().ok_or_else(|| {
        OrchestratorError::transport(RESTORE_STEP, anyhow!("restore session has no stdin attached"))
    })?;

    let feeder = TaskGuard::spawn(feed_stdin(download, stdin));

    let output = drain_output(attachment.output)
        .await
        .map_err(|source| OrchestratorError::Streaming {
            step: RESTORE_STEP,
            source,
        })?;

    let exit_code = orchestrator
        .exec
        .exec_inspect(session_id)
        .await
        .map_err(|e| OrchestratorError::transport(RESTORE_STEP, e))?;
    // A failed psql usually also breaks the feeder's pipe; the exit code and
    // output are the useful part.
    if exit_code != 0 {
        return Err(OrchestratorError::RemoteExec {
            step: RESTORE_STEP,
            exit_code,
            output: output.into_text(),
        });
    }

    // psql can exit 0 on a truncated input, so a download that broke off
    // still fails the restore.
    feeder
        .join()
        .await
        .and_then(|fed| fed)
        .map_err(|source| OrchestratorError::Streaming {
            step: RESTORE_STEP,
            source,
        })
}

async fn feed_stdin(mut download: ObjectReader, mut stdin: ExecInput) -> io::Result<u64> {
    let copied = tokio::io::copy(&mut download, &mut stdin).await?;
    stdin.shutdown().await?;
    Ok(copied)
}

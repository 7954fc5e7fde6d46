// dbvault/src/backup/logic.rs
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::object_key::{backup_filename, derive_object_key};
use crate::catalog::DatabaseRecord;
use crate::errors::{BackupPhase, OrchestratorError, Result};
use crate::exec::{ExecOutput, ExecOutputStream, ExecSpec, OutputCapture};
use crate::orchestrator::Orchestrator;
use crate::pipe::{self, PipeWriter, TaskGuard};
use crate::storage::{ObjectStore, describe_object_url};
use crate::store::{Backup, BackupStatus, NewBackup};
use crate::utils::pg_commands;

/// Why a backup attempt ended in `failed`.
#[derive(Debug)]
struct BackupFailure {
    phase: BackupPhase,
    detail: String,
}

impl BackupFailure {
    fn new(phase: BackupPhase, detail: impl fmt::Display) -> Self {
        Self {
            phase,
            detail: detail.to_string(),
        }
    }

    fn from_anyhow(phase: BackupPhase, err: anyhow::Error) -> Self {
        Self::new(phase, format!("{:#}", err))
    }

    fn cancelled() -> Self {
        Self::new(BackupPhase::Cancelled, "operation cancelled by caller")
    }
}

impl fmt::Display for BackupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            BackupPhase::Cancelled => write!(f, "cancelled: {}", self.detail),
            phase => write!(f, "{} failed: {}", phase, self.detail),
        }
    }
}

/// What the dump pump saw besides the bytes it forwarded.
struct DumpSummary {
    stdout_bytes: u64,
    stderr: String,
}

/// Runs one backup of `database_id`, stamping the file name with `started_at`.
///
/// Resolution problems are returned before any record exists. From the
/// moment the `pending` record is written, every failure is recorded on it
/// exactly once and returned as `BackupFailed` (or `Cancelled`).
pub(crate) async fn perform_backup_orchestration(
    orchestrator: &Orchestrator,
    database_id: i64,
    started_at: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Backup> {
    let _lock = orchestrator.lock_database(database_id, cancel).await?;

    let settings = orchestrator.resolve_transfer_settings(database_id).await?;
    let database = orchestrator.resolve_database(database_id).await?;
    let store = orchestrator.connect_storage(&settings).await?;

    let filename = backup_filename(&database.name, started_at);
    let object_key = derive_object_key(&settings.path_prefix, &filename);

    let record = orchestrator
        .records
        .create_pending(&NewBackup {
            database_id,
            filename,
            object_key: object_key.clone(),
        })
        .await
        .map_err(OrchestratorError::Store)?;

    info!(
        backup_id = record.id,
        database_id,
        container = %database.container_id,
        bucket = %settings.bucket,
        object_key = %object_key,
        "starting backup"
    );

    match stream_dump_to_storage(
        orchestrator,
        &database,
        store.as_ref(),
        &settings.bucket,
        &object_key,
        cancel,
    )
    .await
    {
        Ok(size_bytes) => {
            let s3_url = describe_object_url(&settings.endpoint, &settings.bucket, &object_key);
            let size_bytes = i64::try_from(size_bytes).unwrap_or(i64::MAX);
            orchestrator
                .records
                .mark_completed(record.id, size_bytes, &s3_url)
                .await
                .map_err(OrchestratorError::Store)?;

            info!(backup_id = record.id, size_bytes, "backup completed");
            Ok(Backup {
                status: BackupStatus::Completed,
                size_bytes: Some(size_bytes),
                s3_url: Some(s3_url),
                ..record
            })
        }
        Err(failure) => {
            let message = failure.to_string();
            error!(backup_id = record.id, phase = %failure.phase, error = %message, "backup failed");
            if let Err(e) = orchestrator.records.mark_failed(record.id, &message).await {
                error!(backup_id = record.id, error = %e, "could not record backup failure");
            }

            if failure.phase == BackupPhase::Cancelled {
                Err(OrchestratorError::Cancelled(format!("backup {}", record.id)))
            } else {
                Err(OrchestratorError::BackupFailed {
                    backup_id: record.id,
                    phase: failure.phase,
                    message,
                })
            }
        }
    }
}

/// Runs the dump inside the container and uploads its stdout. Returns the
/// uploaded size. A session that did not finish cleanly is killed.
async fn stream_dump_to_storage(
    orchestrator: &Orchestrator,
    database: &DatabaseRecord,
    store: &dyn ObjectStore,
    bucket: &str,
    object_key: &str,
    cancel: &CancellationToken,
) -> std::result::Result<u64, BackupFailure> {
    let spec = ExecSpec::output_only(pg_commands::dump_command(database));

    let session_id = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(BackupFailure::cancelled()),
        created = orchestrator.exec.exec_create(&database.container_id, spec) => {
            created.map_err(|e| BackupFailure::from_anyhow(BackupPhase::ExecCreate, e))?
        }
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BackupFailure::cancelled()),
        result = dump_and_upload(orchestrator, &session_id, store, bucket, object_key) => result,
    };

    if result.is_err() {
        if let Err(e) = orchestrator.exec.exec_kill(&session_id).await {
            warn!(session_id = %session_id, error = %e, "failed to kill dump session");
        }
    }
    result
}

async fn dump_and_upload(
    orchestrator: &Orchestrator,
    session_id: &str,
    store: &dyn ObjectStore,
    bucket: &str,
    object_key: &str,
) -> std::result::Result<u64, BackupFailure> {
    let attachment = orchestrator
        .exec
        .exec_attach(session_id)
        .await
        .map_err(|e| BackupFailure::from_anyhow(BackupPhase::ExecAttach, e))?;

    // Set by the pump before it poisons the pipe, so an upload error can be
    // traced back to a broken dump stream.
    let stream_fault: Arc<OnceLock<String>> = Arc::default();
    let (writer, reader) = pipe::bounded(orchestrator.options.pipe_capacity);
    let pump = TaskGuard::spawn(pump_dump_output(attachment.output, writer, stream_fault.clone()));

    let uploaded = store.put_stream(bucket, object_key, Box::pin(reader)).await;
    let uploaded = match uploaded {
        Ok(outcome) => outcome,
        Err(err) => {
            return Err(match stream_fault.get() {
                Some(fault) => BackupFailure::new(BackupPhase::Stream, fault),
                None => BackupFailure::from_anyhow(BackupPhase::Upload, err),
            });
        }
    };

    let summary = pump
        .join()
        .await
        .and_then(|pumped| pumped)
        .map_err(|e| BackupFailure::new(BackupPhase::Stream, e))?;
    debug!(
        session_id,
        stdout_bytes = summary.stdout_bytes,
        uploaded_bytes = uploaded.size_bytes,
        "dump stream finished"
    );

    let exit_code = orchestrator
        .exec
        .exec_inspect(session_id)
        .await
        .map_err(|e| BackupFailure::from_anyhow(BackupPhase::Dump, e))?;
    if exit_code != 0 {
        return Err(BackupFailure::new(
            BackupPhase::Dump,
            format!("pg_dump exited with code {}: {}", exit_code, summary.stderr),
        ));
    }
    if !summary.stderr.is_empty() {
        warn!(session_id, stderr = %summary.stderr, "pg_dump wrote to stderr");
    }

    Ok(uploaded.size_bytes)
}

/// Forwards dump stdout into the pipe; stderr is only captured.
async fn pump_dump_output(
    mut output: ExecOutputStream,
    writer: PipeWriter,
    stream_fault: Arc<OnceLock<String>>,
) -> io::Result<DumpSummary> {
    let mut stderr = OutputCapture::default();
    let mut stdout_bytes = 0u64;

    while let Some(chunk) = output.next().await {
        match chunk {
            Ok(ExecOutput::Stdout(bytes)) => {
                stdout_bytes += bytes.len() as u64;
                writer.send(bytes).await?;
            }
            Ok(ExecOutput::Stderr(bytes)) => stderr.push(&bytes),
            Err(e) => {
                let _ = stream_fault.set(format!("reading dump output failed: {}", e));
                writer
                    .fail(io::Error::new(e.kind(), e.to_string()))
                    .await;
                return Err(e);
            }
        }
    }

    Ok(DumpSummary {
        stdout_bytes,
        stderr: stderr.into_text(),
    })
}

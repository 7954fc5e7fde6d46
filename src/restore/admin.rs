// dbvault/src/restore/admin.rs
//! Administrative statements run before a restore: clear out the target
//! database and recreate it empty.

use futures::StreamExt;
use std::io;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::DatabaseRecord;
use crate::errors::{OrchestratorError, Result};
use crate::exec::{ExecOutput, ExecOutputStream, ExecSpec, OutputCapture};
use crate::orchestrator::{Orchestrator, cancellable};
use crate::utils::pg_commands;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AdminStep {
    TerminateConnections,
    DropDatabase,
    CreateDatabase,
}

impl AdminStep {
    /// Order in which a restore runs the steps.
    pub(crate) const SEQUENCE: [AdminStep; 3] = [
        AdminStep::TerminateConnections,
        AdminStep::DropDatabase,
        AdminStep::CreateDatabase,
    ];

    pub(crate) fn label(&self) -> &'static str {
        match self {
            AdminStep::TerminateConnections => "terminate connections",
            AdminStep::DropDatabase => "drop database",
            AdminStep::CreateDatabase => "create database",
        }
    }

    pub(crate) fn sql(&self, database: &DatabaseRecord) -> String {
        match self {
            AdminStep::TerminateConnections => pg_commands::terminate_connections_sql(&database.name),
            AdminStep::DropDatabase => pg_commands::drop_database_sql(&database.name),
            AdminStep::CreateDatabase => {
                pg_commands::create_database_sql(&database.name, &database.username)
            }
        }
    }
}

/// Runs one step to completion. A non-zero exit fails the step with the
/// command's combined output.
pub(crate) async fn run_admin_step(
    orchestrator: &Orchestrator,
    database: &DatabaseRecord,
    step: AdminStep,
    cancel: &CancellationToken,
) -> Result<()> {
    let label = step.label();
    let argv = pg_commands::admin_command(database, &step.sql(database));
    debug!(database = %database.name, step = label, "running admin step");

    let session_id = cancellable(cancel, label, async {
        orchestrator
            .exec
            .exec_create(&database.container_id, ExecSpec::output_only(argv))
            .await
            .map_err(|e| OrchestratorError::transport(label, e))
    })
    .await?;

    let finish = async {
        let attachment = orchestrator
            .exec
            .exec_attach(&session_id)
            .await
            .map_err(|e| OrchestratorError::transport(label, e))?;
        let output = drain_output(attachment.output)
            .await
            .map_err(|source| OrchestratorError::Streaming { step: label, source })?;
        let exit_code = orchestrator
            .exec
            .exec_inspect(&session_id)
            .await
            .map_err(|e| OrchestratorError::transport(label, e))?;

        if exit_code != 0 {
            return Err(OrchestratorError::RemoteExec {
                step: label,
                exit_code,
                output: output.into_text(),
            });
        }
        Ok(())
    };
    let outcome = cancellable(cancel, label, finish).await;

    if outcome.is_err() {
        kill_quietly(orchestrator, &session_id).await;
    }
    outcome
}

/// Reads an output stream to its end, keeping stdout and stderr interleaved.
pub(crate) async fn drain_output(mut output: ExecOutputStream) -> io::Result<OutputCapture> {
    let mut capture = OutputCapture::default();
    while let Some(chunk) = output.next().await {
        match chunk? {
            ExecOutput::Stdout(bytes) | ExecOutput::Stderr(bytes) => capture.push(&bytes),
        }
    }
    Ok(capture)
}

pub(crate) async fn kill_quietly(orchestrator: &Orchestrator, session_id: &str) {
    if let Err(e) = orchestrator.exec.exec_kill(session_id).await {
        warn!(session_id, error = %e, "failed to kill exec session");
    }
}

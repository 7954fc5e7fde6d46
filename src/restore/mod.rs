mod admin;
mod logic;

use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::orchestrator::Orchestrator;

pub use logic::RestoreSummary;

/// Public entry point for the restore process.
/// Drops and recreates the target database, then streams the backup into it.
pub async fn run_restore_flow(
    orchestrator: &Orchestrator,
    database_id: i64,
    backup_id: i64,
    cancel: &CancellationToken,
) -> Result<RestoreSummary> {
    logic::perform_restore_orchestration(orchestrator, database_id, backup_id, cancel).await
}

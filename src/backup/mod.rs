mod listing;
mod logic;
pub(crate) mod object_key;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::orchestrator::Orchestrator;
use crate::store::Backup;

/// Public entry point for the backup process.
/// Dumps the database inside its container straight into object storage and
/// returns the completed record.
pub async fn run_backup_flow(
    orchestrator: &Orchestrator,
    database_id: i64,
    cancel: &CancellationToken,
) -> Result<Backup> {
    logic::perform_backup_orchestration(orchestrator, database_id, Utc::now(), cancel).await
}

/// Backup history of a database with download URLs where they can be signed.
pub async fn list_backups(orchestrator: &Orchestrator, database_id: i64) -> Result<Vec<Backup>> {
    listing::list_backups_with_urls(orchestrator, database_id).await
}

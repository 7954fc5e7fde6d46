// dbvault/src/backup/listing.rs
use tracing::{debug, warn};

use super::object_key::resolve_object_key;
use crate::errors::{OrchestratorError, Result};
use crate::orchestrator::Orchestrator;
use crate::store::{Backup, BackupStatus};

/// Backups of `database_id`, newest first.
///
/// Completed records get a time-limited download URL in `s3_url` when the
/// database has usable storage settings. Signing never fails the listing: a
/// record that cannot be signed keeps its stored URL.
pub(crate) async fn list_backups_with_urls(
    orchestrator: &Orchestrator,
    database_id: i64,
) -> Result<Vec<Backup>> {
    let mut backups = orchestrator
        .records
        .list_for_database(database_id)
        .await
        .map_err(OrchestratorError::Store)?;
    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let settings = orchestrator.resolve_settings(database_id).await?;
    if !settings.enabled || !settings.has_credentials() {
        debug!(database_id, "storage not configured; listing without download URLs");
        return Ok(backups);
    }

    let store = match orchestrator.connect_storage(&settings).await {
        Ok(store) => store,
        Err(e) => {
            warn!(database_id, error = %e, "could not connect to object storage; listing without download URLs");
            return Ok(backups);
        }
    };

    for backup in backups
        .iter_mut()
        .filter(|b| b.status == BackupStatus::Completed)
    {
        let key = resolve_object_key(backup, &settings.path_prefix);
        match store
            .presign_get(&settings.bucket, &key, orchestrator.options.signed_url_ttl)
            .await
        {
            Ok(url) => backup.s3_url = Some(url),
            Err(e) => warn!(
                backup_id = backup.id,
                object_key = %key,
                error = %format!("{:#}", e),
                "failed to sign download URL"
            ),
        }
    }

    Ok(backups)
}

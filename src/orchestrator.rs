// dbvault/src/orchestrator.rs
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::{DatabaseCatalog, DatabaseRecord};
use crate::config::OrchestratorOptions;
use crate::errors::{OrchestratorError, Result};
use crate::exec::ContainerExec;
use crate::locks::DatabaseLocks;
use crate::storage::{ObjectStore, ObjectStoreProvider};
use crate::store::{BackupSettings, BackupStore, SettingsStore};

/// Owns the collaborators of backup, restore and listing.
///
/// Backup and restore take the database's advisory lock for their whole
/// duration, so two operations on one database never interleave.
pub struct Orchestrator {
    pub(crate) settings: Arc<dyn SettingsStore>,
    pub(crate) records: Arc<dyn BackupStore>,
    pub(crate) catalog: Arc<dyn DatabaseCatalog>,
    pub(crate) exec: Arc<dyn ContainerExec>,
    pub(crate) storage: Arc<dyn ObjectStoreProvider>,
    pub(crate) options: OrchestratorOptions,
    locks: DatabaseLocks,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        records: Arc<dyn BackupStore>,
        catalog: Arc<dyn DatabaseCatalog>,
        exec: Arc<dyn ContainerExec>,
        storage: Arc<dyn ObjectStoreProvider>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            settings,
            records,
            catalog,
            exec,
            storage,
            options,
            locks: DatabaseLocks::new(),
        }
    }

    pub(crate) async fn lock_database(
        &self,
        database_id: i64,
        cancel: &CancellationToken,
    ) -> Result<OwnedMutexGuard<()>> {
        debug!(database_id, "waiting for database lock");
        cancellable(cancel, "waiting for database lock", async {
            Ok(self.locks.acquire(database_id).await)
        })
        .await
    }

    /// Effective settings; a missing row yields defaults.
    pub(crate) async fn resolve_settings(&self, database_id: i64) -> Result<BackupSettings> {
        self.settings
            .get(database_id)
            .await
            .map_err(OrchestratorError::Store)
    }

    /// Settings that must be usable for a transfer right now.
    pub(crate) async fn resolve_transfer_settings(&self, database_id: i64) -> Result<BackupSettings> {
        let settings = self.resolve_settings(database_id).await?;
        settings
            .validate_for_transfer()
            .map_err(OrchestratorError::Config)?;
        Ok(settings)
    }

    pub(crate) async fn resolve_database(&self, database_id: i64) -> Result<DatabaseRecord> {
        self.catalog
            .lookup(database_id)
            .await
            .map_err(OrchestratorError::Store)?
            .ok_or(OrchestratorError::DatabaseNotFound(database_id))
    }

    pub(crate) async fn connect_storage(
        &self,
        settings: &BackupSettings,
    ) -> Result<Arc<dyn ObjectStore>> {
        self.storage
            .connect(settings)
            .await
            .map_err(|e| OrchestratorError::transport("object storage connect", e))
    }
}

/// Runs `fut` unless `cancel` fires first; `what` names the interrupted step.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OrchestratorError::Cancelled(what.to_string())),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancellable_returns_result_when_not_cancelled() {
        let cancel = CancellationToken::new();
        let value = cancellable(&cancel, "step", async { Ok(5) }).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_cancellable_interrupts_pending_future() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<()> = cancellable(&cancel, "drop database", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;

        match result {
            Err(OrchestratorError::Cancelled(what)) => assert_eq!(what, "drop database"),
            other => panic!("expected cancellation, got {:?}", other.map(|_| ())),
        }
    }
}

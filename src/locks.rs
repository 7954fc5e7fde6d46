// dbvault/src/locks.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Advisory per-database locks. A backup or restore holds its database's
/// lock for the whole operation; different databases never contend.
#[derive(Default)]
pub struct DatabaseLocks {
    inner: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl DatabaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, database_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(database_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_database_is_serialized() {
        let locks = DatabaseLocks::new();
        let guard = locks.acquire(1).await;

        let waiting = tokio::time::timeout(Duration::from_millis(50), locks.acquire(1)).await;
        assert!(waiting.is_err());

        drop(guard);
        let reacquired = tokio::time::timeout(Duration::from_millis(50), locks.acquire(1)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_different_databases_are_independent() {
        let locks = DatabaseLocks::new();
        let _one = locks.acquire(1).await;
        let two = tokio::time::timeout(Duration::from_millis(50), locks.acquire(2)).await;
        assert!(two.is_ok());
    }
}

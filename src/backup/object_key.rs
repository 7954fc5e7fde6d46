// dbvault/src/backup/object_key.rs
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::store::Backup;

/// `<database>_<YYYYMMDD_HHMMSS>.sql`, UTC.
pub fn backup_filename(database_name: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}.sql", database_name, at.format("%Y%m%d_%H%M%S"))
}

/// Object key for `filename` under `path_prefix`.
///
/// Surrounding slashes of the prefix are dropped; a prefix that is empty (or
/// only slashes) puts the object at the bucket root.
pub fn derive_object_key(path_prefix: &str, filename: &str) -> String {
    let prefix = path_prefix.trim_matches('/');
    if prefix.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", prefix, filename)
    }
}

/// Key to read a backup from: the stored key when there is one.
///
/// Records written before keys were stored get their key re-derived from the
/// *current* prefix, which is only correct if the prefix has not changed
/// since the backup was taken.
pub fn resolve_object_key(backup: &Backup, current_prefix: &str) -> String {
    match backup.object_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => key.to_string(),
        None => {
            let key = derive_object_key(current_prefix, &backup.filename);
            warn!(
                backup_id = backup.id,
                object_key = %key,
                "backup has no stored object key; derived it from the current path prefix"
            );
            key
        }
    }
}

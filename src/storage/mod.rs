// dbvault/src/storage/mod.rs
pub(crate) mod endpoint;
pub(crate) mod s3;

use anyhow::Result;
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;

use crate::store::BackupSettings;

pub use endpoint::Endpoint;
pub use s3::S3StoreProvider;

/// Streaming body for uploads and downloads.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    pub size_bytes: u64,
}

/// Key-addressed blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads `body` until EOF. The length is not known up front.
    async fn put_stream(&self, bucket: &str, key: &str, body: ObjectReader) -> Result<PutOutcome>;

    async fn get_stream(&self, bucket: &str, key: &str) -> Result<ObjectReader>;

    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String>;
}

/// Builds a client for one database's settings; credentials are per database.
#[async_trait]
pub trait ObjectStoreProvider: Send + Sync {
    async fn connect(&self, settings: &BackupSettings) -> Result<Arc<dyn ObjectStore>>;
}

/// Informational URL stored on completed records: `<endpoint>/<bucket>/<key>`.
pub fn describe_object_url(endpoint: &str, bucket: &str, key: &str) -> String {
    let endpoint = Endpoint::parse(endpoint);
    let base = if endpoint.host.is_empty() {
        "https://s3.amazonaws.com".to_string()
    } else {
        endpoint.url()
    };
    format!("{}/{}/{}", base, bucket, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_object_url() {
        assert_eq!(
            describe_object_url("http://minio:9000", "b", "backups/app.sql"),
            "http://minio:9000/b/backups/app.sql"
        );
        assert_eq!(
            describe_object_url("nyc3.digitaloceanspaces.com", "b", "app.sql"),
            "https://nyc3.digitaloceanspaces.com/b/app.sql"
        );
        assert_eq!(
            describe_object_url("", "b", "app.sql"),
            "https://s3.amazonaws.com/b/app.sql"
        );
    }
}

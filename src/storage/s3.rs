// dbvault/src/storage/s3.rs
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::{Credentials, Region};
use s3::error::DisplayErrorContext;
use s3::presigning::PresigningConfig;
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::{Endpoint, ObjectReader, ObjectStore, ObjectStoreProvider, PutOutcome};
use crate::store::BackupSettings;

/// Hands out S3 clients configured from per-database settings.
pub struct S3StoreProvider {
    part_size: usize,
}

impl S3StoreProvider {
    pub fn new(part_size: usize) -> Self {
        Self { part_size }
    }
}

#[async_trait]
impl ObjectStoreProvider for S3StoreProvider {
    async fn connect(&self, settings: &BackupSettings) -> Result<Arc<dyn ObjectStore>> {
        let store = S3ObjectStore::connect(settings, self.part_size).await?;
        Ok(Arc::new(store))
    }
}

/// S3-compatible object storage (AWS, DigitalOcean Spaces, MinIO).
pub struct S3ObjectStore {
    client: s3::Client,
    part_size: usize,
}

impl S3ObjectStore {
    pub async fn connect(settings: &BackupSettings, part_size: usize) -> Result<Self> {
        let endpoint = Endpoint::parse(&settings.endpoint);
        debug!(
            provider = %settings.provider,
            host = %endpoint.host,
            secure = endpoint.secure,
            region = %settings.region,
            "configuring object storage client"
        );

        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(Credentials::new(
                &settings.access_key,
                &settings.secret_key,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        // An empty endpoint means AWS itself; anything else is S3-compatible
        // and usually only speaks path-style addressing.
        let custom_endpoint = !endpoint.host.is_empty();
        if custom_endpoint {
            loader = loader.endpoint_url(endpoint.url());
        }
        let sdk_config = loader.load().await;

        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(custom_endpoint)
            .build();

        Ok(Self {
            client: s3::Client::from_conf(s3_config),
            part_size,
        })
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        second: Vec<u8>,
        body: &mut ObjectReader,
    ) -> Result<PutOutcome> {
        let mut completed_parts = Vec::new();
        let mut part_number = 1;
        let mut size_bytes = 0u64;
        let mut part = first;
        let mut queued = Some(second);

        loop {
            if part_number > MAX_PARTS {
                anyhow::bail!(
                    "s3://{}/{} needs more than {} parts ({} bytes uploaded so far)",
                    bucket,
                    key,
                    MAX_PARTS,
                    size_bytes
                );
            }
            let part_len = part.len();
            debug!(key, part_number, part_len, "uploading part");

            let uploaded = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(part))
                .send()
                .await
                .map_err(|e| {
                    anyhow!(
                        "UploadPart {} for s3://{}/{} failed: {}",
                        part_number,
                        bucket,
                        key,
                        DisplayErrorContext(&e)
                    )
                })?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(uploaded.e_tag().unwrap_or_default())
                    .build(),
            );
            size_bytes += part_len as u64;
            part_number += 1;

            part = match queued.take() {
                Some(next) => next,
                None => read_part(body, part_size_for(part_number, self.part_size))
                    .await
                    .context("Failed to read upload body")?,
            };
            if part.is_empty() {
                break;
            }
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "CompleteMultipartUpload for s3://{}/{} failed: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                )
            })?;

        Ok(PutOutcome { size_bytes })
    }
}

/// Parts per multipart upload accepted by S3.
const MAX_PARTS: i32 = 10_000;
/// Largest single part S3 accepts.
const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
const PARTS_PER_SIZE_STEP: i32 = 1_000;

/// Size of part `part_number` (1-based). The configured size doubles every
/// thousand parts so a stream of unknown length stays under the part limit.
fn part_size_for(part_number: i32, base: usize) -> usize {
    let doublings = ((part_number.max(1) - 1) / PARTS_PER_SIZE_STEP).min(32) as u32;
    (base as u64)
        .saturating_mul(1u64 << doublings)
        .min(MAX_PART_SIZE) as usize
}

/// How a body of unknown length gets uploaded.
#[derive(Debug, PartialEq, Eq)]
enum UploadPlan {
    /// The whole body fits in one part.
    Single(Vec<u8>),
    /// More than one part; the first two are already read.
    Multipart { first: Vec<u8>, second: Vec<u8> },
}

async fn plan_upload(body: &mut ObjectReader, part_size: usize) -> std::io::Result<UploadPlan> {
    let first = read_part(body, part_size).await?;
    if first.len() < part_size {
        return Ok(UploadPlan::Single(first));
    }
    let second = read_part(body, part_size).await?;
    if second.is_empty() {
        return Ok(UploadPlan::Single(first));
    }
    Ok(UploadPlan::Multipart { first, second })
}

/// Reads up to `part_size` bytes; a shorter result means the body hit EOF.
async fn read_part(body: &mut ObjectReader, part_size: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(part_size);
    body.take(part_size as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_stream(&self, bucket: &str, key: &str, mut body: ObjectReader) -> Result<PutOutcome> {
        let (first, second) = match plan_upload(&mut body, self.part_size)
            .await
            .context("Failed to read upload body")?
        {
            UploadPlan::Multipart { first, second } => (first, second),
            UploadPlan::Single(whole) => {
                let size_bytes = whole.len() as u64;
                self.client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(ByteStream::from(whole))
                    .send()
                    .await
                    .map_err(|e| {
                        anyhow!("PutObject s3://{}/{} failed: {}", bucket, key, DisplayErrorContext(&e))
                    })?;
                info!(bucket, key, size_bytes, "uploaded object");
                return Ok(PutOutcome { size_bytes });
            }
        };

        let multipart = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "CreateMultipartUpload for s3://{}/{} failed: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                )
            })?;
        let upload_id = multipart
            .upload_id()
            .context("CreateMultipartUpload returned no upload id")?
            .to_string();

        match self.upload_parts(bucket, key, &upload_id, first, second, &mut body).await {
            Ok(outcome) => {
                info!(bucket, key, size_bytes = outcome.size_bytes, "uploaded object (multipart)");
                Ok(outcome)
            }
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        bucket,
                        key,
                        error = %DisplayErrorContext(&abort_err),
                        "failed to abort multipart upload"
                    );
                }
                Err(err)
            }
        }
    }

    async fn get_stream(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| anyhow!("GetObject s3://{}/{} failed: {}", bucket, key, DisplayErrorContext(&e)))?;

        debug!(bucket, key, content_length = ?object.content_length(), "opened download stream");
        Ok(Box::pin(object.body.into_async_read()))
    }

    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(ttl).context("Invalid presigned URL lifetime")?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| {
                anyhow!("Presigning s3://{}/{} failed: {}", bucket, key, DisplayErrorContext(&e))
            })?;
        Ok(request.uri().to_string())
    }
}

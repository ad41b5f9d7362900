use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::fan_out;
use crate::registry::AdapterFactory;
use crate::{
    Assetstore, AssetstoreAdapter, AssetstoreType, BackendState, Chunk, File, Upload, UploadError,
    UploadResult,
};

/// S3 refuses non-final parts smaller than this.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
/// S3 limit on parts per multipart upload.
pub const MAX_PARTS: usize = 10_000;

/// A part already committed to a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub number: i32,
    pub etag: String,
    pub size: u64,
}

/// The slice of the S3 API the adapter needs
#[async_trait]
pub trait MultipartClient: Send + Sync {
    /// Open a multipart upload, returning its id
    async fn create_multipart(&self, key: &str) -> UploadResult<String>;

    /// Upload one part, returning its etag
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        number: i32,
        data: Bytes,
    ) -> UploadResult<String>;

    /// Parts committed so far, ordered by number
    async fn list_parts(&self, key: &str, upload_id: &str) -> UploadResult<Vec<UploadedPart>>;

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> UploadResult<()>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> UploadResult<()>;

    async fn put_object(&self, key: &str, data: Bytes) -> UploadResult<()>;

    /// Size of the stored object, `None` when it does not exist
    async fn head_object(&self, key: &str) -> UploadResult<Option<u64>>;
}

fn sdk_error<E: std::error::Error>(operation: &str, error: E) -> UploadError {
    UploadError::backend_msg(format!("S3 {operation} failed: {}", DisplayErrorContext(error)))
}

/// [`MultipartClient`] backed by the AWS SDK
#[derive(Clone)]
pub struct AwsMultipartClient {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl AwsMultipartClient {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from settings, falling back to the default AWS
    /// credential chain.
    pub async fn from_settings(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(aws_sdk_s3::config::Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(settings.force_path_style);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self::new(aws_sdk_s3::Client::from_conf(builder.build()), &settings.bucket)
    }
}

#[async_trait]
impl MultipartClient for AwsMultipartClient {
    async fn create_multipart(&self, key: &str) -> UploadResult<String> {
        let out = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("create_multipart_upload", e))?;

        out.upload_id()
            .map(str::to_string)
            .ok_or_else(|| UploadError::backend_msg("S3 returned no multipart upload id"))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        number: i32,
        data: Bytes,
    ) -> UploadResult<String> {
        let out = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| sdk_error("upload_part", e))?;

        out.e_tag()
            .map(str::to_string)
            .ok_or_else(|| UploadError::backend_msg("S3 returned no etag for part"))
    }

    async fn list_parts(&self, key: &str, upload_id: &str) -> UploadResult<Vec<UploadedPart>> {
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let out = self
                .client
                .list_parts()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .set_part_number_marker(marker.take())
                .send()
                .await
                .map_err(|e| sdk_error("list_parts", e))?;

            for part in out.parts() {
                parts.push(UploadedPart {
                    number: part.part_number().unwrap_or_default(),
                    etag: part.e_tag().unwrap_or_default().to_string(),
                    size: part.size().unwrap_or_default().max(0) as u64,
                });
            }

            match (out.is_truncated(), out.next_part_number_marker()) {
                (Some(true), Some(next)) => marker = Some(next.to_string()),
                _ => break,
            }
        }
        parts.sort_by_key(|p| p.number);
        Ok(parts)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> UploadResult<()> {
        let completed = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("complete_multipart_upload", e))?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> UploadResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| sdk_error("abort_multipart_upload", e))?;
        Ok(())
    }

    async fn put_object(&self, key: &str, data: Bytes) -> UploadResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| sdk_error("put_object", e))?;
        Ok(())
    }

    async fn head_object(&self, key: &str) -> UploadResult<Option<u64>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => Ok(Some(out.content_length().unwrap_or_default().max(0) as u64)),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(err) => Err(sdk_error("head_object", err)),
        }
    }
}

/// Settings of an S3 assetstore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Settings {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO, R2, ...)
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct MultipartState {
    key: String,
    /// Absent for zero-byte uploads, which never open a multipart session.
    #[serde(default)]
    multipart_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectLocator {
    key: String,
}

/// Maps each accepted chunk onto one part of an S3 multipart upload.
pub struct S3Adapter {
    client: Arc<dyn MultipartClient>,
    prefix: String,
    min_part_size: u64,
}

impl S3Adapter {
    pub fn new(client: Arc<dyn MultipartClient>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into().trim_matches('/').to_string(),
            min_part_size: MIN_PART_SIZE,
        }
    }

    /// Override the minimum non-final part size (S3-compatible stores differ).
    pub fn with_min_part_size(mut self, bytes: u64) -> Self {
        self.min_part_size = bytes;
        self
    }

    fn object_key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            fan_out(name)
        } else {
            format!("{}/{}", self.prefix, fan_out(name))
        }
    }

    fn state(upload: &Upload) -> UploadResult<MultipartState> {
        upload.backend.decode()
    }

    async fn committed(&self, state: &MultipartState) -> UploadResult<Vec<UploadedPart>> {
        match &state.multipart_id {
            Some(id) => self.client.list_parts(&state.key, id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Turn the committed parts (or nothing, for zero bytes) into the object.
    async fn seal(&self, upload: &Upload, state: &MultipartState) -> UploadResult<()> {
        match &state.multipart_id {
            None => {
                if upload.size != 0 {
                    return Err(UploadError::backend_msg(
                        "S3 upload has no multipart session",
                    ));
                }
                self.client.put_object(&state.key, Bytes::new()).await?;
            }
            Some(id) => {
                let parts = self.client.list_parts(&state.key, id).await?;
                let stored = committed_len(&parts);
                if stored != upload.size {
                    return Err(UploadError::validation(format!(
                        "Stored {} bytes but upload declares {}",
                        stored, upload.size
                    )));
                }
                self.client.complete_multipart(&state.key, id, &parts).await?;
            }
        }
        Ok(())
    }
}

fn committed_len(parts: &[UploadedPart]) -> u64 {
    parts.iter().map(|p| p.size).sum()
}

#[async_trait]
impl AssetstoreAdapter for S3Adapter {
    fn kind(&self) -> AssetstoreType {
        AssetstoreType::S3
    }

    async fn init_upload(&self, mut upload: Upload) -> UploadResult<Upload> {
        let key = self.object_key(&Uuid::new_v4().simple().to_string());
        let multipart_id = if upload.size > 0 {
            Some(self.client.create_multipart(&key).await?)
        } else {
            None
        };

        tracing::debug!(upload_id = %upload.id, %key, "opened S3 upload");
        upload.backend = BackendState::encode(&MultipartState { key, multipart_id })?;
        Ok(upload)
    }

    async fn upload_chunk(&self, mut upload: Upload, chunk: Chunk) -> UploadResult<Upload> {
        let state = Self::state(&upload)?;
        let multipart_id = state
            .multipart_id
            .as_deref()
            .ok_or_else(|| UploadError::validation("Zero-byte uploads accept no chunks"))?;

        let parts = self.client.list_parts(&state.key, multipart_id).await?;
        let stored = committed_len(&parts);
        if stored != chunk.offset {
            return Err(UploadError::validation(format!(
                "Chunk offset {} does not match stored offset {}",
                chunk.offset, stored
            )));
        }

        let is_final = chunk.offset + chunk.len() == upload.size;
        if !is_final && chunk.len() < self.min_part_size {
            return Err(UploadError::validation(format!(
                "Chunks other than the last must be at least {} bytes, got {}",
                self.min_part_size,
                chunk.len()
            )));
        }
        if parts.len() >= MAX_PARTS {
            return Err(UploadError::validation(format!(
                "Upload already has the maximum of {MAX_PARTS} parts"
            )));
        }

        let number = parts.last().map(|p| p.number + 1).unwrap_or(1);
        self.client
            .upload_part(&state.key, multipart_id, number, chunk.data.clone())
            .await?;

        upload.received = stored + chunk.len();
        Ok(upload)
    }

    async fn request_offset(&self, upload: &Upload) -> UploadResult<u64> {
        let state = Self::state(upload)?;
        Ok(committed_len(&self.committed(&state).await?))
    }

    async fn finalize_upload(&self, upload: &Upload, mut file: File) -> UploadResult<File> {
        let state = Self::state(upload)?;
        match self.client.head_object(&state.key).await? {
            Some(size) if size == upload.size => {
                tracing::debug!(upload_id = %upload.id, key = %state.key, "object already sealed");
            }
            Some(size) => {
                return Err(UploadError::backend_msg(format!(
                    "S3 object {} already holds {} bytes, upload declares {}",
                    state.key, size, upload.size
                )));
            }
            None => self.seal(upload, &state).await?,
        }

        file.locator = BackendState::encode(&ObjectLocator { key: state.key })?;
        Ok(file)
    }

    async fn cancel_upload(&self, upload: &Upload) -> UploadResult<()> {
        let state = Self::state(upload)?;
        if let Some(id) = &state.multipart_id {
            self.client.abort_multipart(&state.key, id).await?;
        }
        Ok(())
    }
}

/// Builds [`S3Adapter`]s backed by the AWS SDK
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Factory;

#[async_trait]
impl AdapterFactory for S3Factory {
    async fn build(&self, assetstore: &Assetstore) -> UploadResult<Arc<dyn AssetstoreAdapter>> {
        let settings: S3Settings = assetstore.settings()?;
        if settings.bucket.trim().is_empty() {
            return Err(UploadError::configuration(format!(
                "S3 assetstore {} has no bucket",
                assetstore.name
            )));
        }

        let client = AwsMultipartClient::from_settings(&settings).await;
        Ok(Arc::new(S3Adapter::new(Arc::new(client), settings.prefix)))
    }
}

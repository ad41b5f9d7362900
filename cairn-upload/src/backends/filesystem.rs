use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use super::{fan_out, hex_digest};
use crate::registry::AdapterFactory;
use crate::{
    Assetstore, AssetstoreAdapter, AssetstoreType, BackendState, Chunk, File, Upload, UploadError,
    UploadResult,
};

const TEMP_DIR: &str = "temp";
const READ_BUFFER: usize = 64 * 1024;

/// Settings of a filesystem assetstore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemSettings {
    /// Directory holding both finished files and in-flight temp files
    pub root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct TempFileState {
    /// Relative to the assetstore root
    temp_file: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredLocator {
    /// Relative to the assetstore root
    path: String,
}

/// Writes chunks into a temp file and links it to a content-addressed
/// location on finalize.
pub struct FilesystemAdapter {
    root: PathBuf,
}

impl FilesystemAdapter {
    /// Open (and create if needed) an assetstore rooted at `root`.
    pub async fn new<P: Into<PathBuf>>(root: P) -> UploadResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TEMP_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a finalized file.
    pub fn resolve(&self, file: &File) -> UploadResult<PathBuf> {
        let locator: StoredLocator = file.locator.decode()?;
        Ok(self.root.join(locator.path))
    }

    fn temp_path(&self, upload: &Upload) -> UploadResult<PathBuf> {
        let state: TempFileState = upload.backend.decode()?;
        Ok(self.root.join(state.temp_file))
    }

    async fn remove_temp(&self, upload: &Upload) -> UploadResult<()> {
        let path = self.temp_path(upload)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Put `temp` at `dest` without consuming it. The destination only ever
    /// appears complete.
    async fn place(temp: &Path, dest: &Path) -> UploadResult<()> {
        if fs::hard_link(temp, dest).await.is_ok() {
            return Ok(());
        }
        let partial = dest.with_extension("partial");
        fs::copy(temp, &partial).await?;
        fs::rename(&partial, dest).await?;
        Ok(())
    }

    async fn digest(path: &Path) -> UploadResult<(String, u64)> {
        let mut file = fs::File::open(path).await?;
        let mut hasher = Sha512::new();
        let mut buf = vec![0u8; READ_BUFFER];
        let mut total = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((hex_digest(hasher), total))
    }
}

#[async_trait]
impl AssetstoreAdapter for FilesystemAdapter {
    fn kind(&self) -> AssetstoreType {
        AssetstoreType::Filesystem
    }

    async fn init_upload(&self, mut upload: Upload) -> UploadResult<Upload> {
        let temp_file = format!("{}/{}", TEMP_DIR, Uuid::new_v4().simple());
        fs::File::create(self.root.join(&temp_file)).await?;

        tracing::debug!(upload_id = %upload.id, %temp_file, "created temp file");
        upload.backend = BackendState::encode(&TempFileState { temp_file })?;
        Ok(upload)
    }

    async fn upload_chunk(&self, mut upload: Upload, chunk: Chunk) -> UploadResult<Upload> {
        let path = self.temp_path(&upload)?;
        let mut file = fs::OpenOptions::new().write(true).open(&path).await?;

        let stored = file.metadata().await?.len();
        if stored != chunk.offset {
            return Err(UploadError::validation(format!(
                "Chunk offset {} does not match stored offset {}",
                chunk.offset, stored
            )));
        }

        file.seek(SeekFrom::Start(stored)).await?;
        file.write_all(&chunk.data).await?;
        file.sync_data().await?;

        upload.received = stored + chunk.len();
        Ok(upload)
    }

    async fn request_offset(&self, upload: &Upload) -> UploadResult<u64> {
        let path = self.temp_path(upload)?;
        Ok(fs::metadata(&path).await?.len())
    }

    async fn finalize_upload(&self, upload: &Upload, mut file: File) -> UploadResult<File> {
        let temp = self.temp_path(upload)?;
        let (sha512, stored) = Self::digest(&temp).await?;
        if stored != upload.size {
            return Err(UploadError::validation(format!(
                "Stored {} bytes but upload declares {}",
                stored, upload.size
            )));
        }

        let relative = fan_out(&sha512);
        let dest = self.root.join(&relative);
        // Present already when identical content was stored, or on a retry.
        if !fs::try_exists(&dest).await? {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await?;
            }
            Self::place(&temp, &dest).await?;
        }

        tracing::debug!(upload_id = %upload.id, path = %relative, "sealed upload");
        file.sha512 = Some(sha512);
        file.locator = BackendState::encode(&StoredLocator { path: relative })?;
        Ok(file)
    }

    async fn cancel_upload(&self, upload: &Upload) -> UploadResult<()> {
        self.remove_temp(upload).await
    }

    async fn cleanup_upload(&self, upload: &Upload) -> UploadResult<()> {
        self.remove_temp(upload).await
    }
}

/// Builds [`FilesystemAdapter`]s from [`FilesystemSettings`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemFactory;

#[async_trait]
impl AdapterFactory for FilesystemFactory {
    async fn build(&self, assetstore: &Assetstore) -> UploadResult<Arc<dyn AssetstoreAdapter>> {
        let settings: FilesystemSettings = assetstore.settings()?;
        let adapter = FilesystemAdapter::new(settings.root).await.map_err(|e| {
            UploadError::configuration(format!(
                "Cannot open filesystem assetstore {}: {e}",
                assetstore.name
            ))
        })?;
        Ok(Arc::new(adapter))
    }
}

use async_trait::async_trait;

use crate::{AssetstoreType, Chunk, File, Upload, UploadResult};

/// Backend-specific half of the upload protocol.
///
/// One implementation exists per storage technology. Every method receives
/// the current record and returns an augmented copy; the manager persists
/// whatever comes back, so an adapter must never report bytes it has not
/// durably committed.
#[async_trait]
pub trait AssetstoreAdapter: Send + Sync {
    /// Storage technology served by this adapter
    fn kind(&self) -> AssetstoreType;

    /// Allocate backend resources (temp file, multipart session, ...) and
    /// embed a handle in the returned record.
    async fn init_upload(&self, upload: Upload) -> UploadResult<Upload>;

    /// Persist `chunk` and advance `received` by the number of bytes
    /// committed.
    ///
    /// Must fail with a validation error when `chunk.offset` does not equal
    /// the backend's durable offset.
    async fn upload_chunk(&self, upload: Upload, chunk: Chunk) -> UploadResult<Upload>;

    /// Offset the backend durably holds, regardless of `upload.received`.
    async fn request_offset(&self, upload: &Upload) -> UploadResult<u64>;

    /// Seal backend storage and fill in the locator of `file`.
    ///
    /// May run again for the same upload when persisting the file failed
    /// afterwards, so it must succeed on storage it already sealed. Staging
    /// data stays in place until [`cleanup_upload`](Self::cleanup_upload).
    async fn finalize_upload(&self, upload: &Upload, file: File) -> UploadResult<File>;

    /// Release whatever `init_upload` allocated.
    async fn cancel_upload(&self, _upload: &Upload) -> UploadResult<()> {
        Ok(())
    }

    /// Drop staging data once the file is saved and the record removed.
    async fn cleanup_upload(&self, _upload: &Upload) -> UploadResult<()> {
        Ok(())
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Assetstore, AssetstoreId, File, FileId, FolderId, Item, ItemId, Upload, UploadError, UploadId,
    UploadResult, UserId,
};

/// Durable storage for in-progress upload records
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Load an upload record; `None` once it has been finalized or removed
    async fn load(&self, id: &UploadId) -> UploadResult<Option<Upload>>;

    /// Validate, stamp `updated`, and upsert the record
    async fn save(&self, upload: Upload) -> UploadResult<Upload>;

    /// Delete the record
    async fn remove(&self, id: &UploadId) -> UploadResult<()>;

    /// Records whose last update is older than `cutoff`
    async fn updated_before(&self, cutoff: DateTime<Utc>) -> UploadResult<Vec<Upload>>;
}

/// Read access to assetstore configuration
#[async_trait]
pub trait AssetstoreSource: Send + Sync {
    /// The assetstore new uploads go to, if one is designated
    async fn current(&self) -> UploadResult<Option<Assetstore>>;

    /// Load by id. A missing assetstore is a configuration error.
    async fn load(&self, id: &AssetstoreId) -> UploadResult<Assetstore>;
}

/// Creates the permanent item/file records once an upload completes
#[async_trait]
pub trait FileFactory: Send + Sync {
    async fn create_item(&self, name: &str, creator: &UserId, folder: &FolderId)
        -> UploadResult<Item>;

    /// Remove an item created by [`create_item`](Self::create_item) that
    /// never received its file.
    async fn remove_item(&self, item: &ItemId) -> UploadResult<()>;

    /// Build an unsaved file stub. The adapter fills in the locator.
    async fn create_file(
        &self,
        item: &ItemId,
        name: &str,
        size: u64,
        creator: &UserId,
        assetstore: &Assetstore,
    ) -> UploadResult<File>;

    /// Insert or replace the file with `file.id`.
    async fn save_file(&self, file: File) -> UploadResult<File>;

    async fn load_file(&self, id: &FileId) -> UploadResult<Option<File>>;
}

/// Checks every persisted upload must pass.
pub fn validate_upload(upload: &Upload) -> UploadResult<()> {
    if upload.received > upload.size {
        return Err(UploadError::validation(format!(
            "Received bytes ({}) must not be larger than the total size of the upload ({})",
            upload.received, upload.size
        )));
    }
    if upload.name.trim().is_empty() {
        return Err(UploadError::validation("Upload name must not be empty"));
    }
    Ok(())
}

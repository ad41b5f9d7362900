use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    AdapterRegistry, Assetstore, AssetstoreAdapter, AssetstoreSource, Chunk, ChunkOutcome, File,
    FileFactory, Parent, Upload, UploadConfig, UploadError, UploadId, UploadLocks, UploadResult,
    UploadStore, UserId,
};

/// Drives the chunked-upload lifecycle.
///
/// The manager never interprets backend state; it resolves the adapter for
/// each upload's assetstore and persists whatever the adapter returns, once
/// the size invariants have been checked. Every read-modify-persist cycle on
/// an existing upload runs under that upload's lock.
pub struct UploadManager {
    uploads: Arc<dyn UploadStore>,
    assetstores: Arc<dyn AssetstoreSource>,
    files: Arc<dyn FileFactory>,
    registry: Arc<AdapterRegistry>,
    locks: UploadLocks,
    config: UploadConfig,
}

impl UploadManager {
    pub fn new<U, A, F>(
        uploads: U,
        assetstores: A,
        files: F,
        registry: Arc<AdapterRegistry>,
        config: UploadConfig,
    ) -> Self
    where
        U: UploadStore + 'static,
        A: AssetstoreSource + 'static,
        F: FileFactory + 'static,
    {
        Self::from_parts(
            Arc::new(uploads),
            Arc::new(assetstores),
            Arc::new(files),
            registry,
            config,
        )
    }

    pub fn from_parts(
        uploads: Arc<dyn UploadStore>,
        assetstores: Arc<dyn AssetstoreSource>,
        files: Arc<dyn FileFactory>,
        registry: Arc<AdapterRegistry>,
        config: UploadConfig,
    ) -> Self {
        Self {
            uploads,
            assetstores,
            files,
            registry,
            locks: UploadLocks::new(),
            config,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Start a new upload into the current assetstore.
    ///
    /// The caller has already checked that `parent` exists.
    #[tracing::instrument(skip(self), fields(upload_id))]
    pub async fn create_upload(
        &self,
        user: &UserId,
        name: &str,
        parent: Parent,
        size: u64,
    ) -> UploadResult<Upload> {
        if name.trim().is_empty() {
            return Err(UploadError::validation("Upload name must not be empty"));
        }
        if size > self.config.max_upload_bytes {
            return Err(UploadError::validation(format!(
                "Upload size {} exceeds maximum {}",
                size, self.config.max_upload_bytes
            )));
        }

        let assetstore = self
            .assetstores
            .current()
            .await?
            .ok_or_else(|| UploadError::configuration("No current assetstore is configured"))?;
        let adapter = self.registry.resolve(&assetstore).await?;

        let draft = Upload::new(
            name.to_string(),
            size,
            parent,
            user.clone(),
            assetstore.id.clone(),
        );
        tracing::Span::current().record("upload_id", tracing::field::display(&draft.id));

        let initialized = adapter.init_upload(draft.clone()).await?;
        ensure_same_upload(&draft, &initialized)?;
        if initialized.received != 0 {
            return Err(UploadError::validation(
                "Adapter reported received bytes for a new upload",
            ));
        }

        match self.uploads.save(initialized.clone()).await {
            Ok(upload) => {
                info!(
                    upload_id = %upload.id,
                    assetstore_id = %upload.assetstore_id,
                    size = upload.size,
                    "upload created"
                );
                Ok(upload)
            }
            Err(err) => {
                if let Err(cancel) = adapter.cancel_upload(&initialized).await {
                    warn!(upload_id = %draft.id, error = %cancel, "could not release backend resources");
                }
                Err(err)
            }
        }
    }

    /// Load an upload record
    pub async fn load_upload(&self, id: &UploadId) -> UploadResult<Option<Upload>> {
        self.uploads.load(id).await
    }

    /// Apply one chunk. Finalizes automatically when the last byte arrives.
    ///
    /// A rejected chunk leaves the stored record as it was. If finalizing
    /// fails after the last byte is stored, the record stays complete and
    /// [`finalize_upload`](Self::finalize_upload) picks up from there.
    #[tracing::instrument(skip(self, chunk), fields(offset = chunk.offset, len = chunk.len()))]
    pub async fn handle_chunk(&self, id: &UploadId, chunk: Chunk) -> UploadResult<ChunkOutcome> {
        let _guard = self.locks.acquire(id).await;
        let upload = self.require(id).await?;

        if chunk.is_empty() {
            return Err(UploadError::validation("Chunk is empty"));
        }
        if chunk.len() > self.config.max_chunk_bytes {
            return Err(UploadError::validation(format!(
                "Chunk of {} bytes exceeds maximum {}",
                chunk.len(),
                self.config.max_chunk_bytes
            )));
        }
        match chunk.end() {
            Some(end) if end <= upload.size => {}
            _ => {
                return Err(UploadError::validation(format!(
                    "Chunk at offset {} with {} bytes would exceed upload size {}",
                    chunk.offset,
                    chunk.len(),
                    upload.size
                )))
            }
        }

        let assetstore = self.assetstores.load(&upload.assetstore_id).await?;
        let adapter = self.registry.resolve(&assetstore).await?;

        let updated = adapter.upload_chunk(upload.clone(), chunk).await?;
        ensure_same_upload(&upload, &updated)?;
        if updated.received > updated.size {
            return Err(UploadError::validation(format!(
                "Adapter reported {} received bytes for an upload of {}",
                updated.received, updated.size
            )));
        }
        if updated.received < upload.received {
            return Err(UploadError::validation(format!(
                "Adapter moved received backwards from {} to {}",
                upload.received, updated.received
            )));
        }

        let saved = self.uploads.save(updated).await?;
        debug!(upload_id = %saved.id, received = saved.received, size = saved.size, "chunk stored");

        if saved.is_complete() {
            let file = self.finalize_locked(saved, assetstore, adapter).await?;
            return Ok(ChunkOutcome::Complete(file));
        }
        Ok(ChunkOutcome::Progress(saved))
    }

    /// Offset the backend durably holds; where a reconnecting client resumes.
    ///
    /// Takes no lock, so the value may be stale while a chunk for the same
    /// upload is in flight. It is a resume hint, not a commit point.
    pub async fn request_offset(&self, id: &UploadId) -> UploadResult<u64> {
        let upload = self.require(id).await?;
        let assetstore = self.assetstores.load(&upload.assetstore_id).await?;
        let adapter = self.registry.resolve(&assetstore).await?;

        let offset = adapter.request_offset(&upload).await?;
        if offset > upload.size {
            return Err(UploadError::validation(format!(
                "Backend holds {} bytes for an upload of {}",
                offset, upload.size
            )));
        }
        if offset != upload.received {
            debug!(
                upload_id = %upload.id,
                offset,
                received = upload.received,
                "backend offset differs from recorded progress"
            );
        }
        Ok(offset)
    }

    /// Finalize an upload whose bytes are all in, typically a zero-byte one.
    #[tracing::instrument(skip(self))]
    pub async fn finalize_upload(&self, id: &UploadId) -> UploadResult<File> {
        let _guard = self.locks.acquire(id).await;
        let upload = self.require(id).await?;
        if !upload.is_complete() {
            return Err(UploadError::validation(format!(
                "Upload has {} of {} bytes and cannot be finalized",
                upload.received, upload.size
            )));
        }

        let assetstore = self.assetstores.load(&upload.assetstore_id).await?;
        let adapter = self.registry.resolve(&assetstore).await?;
        self.finalize_locked(upload, assetstore, adapter).await
    }

    /// Abandon an upload: release backend resources and drop the record.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_upload(&self, id: &UploadId) -> UploadResult<()> {
        let _guard = self.locks.acquire(id).await;
        let upload = self.require(id).await?;
        let assetstore = self.assetstores.load(&upload.assetstore_id).await?;
        let adapter = self.registry.resolve(&assetstore).await?;

        adapter.cancel_upload(&upload).await?;
        self.uploads.remove(&upload.id).await?;
        info!(upload_id = %upload.id, received = upload.received, "upload cancelled");
        Ok(())
    }

    /// Uploads not touched since `older_than`, for external housekeeping.
    pub async fn stale_uploads(&self, older_than: DateTime<Utc>) -> UploadResult<Vec<Upload>> {
        self.uploads.updated_before(older_than).await
    }

    async fn require(&self, id: &UploadId) -> UploadResult<Upload> {
        self.uploads
            .load(id)
            .await?
            .ok_or_else(|| UploadError::not_found(id.as_str()))
    }

    /// Promote a complete upload to a file. Caller holds the upload's lock.
    ///
    /// The stub's id is written to the record before the adapter seals, so a
    /// retry after a partial failure finds the saved file instead of making
    /// a second one.
    async fn finalize_locked(
        &self,
        upload: Upload,
        assetstore: Assetstore,
        adapter: Arc<dyn AssetstoreAdapter>,
    ) -> UploadResult<File> {
        if let Some(file_id) = &upload.file_id {
            if let Some(file) = self.files.load_file(file_id).await? {
                debug!(upload_id = %upload.id, file_id = %file.id, "file already saved");
                return self.retire(upload, adapter.as_ref(), file).await;
            }
        }

        let (item_id, created_item) = match &upload.parent {
            Parent::Folder(folder) => {
                let item = self
                    .files
                    .create_item(&upload.name, &upload.user_id, folder)
                    .await?;
                (item.id, true)
            }
            Parent::Item(item) => (item.clone(), false),
        };

        let result = async {
            let stub = self
                .files
                .create_file(&item_id, &upload.name, upload.size, &upload.user_id, &assetstore)
                .await?;
            let mut pending = upload.clone();
            pending.file_id = Some(stub.id.clone());
            let pending = self.uploads.save(pending).await?;

            let sealed = adapter.finalize_upload(&pending, stub).await?;
            let file = self.files.save_file(sealed).await?;
            Ok::<_, UploadError>((pending, file))
        }
        .await;

        let (pending, file) = match result {
            Ok(done) => done,
            Err(err) => {
                if created_item {
                    if let Err(rollback) = self.files.remove_item(&item_id).await {
                        warn!(item_id = %item_id, error = %rollback, "could not remove item after failed finalize");
                    }
                }
                return Err(err);
            }
        };

        self.retire(pending, adapter.as_ref(), file).await
    }

    /// Drop the record of a finalized upload, then its staging data.
    async fn retire(
        &self,
        upload: Upload,
        adapter: &dyn AssetstoreAdapter,
        file: File,
    ) -> UploadResult<File> {
        self.uploads.remove(&upload.id).await?;
        if let Err(err) = adapter.cleanup_upload(&upload).await {
            warn!(upload_id = %upload.id, error = %err, "could not clean up staging data");
        }

        info!(
            upload_id = %upload.id,
            file_id = %file.id,
            item_id = %file.item_id,
            size = file.size,
            "upload finalized"
        );
        Ok(file)
    }
}

fn ensure_same_upload(before: &Upload, after: &Upload) -> UploadResult<()> {
    if before.id != after.id || before.size != after.size {
        return Err(UploadError::validation(
            "Adapter changed the identity or size of the upload",
        ));
    }
    Ok(())
}

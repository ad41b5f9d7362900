use std::sync::Arc;

use async_trait::async_trait;
use cairn_upload::backends::{FilesystemAdapter, MemoryChunkCollection};
use cairn_upload::memory::{MemoryAssetstores, MemoryFileFactory, MemoryUploadStore};
use cairn_upload::{
    AdapterFactory, AdapterRegistry, Assetstore, AssetstoreAdapter, AssetstoreType, BackendState,
    Chunk, ChunkOutcome, ErrorKind, File, FolderId, ItemId, Parent, Upload, UploadConfig,
    UploadManager, UploadResult, UploadState, UploadStore, UserId,
};
use serde_json::json;

/// Test fixture: manager plus handles on every in-memory collaborator
struct Harness {
    manager: UploadManager,
    uploads: MemoryUploadStore,
    files: MemoryFileFactory,
    assetstores: MemoryAssetstores,
}

fn harness_with(registry: AdapterRegistry, current: Option<Assetstore>) -> Harness {
    let uploads = MemoryUploadStore::new();
    let files = MemoryFileFactory::new();
    let assetstores = MemoryAssetstores::new();
    if let Some(store) = current {
        assetstores.insert_current(store);
    }

    let manager = UploadManager::new(
        uploads.clone(),
        assetstores.clone(),
        files.clone(),
        Arc::new(registry),
        UploadConfig::default(),
    );
    Harness {
        manager,
        uploads,
        files,
        assetstores,
    }
}

fn gridfs_harness() -> Harness {
    harness_with(
        AdapterRegistry::with_defaults(Arc::new(MemoryChunkCollection::new())),
        Some(Assetstore::new("chunks", AssetstoreType::GridFs, json!({"chunk_size": 3}))),
    )
}

fn user() -> UserId {
    UserId::from("user-1")
}

fn folder() -> Parent {
    Parent::Folder(FolderId::from("folder-1"))
}

fn bytes(n: usize, fill: u8) -> Vec<u8> {
    vec![fill; n]
}

#[tokio::test]
async fn ten_bytes_in_three_chunks_becomes_one_file() {
    let h = gridfs_harness();
    let upload = h.manager.create_upload(&user(), "ten.bin", folder(), 10).await.unwrap();
    assert_eq!(upload.received, 0);
    assert_eq!(upload.state(), UploadState::Created);

    let outcome = h.manager.handle_chunk(&upload.id, Chunk::new(0, bytes(4, 1))).await.unwrap();
    let progress = outcome.upload().unwrap();
    assert_eq!(progress.received, 4);
    assert_eq!(progress.state(), UploadState::InProgress);
    assert!(h.files.files().is_empty());

    let outcome = h.manager.handle_chunk(&upload.id, Chunk::new(4, bytes(4, 2))).await.unwrap();
    assert_eq!(outcome.upload().unwrap().received, 8);
    assert_eq!(h.uploads.load(&upload.id).await.unwrap().unwrap().received, 8);

    let outcome = h.manager.handle_chunk(&upload.id, Chunk::new(8, bytes(2, 3))).await.unwrap();
    let file = match outcome {
        ChunkOutcome::Complete(file) => file,
        ChunkOutcome::Progress(upload) => panic!("expected a file, got {upload:?}"),
    };
    assert_eq!(file.size, 10);
    assert_eq!(file.name, "ten.bin");
    assert!(file.sha512.is_some());

    assert!(h.manager.load_upload(&upload.id).await.unwrap().is_none());
    assert_eq!(h.files.files().len(), 1);

    // A folder parent gets a fresh item named after the upload.
    let items = h.files.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name, "ten.bin");
    assert_eq!(items[0].id, file.item_id);
}

#[tokio::test]
async fn item_parent_reuses_the_existing_item() {
    let h = gridfs_harness();
    let item = ItemId::from("item-7");
    let upload = h
        .manager
        .create_upload(&user(), "a.txt", Parent::Item(item.clone()), 3)
        .await
        .unwrap();

    let outcome = h.manager.handle_chunk(&upload.id, Chunk::new(0, bytes(3, 9))).await.unwrap();
    assert_eq!(outcome.file().unwrap().item_id, item);
    assert!(h.files.items().is_empty());
}

#[tokio::test]
async fn zero_byte_upload_finalizes_without_chunks() {
    let h = gridfs_harness();
    let upload = h.manager.create_upload(&user(), "empty", folder(), 0).await.unwrap();
    assert_eq!(upload.state(), UploadState::Completing);

    let file = h.manager.finalize_upload(&upload.id).await.unwrap();
    assert_eq!(file.size, 0);
    assert!(h.manager.load_upload(&upload.id).await.unwrap().is_none());

    let again = h.manager.finalize_upload(&upload.id).await.unwrap_err();
    assert_eq!(again.kind(), ErrorKind::NotFound);
    assert_eq!(h.files.files().len(), 1);
}

#[tokio::test]
async fn finalize_refuses_incomplete_uploads() {
    let h = gridfs_harness();
    let upload = h.manager.create_upload(&user(), "half", folder(), 4).await.unwrap();
    h.manager.handle_chunk(&upload.id, Chunk::new(0, bytes(2, 0))).await.unwrap();

    let err = h.manager.finalize_upload(&upload.id).await.unwrap_err();
    assert!(err.is_validation());
    assert!(h.files.files().is_empty());
}

#[tokio::test]
async fn chunk_past_the_end_is_rejected_and_record_unchanged() {
    let h = gridfs_harness();
    let upload = h.manager.create_upload(&user(), "f", folder(), 5).await.unwrap();
    h.manager.handle_chunk(&upload.id, Chunk::new(0, bytes(3, 0))).await.unwrap();

    let err = h
        .manager
        .handle_chunk(&upload.id, Chunk::new(3, bytes(3, 0)))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(h.uploads.load(&upload.id).await.unwrap().unwrap().received, 3);
    assert_eq!(h.manager.request_offset(&upload.id).await.unwrap(), 3);
}

#[tokio::test]
async fn misaligned_chunk_is_rejected_and_record_unchanged() {
    let h = gridfs_harness();
    let upload = h.manager.create_upload(&user(), "f", folder(), 8).await.unwrap();
    h.manager.handle_chunk(&upload.id, Chunk::new(0, bytes(4, 0))).await.unwrap();

    for offset in [0, 2, 6] {
        let err = h
            .manager
            .handle_chunk(&upload.id, Chunk::new(offset, bytes(2, 0)))
            .await
            .unwrap_err();
        assert!(err.is_validation(), "offset {offset}: {err}");
    }
    assert_eq!(h.uploads.load(&upload.id).await.unwrap().unwrap().received, 4);
}

#[tokio::test]
async fn empty_and_oversized_chunks_are_rejected() {
    let uploads = MemoryUploadStore::new();
    let assetstores = MemoryAssetstores::new();
    assetstores.insert_current(Assetstore::new("chunks", AssetstoreType::GridFs, json!({})));
    let manager = UploadManager::new(
        uploads,
        assetstores,
        MemoryFileFactory::new(),
        Arc::new(AdapterRegistry::with_defaults(Arc::new(MemoryChunkCollection::new()))),
        UploadConfig::default().with_max_chunk_bytes(4),
    );

    let upload = manager.create_upload(&user(), "f", folder(), 10).await.unwrap();
    assert!(manager
        .handle_chunk(&upload.id, Chunk::new(0, Vec::<u8>::new()))
        .await
        .unwrap_err()
        .is_validation());
    assert!(manager
        .handle_chunk(&upload.id, Chunk::new(0, bytes(5, 0)))
        .await
        .unwrap_err()
        .is_validation());
}

#[tokio::test]
async fn create_validates_name_and_size_limit() {
    let uploads = MemoryUploadStore::new();
    let assetstores = MemoryAssetstores::new();
    assetstores.insert_current(Assetstore::new("chunks", AssetstoreType::GridFs, json!({})));
    let manager = UploadManager::new(
        uploads.clone(),
        assetstores,
        MemoryFileFactory::new(),
        Arc::new(AdapterRegistry::with_defaults(Arc::new(MemoryChunkCollection::new()))),
        UploadConfig::default().with_max_upload_bytes(100),
    );

    assert!(manager
        .create_upload(&user(), "  ", folder(), 1)
        .await
        .unwrap_err()
        .is_validation());
    assert!(manager
        .create_upload(&user(), "big", folder(), 101)
        .await
        .unwrap_err()
        .is_validation());
    assert!(uploads.is_empty());
}

#[tokio::test]
async fn unknown_assetstore_type_is_a_configuration_error() {
    // Registry without an S3 factory, current assetstore is S3.
    let registry = AdapterRegistry::new().with_factory(
        AssetstoreType::GridFs,
        cairn_upload::backends::GridFsFactory::new(Arc::new(MemoryChunkCollection::new())),
    );
    let h = harness_with(
        registry,
        Some(Assetstore::new("s3", AssetstoreType::S3, json!({"bucket": "b"}))),
    );

    let err = h.manager.create_upload(&user(), "x", folder(), 10).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(h.uploads.is_empty());
}

#[tokio::test]
async fn missing_current_assetstore_is_a_configuration_error() {
    let h = harness_with(
        AdapterRegistry::with_defaults(Arc::new(MemoryChunkCollection::new())),
        None,
    );

    let err = h.manager.create_upload(&user(), "x", folder(), 10).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(h.uploads.is_empty());
}

#[tokio::test]
async fn uploads_keep_their_assetstore_when_current_changes() {
    let h = gridfs_harness();
    let upload = h.manager.create_upload(&user(), "x", folder(), 2).await.unwrap();

    let other = Assetstore::new("other", AssetstoreType::GridFs, json!({}));
    let other_id = other.id.clone();
    h.assetstores.insert_current(other);

    let outcome = h.manager.handle_chunk(&upload.id, Chunk::new(0, bytes(2, 0))).await.unwrap();
    let file = outcome.file().unwrap();
    assert_eq!(file.assetstore_id, upload.assetstore_id);
    assert_ne!(file.assetstore_id, other_id);
}

#[tokio::test]
async fn request_offset_is_idempotent_and_bounded() {
    let h = gridfs_harness();
    let upload = h.manager.create_upload(&user(), "x", folder(), 6).await.unwrap();
    h.manager.handle_chunk(&upload.id, Chunk::new(0, bytes(5, 0))).await.unwrap();

    let first = h.manager.request_offset(&upload.id).await.unwrap();
    let second = h.manager.request_offset(&upload.id).await.unwrap();
    assert_eq!(first, 5);
    assert_eq!(first, second);
    assert!(first <= upload.size);
}

#[tokio::test]
async fn client_resumes_from_backend_offset_after_a_crash() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_with(
        AdapterRegistry::with_defaults(Arc::new(MemoryChunkCollection::new())),
        Some(Assetstore::new(
            "disk",
            AssetstoreType::Filesystem,
            json!({ "root": dir.path() }),
        )),
    );
    let upload = h.manager.create_upload(&user(), "movie", folder(), 9).await.unwrap();
    h.manager.handle_chunk(&upload.id, Chunk::new(0, b"abc".to_vec())).await.unwrap();

    // Bytes reach the disk but the process dies before the record is saved.
    let stored = h.uploads.load(&upload.id).await.unwrap().unwrap();
    let adapter = FilesystemAdapter::new(dir.path()).await.unwrap();
    adapter
        .upload_chunk(stored, Chunk::new(3, b"def".to_vec()))
        .await
        .unwrap();
    assert_eq!(h.uploads.load(&upload.id).await.unwrap().unwrap().received, 3);

    let offset = h.manager.request_offset(&upload.id).await.unwrap();
    assert_eq!(offset, 6);

    let outcome = h
        .manager
        .handle_chunk(&upload.id, Chunk::new(offset, b"ghi".to_vec()))
        .await
        .unwrap();
    let file = outcome.file().unwrap();
    assert_eq!(file.size, 9);
    assert_eq!(
        std::fs::read(adapter.resolve(file).unwrap()).unwrap(),
        b"abcdefghi"
    );
}

#[tokio::test]
async fn cancel_releases_backend_and_drops_record() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_with(
        AdapterRegistry::with_defaults(Arc::new(MemoryChunkCollection::new())),
        Some(Assetstore::new(
            "disk",
            AssetstoreType::Filesystem,
            json!({ "root": dir.path() }),
        )),
    );
    let upload = h.manager.create_upload(&user(), "x", folder(), 4).await.unwrap();
    h.manager.handle_chunk(&upload.id, Chunk::new(0, bytes(2, 0))).await.unwrap();

    h.manager.cancel_upload(&upload.id).await.unwrap();
    assert!(h.manager.load_upload(&upload.id).await.unwrap().is_none());
    let temp_entries = std::fs::read_dir(dir.path().join("temp")).unwrap().count();
    assert_eq!(temp_entries, 0);
}

#[tokio::test]
async fn stale_uploads_lists_untouched_records() {
    let h = gridfs_harness();
    let old = h.manager.create_upload(&user(), "old", folder(), 4).await.unwrap();
    let cutoff = chrono::Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let fresh = h.manager.create_upload(&user(), "fresh", folder(), 4).await.unwrap();

    let stale = h.manager.stale_uploads(cutoff).await.unwrap();
    let ids: Vec<_> = stale.iter().map(|u| u.id.clone()).collect();
    assert!(ids.contains(&old.id));
    assert!(!ids.contains(&fresh.id));
}

/// Adapter that claims more bytes than the upload can hold
struct Overclaiming;

#[async_trait]
impl AssetstoreAdapter for Overclaiming {
    fn kind(&self) -> AssetstoreType {
        AssetstoreType::GridFs
    }

    async fn init_upload(&self, upload: Upload) -> UploadResult<Upload> {
        Ok(upload)
    }

    async fn upload_chunk(&self, mut upload: Upload, chunk: Chunk) -> UploadResult<Upload> {
        upload.received = chunk.offset + chunk.len() + 1;
        Ok(upload)
    }

    async fn request_offset(&self, upload: &Upload) -> UploadResult<u64> {
        Ok(upload.received)
    }

    async fn finalize_upload(&self, _upload: &Upload, file: File) -> UploadResult<File> {
        // No locator: the file factory refuses to save it.
        Ok(file)
    }
}

struct Fixed(Arc<dyn AssetstoreAdapter>);

#[async_trait]
impl AdapterFactory for Fixed {
    async fn build(&self, _assetstore: &Assetstore) -> UploadResult<Arc<dyn AssetstoreAdapter>> {
        Ok(self.0.clone())
    }
}

fn overclaiming_harness() -> Harness {
    harness_with(
        AdapterRegistry::new().with_factory(AssetstoreType::GridFs, Fixed(Arc::new(Overclaiming))),
        Some(Assetstore::new("odd", AssetstoreType::GridFs, json!({}))),
    )
}

#[tokio::test]
async fn adapter_overclaiming_received_is_rejected() {
    let h = overclaiming_harness();
    let upload = h.manager.create_upload(&user(), "x", folder(), 4).await.unwrap();

    let err = h
        .manager
        .handle_chunk(&upload.id, Chunk::new(0, bytes(4, 0)))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(h.uploads.load(&upload.id).await.unwrap().unwrap().received, 0);
}

#[tokio::test]
async fn failed_finalize_rolls_back_the_new_item() {
    let h = overclaiming_harness();
    let upload = h.manager.create_upload(&user(), "x", folder(), 0).await.unwrap();

    let err = h.manager.finalize_upload(&upload.id).await.unwrap_err();
    assert!(err.is_validation());
    assert!(h.files.items().is_empty());
    assert!(h.files.files().is_empty());
    // Still there, so finalize can be retried.
    assert!(h.manager.load_upload(&upload.id).await.unwrap().is_some());
}

#[tokio::test]
async fn backend_state_is_opaque_to_the_record_store() {
    let h = gridfs_harness();
    let upload = h.manager.create_upload(&user(), "x", folder(), 4).await.unwrap();
    assert_ne!(upload.backend, BackendState::empty());
    assert!(upload.backend.as_value().get("chunk_key").is_some());
}

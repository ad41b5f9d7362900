use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use uuid::Uuid;

use super::hex_digest;
use crate::registry::AdapterFactory;
use crate::{
    Assetstore, AssetstoreAdapter, AssetstoreType, BackendState, Chunk, File, Upload, UploadError,
    UploadResult,
};

const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// One stored piece of a file
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDocument {
    /// Groups the documents of one file
    pub key: String,
    /// Position within the file, starting at 0
    pub n: u32,
    pub data: Bytes,
}

/// Document collection holding file chunks, GridFS style.
///
/// `(key, n)` is unique.
#[async_trait]
pub trait ChunkCollection: Send + Sync {
    async fn insert(&self, doc: ChunkDocument) -> UploadResult<()>;

    /// All documents for `key`, ordered by `n`
    async fn find(&self, key: &str) -> UploadResult<Vec<ChunkDocument>>;

    /// Delete every document for `key`, returning how many went
    async fn remove(&self, key: &str) -> UploadResult<usize>;
}

#[derive(Default, Clone)]
pub struct MemoryChunkCollection {
    docs: Arc<RwLock<HashMap<String, BTreeMap<u32, Bytes>>>>,
}

impl MemoryChunkCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct keys with at least one document
    pub fn keys(&self) -> usize {
        self.docs.read().len()
    }
}

#[async_trait]
impl ChunkCollection for MemoryChunkCollection {
    async fn insert(&self, doc: ChunkDocument) -> UploadResult<()> {
        let mut docs = self.docs.write();
        let file = docs.entry(doc.key.clone()).or_default();
        if file.contains_key(&doc.n) {
            return Err(UploadError::backend_msg(format!(
                "duplicate chunk document {}#{}",
                doc.key, doc.n
            )));
        }
        file.insert(doc.n, doc.data);
        Ok(())
    }

    async fn find(&self, key: &str) -> UploadResult<Vec<ChunkDocument>> {
        Ok(self
            .docs
            .read()
            .get(key)
            .map(|file| {
                file.iter()
                    .map(|(n, data)| ChunkDocument {
                        key: key.to_string(),
                        n: *n,
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove(&self, key: &str) -> UploadResult<usize> {
        Ok(self.docs.write().remove(key).map(|file| file.len()).unwrap_or(0))
    }
}

/// Settings of a GridFS-style assetstore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridFsSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkKeyState {
    chunk_key: String,
}

/// Stores uploads as numbered documents of at most `chunk_size` bytes.
pub struct GridFsAdapter {
    chunks: Arc<dyn ChunkCollection>,
    chunk_size: usize,
}

impl GridFsAdapter {
    pub fn new(chunks: Arc<dyn ChunkCollection>, chunk_size: usize) -> UploadResult<Self> {
        if chunk_size == 0 {
            return Err(UploadError::configuration("GridFS chunk_size must be positive"));
        }
        Ok(Self { chunks, chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Reassemble a finalized file.
    pub async fn read(&self, file: &File) -> UploadResult<Bytes> {
        let state: ChunkKeyState = file.locator.decode()?;
        let docs = self.chunks.find(&state.chunk_key).await?;
        let mut out = BytesMut::with_capacity(file.size as usize);
        for doc in docs {
            out.extend_from_slice(&doc.data);
        }
        Ok(out.freeze())
    }

    fn key(upload: &Upload) -> UploadResult<String> {
        let state: ChunkKeyState = upload.backend.decode()?;
        Ok(state.chunk_key)
    }

    fn stored_len(docs: &[ChunkDocument]) -> u64 {
        docs.iter().map(|d| d.data.len() as u64).sum()
    }
}

#[async_trait]
impl AssetstoreAdapter for GridFsAdapter {
    fn kind(&self) -> AssetstoreType {
        AssetstoreType::GridFs
    }

    async fn init_upload(&self, mut upload: Upload) -> UploadResult<Upload> {
        let chunk_key = Uuid::new_v4().simple().to_string();
        upload.backend = BackendState::encode(&ChunkKeyState { chunk_key })?;
        Ok(upload)
    }

    async fn upload_chunk(&self, mut upload: Upload, chunk: Chunk) -> UploadResult<Upload> {
        let key = Self::key(&upload)?;
        let docs = self.chunks.find(&key).await?;
        let stored = Self::stored_len(&docs);
        if stored != chunk.offset {
            return Err(UploadError::validation(format!(
                "Chunk offset {} does not match stored offset {}",
                chunk.offset, stored
            )));
        }

        let mut n = docs.last().map(|d| d.n + 1).unwrap_or(0);
        let mut start = 0;
        while start < chunk.data.len() {
            let end = (start + self.chunk_size).min(chunk.data.len());
            self.chunks
                .insert(ChunkDocument {
                    key: key.clone(),
                    n,
                    data: chunk.data.slice(start..end),
                })
                .await?;
            n += 1;
            start = end;
        }

        upload.received = stored + chunk.len();
        Ok(upload)
    }

    async fn request_offset(&self, upload: &Upload) -> UploadResult<u64> {
        let docs = self.chunks.find(&Self::key(upload)?).await?;
        Ok(Self::stored_len(&docs))
    }

    async fn finalize_upload(&self, upload: &Upload, mut file: File) -> UploadResult<File> {
        let chunk_key = Self::key(upload)?;
        let docs = self.chunks.find(&chunk_key).await?;
        let stored = Self::stored_len(&docs);
        if stored != upload.size {
            return Err(UploadError::validation(format!(
                "Stored {} bytes but upload declares {}",
                stored, upload.size
            )));
        }

        let mut hasher = Sha512::new();
        for doc in &docs {
            hasher.update(&doc.data);
        }

        file.sha512 = Some(hex_digest(hasher));
        file.locator = BackendState::encode(&ChunkKeyState { chunk_key })?;
        Ok(file)
    }

    async fn cancel_upload(&self, upload: &Upload) -> UploadResult<()> {
        let removed = self.chunks.remove(&Self::key(upload)?).await?;
        tracing::debug!(upload_id = %upload.id, removed, "dropped chunk documents");
        Ok(())
    }
}

/// Builds [`GridFsAdapter`]s over a shared [`ChunkCollection`]
#[derive(Clone)]
pub struct GridFsFactory {
    chunks: Arc<dyn ChunkCollection>,
}

impl GridFsFactory {
    pub fn new(chunks: Arc<dyn ChunkCollection>) -> Self {
        Self { chunks }
    }
}

#[async_trait]
impl AdapterFactory for GridFsFactory {
    async fn build(&self, assetstore: &Assetstore) -> UploadResult<Arc<dyn AssetstoreAdapter>> {
        let settings: GridFsSettings = if assetstore.settings.is_null() {
            GridFsSettings {
                chunk_size: DEFAULT_CHUNK_SIZE,
            }
        } else {
            assetstore.settings()?
        };
        Ok(Arc::new(GridFsAdapter::new(self.chunks.clone(), settings.chunk_size)?))
    }
}

//! In-memory collaborators for tests, tooling and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::store::validate_upload;
use crate::{
    Assetstore, AssetstoreId, AssetstoreSource, BackendState, File, FileFactory, FileId, FolderId,
    Item, ItemId, Upload, UploadError, UploadId, UploadResult, UploadStore, UserId,
};

/// Upload records held in a map
#[derive(Default, Clone)]
pub struct MemoryUploadStore {
    records: Arc<RwLock<HashMap<UploadId, Upload>>>,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn load(&self, id: &UploadId) -> UploadResult<Option<Upload>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn save(&self, mut upload: Upload) -> UploadResult<Upload> {
        validate_upload(&upload)?;
        upload.updated = Utc::now();
        self.records.write().insert(upload.id.clone(), upload.clone());
        Ok(upload)
    }

    async fn remove(&self, id: &UploadId) -> UploadResult<()> {
        self.records.write().remove(id);
        Ok(())
    }

    async fn updated_before(&self, cutoff: DateTime<Utc>) -> UploadResult<Vec<Upload>> {
        let mut stale: Vec<Upload> = self
            .records
            .read()
            .values()
            .filter(|upload| upload.updated < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|upload| upload.updated);
        Ok(stale)
    }
}

#[derive(Default)]
struct AssetstoreTable {
    stores: HashMap<AssetstoreId, Assetstore>,
    current: Option<AssetstoreId>,
}

/// Assetstore configuration held in memory
#[derive(Default, Clone)]
pub struct MemoryAssetstores {
    inner: Arc<RwLock<AssetstoreTable>>,
}

#[derive(Deserialize)]
struct AssetstoreCatalog {
    #[serde(default)]
    current: Option<String>,
    assetstores: Vec<Assetstore>,
}

impl MemoryAssetstores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalogue of the form
    /// `{"current": "<id or name>", "assetstores": [{"id", "name", "type", "settings"}]}`.
    pub fn from_json(json: &str) -> UploadResult<Self> {
        let catalog: AssetstoreCatalog = serde_json::from_str(json)
            .map_err(|e| UploadError::configuration(format!("Invalid assetstore catalogue: {e}")))?;

        let this = Self::new();
        for assetstore in catalog.assetstores {
            this.insert(assetstore);
        }
        if let Some(current) = catalog.current {
            let id = this
                .find(&current)
                .ok_or_else(|| {
                    UploadError::configuration(format!("Current assetstore {current} is not defined"))
                })?
                .id;
            this.set_current(&id)?;
        }
        Ok(this)
    }

    pub fn insert(&self, assetstore: Assetstore) {
        self.inner
            .write()
            .stores
            .insert(assetstore.id.clone(), assetstore);
    }

    /// Insert and mark as current in one step
    pub fn insert_current(&self, assetstore: Assetstore) {
        let mut table = self.inner.write();
        table.current = Some(assetstore.id.clone());
        table.stores.insert(assetstore.id.clone(), assetstore);
    }

    pub fn set_current(&self, id: &AssetstoreId) -> UploadResult<()> {
        let mut table = self.inner.write();
        if !table.stores.contains_key(id) {
            return Err(UploadError::configuration(format!("Unknown assetstore: {id}")));
        }
        table.current = Some(id.clone());
        Ok(())
    }

    pub fn clear_current(&self) {
        self.inner.write().current = None;
    }

    pub fn all(&self) -> Vec<Assetstore> {
        self.inner.read().stores.values().cloned().collect()
    }

    fn find(&self, id_or_name: &str) -> Option<Assetstore> {
        self.inner
            .read()
            .stores
            .values()
            .find(|a| a.id.as_str() == id_or_name || a.name == id_or_name)
            .cloned()
    }
}

#[async_trait]
impl AssetstoreSource for MemoryAssetstores {
    async fn current(&self) -> UploadResult<Option<Assetstore>> {
        let table = self.inner.read();
        Ok(table
            .current
            .as_ref()
            .and_then(|id| table.stores.get(id))
            .cloned())
    }

    async fn load(&self, id: &AssetstoreId) -> UploadResult<Assetstore> {
        self.inner
            .read()
            .stores
            .get(id)
            .cloned()
            .ok_or_else(|| UploadError::configuration(format!("Unknown assetstore: {id}")))
    }
}

/// Items and files held in memory
#[derive(Default, Clone)]
pub struct MemoryFileFactory {
    items: Arc<RwLock<HashMap<ItemId, Item>>>,
    files: Arc<RwLock<HashMap<FileId, File>>>,
}

impl MemoryFileFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<Item> {
        self.items.read().values().cloned().collect()
    }

    pub fn files(&self) -> Vec<File> {
        self.files.read().values().cloned().collect()
    }

    pub fn file(&self, id: &FileId) -> Option<File> {
        self.files.read().get(id).cloned()
    }
}

#[async_trait]
impl FileFactory for MemoryFileFactory {
    async fn create_item(
        &self,
        name: &str,
        creator: &UserId,
        folder: &FolderId,
    ) -> UploadResult<Item> {
        let item = Item {
            id: ItemId::new(),
            name: name.to_string(),
            folder_id: folder.clone(),
            creator_id: creator.clone(),
            created: Utc::now(),
        };
        self.items.write().insert(item.id.clone(), item.clone());
        Ok(item)
    }

    async fn remove_item(&self, item: &ItemId) -> UploadResult<()> {
        self.items.write().remove(item);
        Ok(())
    }

    async fn create_file(
        &self,
        item: &ItemId,
        name: &str,
        size: u64,
        creator: &UserId,
        assetstore: &Assetstore,
    ) -> UploadResult<File> {
        Ok(File {
            id: FileId::new(),
            item_id: item.clone(),
            name: name.to_string(),
            size,
            assetstore_id: assetstore.id.clone(),
            creator_id: creator.clone(),
            created: Utc::now(),
            sha512: None,
            locator: BackendState::empty(),
        })
    }

    async fn save_file(&self, file: File) -> UploadResult<File> {
        if file.locator.is_empty() {
            return Err(UploadError::validation(format!(
                "File {} has no storage locator",
                file.id
            )));
        }
        self.files.write().insert(file.id.clone(), file.clone());
        Ok(file)
    }

    async fn load_file(&self, id: &FileId) -> UploadResult<Option<File>> {
        Ok(self.file(id))
    }
}

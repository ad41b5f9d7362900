use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::backends::{ChunkCollection, FilesystemFactory, GridFsFactory, S3Factory};
use crate::{Assetstore, AssetstoreAdapter, AssetstoreId, AssetstoreType, UploadError, UploadResult};

/// Builds the adapter for one assetstore of a given type
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn build(&self, assetstore: &Assetstore) -> UploadResult<Arc<dyn AssetstoreAdapter>>;
}

/// Maps assetstore types to adapter factories.
///
/// Adapters are built on first use and cached per assetstore id.
pub struct AdapterRegistry {
    factories: HashMap<AssetstoreType, Arc<dyn AdapterFactory>>,
    cache: DashMap<AssetstoreId, Arc<dyn AssetstoreAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            cache: DashMap::new(),
        }
    }

    /// Registry with every built-in backend. GridFS-style assetstores store
    /// their chunk documents in `chunks`.
    pub fn with_defaults(chunks: Arc<dyn ChunkCollection>) -> Self {
        Self::new()
            .with_factory(AssetstoreType::Filesystem, FilesystemFactory)
            .with_factory(AssetstoreType::S3, S3Factory::default())
            .with_factory(AssetstoreType::GridFs, GridFsFactory::new(chunks))
    }

    /// Register a factory for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: AssetstoreType, factory: Arc<dyn AdapterFactory>) {
        self.factories.insert(kind, factory);
    }

    pub fn with_factory<F: AdapterFactory + 'static>(
        mut self,
        kind: AssetstoreType,
        factory: F,
    ) -> Self {
        self.register(kind, Arc::new(factory));
        self
    }

    /// Startup check: every known assetstore type has a factory.
    pub fn ensure_complete(&self) -> UploadResult<()> {
        let missing: Vec<&str> = AssetstoreType::ALL
            .iter()
            .filter(|kind| !self.factories.contains_key(kind))
            .map(|kind| kind.as_str())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(UploadError::configuration(format!(
                "No adapter registered for assetstore type(s): {}",
                missing.join(", ")
            )))
        }
    }

    /// Startup check: every configured assetstore resolves to an adapter.
    pub async fn validate(&self, assetstores: &[Assetstore]) -> UploadResult<()> {
        for assetstore in assetstores {
            self.resolve(assetstore).await?;
        }
        Ok(())
    }

    /// Adapter for `assetstore`; unknown types fail here, not later.
    pub async fn resolve(
        &self,
        assetstore: &Assetstore,
    ) -> UploadResult<Arc<dyn AssetstoreAdapter>> {
        if let Some(adapter) = self.cache.get(&assetstore.id) {
            if adapter.kind() == assetstore.kind {
                return Ok(Arc::clone(adapter.value()));
            }
        }

        let factory = self.factories.get(&assetstore.kind).ok_or_else(|| {
            UploadError::configuration(format!(
                "No adapter registered for assetstore type: {}",
                assetstore.kind
            ))
        })?;

        let adapter = factory.build(assetstore).await?;
        tracing::debug!(
            assetstore_id = %assetstore.id,
            kind = %assetstore.kind,
            "built assetstore adapter"
        );
        self.cache.insert(assetstore.id.clone(), adapter.clone());
        Ok(adapter)
    }

    /// Drop a cached adapter, e.g. after its settings changed.
    pub fn evict(&self, id: &AssetstoreId) {
        self.cache.remove(id);
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryChunkCollection;
    use serde_json::json;

    #[test]
    fn empty_registry_is_incomplete() {
        let err = AdapterRegistry::new().ensure_complete().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("filesystem"));
    }

    #[test]
    fn defaults_cover_every_type() {
        let registry = AdapterRegistry::with_defaults(Arc::new(MemoryChunkCollection::new()));
        assert!(registry.ensure_complete().is_ok());
    }

    #[tokio::test]
    async fn unregistered_type_fails_at_resolution() {
        let registry = AdapterRegistry::new().with_factory(
            AssetstoreType::GridFs,
            GridFsFactory::new(Arc::new(MemoryChunkCollection::new())),
        );
        let s3 = Assetstore::new("s3", AssetstoreType::S3, json!({"bucket": "b"}));

        let err = registry.resolve(&s3).await.err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn adapters_are_cached_per_assetstore() {
        let registry = AdapterRegistry::with_defaults(Arc::new(MemoryChunkCollection::new()));
        let store = Assetstore::new("chunks", AssetstoreType::GridFs, json!({}));

        let first = registry.resolve(&store).await.unwrap();
        let second = registry.resolve(&store).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        registry.evict(&store.id);
        let third = registry.resolve(&store).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn validate_surfaces_bad_settings() {
        let registry = AdapterRegistry::with_defaults(Arc::new(MemoryChunkCollection::new()));
        let broken = Assetstore::new("fs", AssetstoreType::Filesystem, json!({"rooot": "/tmp"}));

        let err = registry.validate(&[broken]).await.unwrap_err();
        assert!(err.is_configuration());
    }
}

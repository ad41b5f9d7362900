//! # cairn-upload: resumable chunked uploads
//!
//! Accepts a file of declared size as an ordered sequence of byte chunks,
//! spread over as many calls as the client needs (including after a crash
//! and reconnect), and turns a complete upload into an immutable [`File`]
//! exactly once.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  GuardedUploads  │  ← access levels, checked before dispatch
//! ├──────────────────┤
//! │  UploadManager   │  ← offsets, invariants, finalize, per-upload locks
//! ├──────────────────┤
//! │ AdapterRegistry  │  ← assetstore type → adapter
//! ├──────────────────┤
//! │ AssetstoreAdapter│  ← filesystem / S3 / GridFS-style chunks
//! └──────────────────┘
//! ```
//!
//! Upload records, assetstore configuration and item/file creation are
//! collaborators behind [`UploadStore`], [`AssetstoreSource`] and
//! [`FileFactory`]; in-memory versions live in [`memory`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cairn_upload::prelude::*;
//! use cairn_upload::backends::MemoryChunkCollection;
//! use cairn_upload::memory::{MemoryAssetstores, MemoryFileFactory, MemoryUploadStore};
//!
//! # async fn run() -> UploadResult<()> {
//! let assetstores = MemoryAssetstores::new();
//! assetstores.insert_current(Assetstore::new(
//!     "local",
//!     AssetstoreType::Filesystem,
//!     serde_json::json!({ "root": "/var/lib/cairn" }),
//! ));
//!
//! let registry = AdapterRegistry::with_defaults(Arc::new(MemoryChunkCollection::new()));
//! registry.ensure_complete()?;
//!
//! let manager = UploadManager::new(
//!     MemoryUploadStore::new(),
//!     assetstores,
//!     MemoryFileFactory::new(),
//!     Arc::new(registry),
//!     UploadConfig::default(),
//! );
//!
//! let user = UserId::from("user-1");
//! let upload = manager
//!     .create_upload(&user, "hello.txt", Parent::Folder(FolderId::from("f1")), 5)
//!     .await?;
//! let outcome = manager.handle_chunk(&upload.id, Chunk::new(0, b"hello".to_vec())).await?;
//! assert!(outcome.is_complete());
//! # Ok(())
//! # }
//! ```

mod adapter;
pub mod backends;
mod config;
mod error;
mod guarded;
mod lock;
mod manager;
pub mod memory;
mod registry;
mod store;
mod types;

pub use adapter::AssetstoreAdapter;
pub use config::UploadConfig;
pub use error::{ErrorKind, UploadError, UploadResult};
pub use guarded::{
    default_policy, GuardedUploads, CANCEL_UPLOAD, CREATE_UPLOAD, FINALIZE_UPLOAD, HANDLE_CHUNK,
    REQUEST_OFFSET, STALE_UPLOADS,
};
pub use lock::{UploadLockGuard, UploadLocks};
pub use manager::UploadManager;
pub use registry::{AdapterFactory, AdapterRegistry};
pub use store::{validate_upload, AssetstoreSource, FileFactory, UploadStore};
pub use types::{
    Assetstore, AssetstoreId, AssetstoreType, BackendState, Chunk, ChunkOutcome, File, FileId,
    FolderId, Item, ItemId, Parent, ParentType, Upload, UploadId, UploadState, UserId,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AdapterRegistry, Assetstore, AssetstoreType, Chunk, ChunkOutcome, File, FolderId, ItemId,
        Parent, Upload, UploadConfig, UploadError, UploadManager, UploadResult, UserId,
    };
}

use cairn_core::ConfigSnapshot;

/// Configuration for upload handling
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Absolute max size accepted by `create_upload` (safety guard)
    pub max_upload_bytes: u64,

    /// Largest single chunk accepted by `handle_chunk`
    pub max_chunk_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024 * 1024, // 50GB
            max_chunk_bytes: 64 * 1024 * 1024,         // 64MB
        }
    }
}

impl UploadConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `upload.max_upload_bytes` / `upload.max_chunk_bytes`, keeping
    /// defaults for anything missing or unparsable.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        let defaults = Self::default();
        Self {
            max_upload_bytes: snapshot
                .get_u64("upload.max_upload_bytes")
                .unwrap_or(defaults.max_upload_bytes),
            max_chunk_bytes: snapshot
                .get_u64("upload.max_chunk_bytes")
                .unwrap_or(defaults.max_chunk_bytes),
        }
    }

    /// Set max upload size
    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Set max chunk size
    pub fn with_max_chunk_bytes(mut self, bytes: u64) -> Self {
        self.max_chunk_bytes = bytes;
        self
    }
}

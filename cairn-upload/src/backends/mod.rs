//! Built-in assetstore adapters.

mod filesystem;
mod gridfs;
mod s3;

pub use filesystem::{FilesystemAdapter, FilesystemFactory, FilesystemSettings};
pub use gridfs::{
    ChunkCollection, ChunkDocument, GridFsAdapter, GridFsFactory, GridFsSettings,
    MemoryChunkCollection,
};
pub use s3::{
    AwsMultipartClient, MultipartClient, S3Adapter, S3Factory, S3Settings, UploadedPart,
};

use sha2::{Digest, Sha512};

/// Hex-encoded SHA-512 of everything fed to `hasher`.
pub(crate) fn hex_digest(hasher: Sha512) -> String {
    hex::encode(hasher.finalize())
}

/// `prefix/ab/cd/abcdef...` style fan-out used for stored objects.
pub(crate) fn fan_out(name: &str) -> String {
    if name.len() < 4 || !name.is_ascii() {
        return name.to_string();
    }
    format!("{}/{}/{}", &name[0..2], &name[2..4], name)
}

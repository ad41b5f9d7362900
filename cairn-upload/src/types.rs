use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{UploadError, UploadResult};

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random id
            pub fn new() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            /// Create from existing string
            pub fn from_string(id: String) -> Self {
                Self(id)
            }

            /// Get the inner string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(
    /// Identifier of an in-flight upload record
    UploadId
);
record_id!(
    /// Identifier of a configured assetstore
    AssetstoreId
);
record_id!(
    /// Identifier of the uploading principal
    UserId
);
record_id!(FolderId);
record_id!(ItemId);
record_id!(FileId);

/// Kind of container an upload lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentType {
    Folder,
    Item,
}

impl ParentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentType::Folder => "folder",
            ParentType::Item => "item",
        }
    }
}

impl FromStr for ParentType {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "folder" => Ok(ParentType::Folder),
            "item" => Ok(ParentType::Item),
            other => Err(UploadError::validation(format!(
                "Invalid parent type: {other} (must be folder or item)"
            ))),
        }
    }
}

/// Destination of an upload: a folder (a new item is created on
/// finalize) or an existing item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "parentType", content = "parentId", rename_all = "lowercase")]
pub enum Parent {
    Folder(FolderId),
    Item(ItemId),
}

impl Parent {
    /// Build from the loose `(type, id)` pair a transport usually receives.
    pub fn parse(parent_type: &str, parent_id: &str) -> UploadResult<Self> {
        Ok(match parent_type.parse::<ParentType>()? {
            ParentType::Folder => Parent::Folder(FolderId::from(parent_id)),
            ParentType::Item => Parent::Item(ItemId::from(parent_id)),
        })
    }

    pub fn parent_type(&self) -> ParentType {
        match self {
            Parent::Folder(_) => ParentType::Folder,
            Parent::Item(_) => ParentType::Item,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Parent::Folder(id) => id.as_str(),
            Parent::Item(id) => id.as_str(),
        }
    }
}

/// Backend-owned fields embedded in an [`Upload`] or [`File`].
///
/// Only the adapter that wrote it may interpret the contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendState(serde_json::Value);

impl BackendState {
    pub fn empty() -> Self {
        Self(serde_json::Value::Null)
    }

    pub fn encode<T: Serialize>(state: &T) -> UploadResult<Self> {
        Ok(Self(serde_json::to_value(state)?))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> UploadResult<T> {
        if self.is_empty() {
            return Err(UploadError::backend_msg(
                "record carries no backend state for this assetstore",
            ));
        }
        Ok(serde_json::from_value(self.0.clone())?)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Where an upload is in its lifecycle. A finalized upload has no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Nothing received yet and bytes are expected.
    Created,
    /// Some but not all bytes received.
    InProgress,
    /// Every byte received; waiting to become a [`File`].
    Completing,
}

/// Temporary record of an in-flight transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: UploadId,
    pub name: String,
    pub size: u64,
    pub received: u64,
    pub assetstore_id: AssetstoreId,
    pub parent: Parent,
    pub user_id: UserId,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub backend: BackendState,
    /// File being committed for this upload, set just before its save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
}

impl Upload {
    pub fn new(
        name: String,
        size: u64,
        parent: Parent,
        user_id: UserId,
        assetstore_id: AssetstoreId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: UploadId::new(),
            name,
            size,
            received: 0,
            assetstore_id,
            parent,
            user_id,
            created: now,
            updated: now,
            backend: BackendState::empty(),
            file_id: None,
        }
    }

    pub fn state(&self) -> UploadState {
        if self.received >= self.size {
            UploadState::Completing
        } else if self.received == 0 {
            UploadState::Created
        } else {
            UploadState::InProgress
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.size
    }

    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.received)
    }
}

/// Storage technology behind an assetstore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetstoreType {
    Filesystem,
    S3,
    GridFs,
}

impl AssetstoreType {
    pub const ALL: [AssetstoreType; 3] = [
        AssetstoreType::Filesystem,
        AssetstoreType::S3,
        AssetstoreType::GridFs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetstoreType::Filesystem => "filesystem",
            AssetstoreType::S3 => "s3",
            AssetstoreType::GridFs => "gridfs",
        }
    }
}

impl std::fmt::Display for AssetstoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetstoreType {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetstoreType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UploadError::configuration(format!("Unknown assetstore type: {s}")))
    }
}

/// One configured storage backend instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assetstore {
    pub id: AssetstoreId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AssetstoreType,
    /// Backend settings, parsed by the adapter factory for `kind`.
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl Assetstore {
    pub fn new<S: Into<String>>(
        name: S,
        kind: AssetstoreType,
        settings: serde_json::Value,
    ) -> Self {
        Self {
            id: AssetstoreId::new(),
            name: name.into(),
            kind,
            settings,
        }
    }

    /// Parse `settings` into the backend's own settings type.
    pub fn settings<T: DeserializeOwned>(&self) -> UploadResult<T> {
        serde_json::from_value(self.settings.clone()).map_err(|e| {
            UploadError::configuration(format!(
                "Invalid settings for {} assetstore {}: {e}",
                self.kind, self.name
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub folder_id: FolderId,
    pub creator_id: UserId,
    pub created: DateTime<Utc>,
}

/// Permanent record of a completed upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub id: FileId,
    pub item_id: ItemId,
    pub name: String,
    pub size: u64,
    pub assetstore_id: AssetstoreId,
    pub creator_id: UserId,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub sha512: Option<String>,
    /// Storage locator written by the adapter at finalize time.
    #[serde(default)]
    pub locator: BackendState,
}

/// One contiguous byte range submitted by the client.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position of the first byte within the file.
    pub offset: u64,
    pub data: Bytes,
}

impl Chunk {
    pub fn new(offset: u64, data: impl Into<Bytes>) -> Self {
        Self {
            offset,
            data: data.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.len())
    }
}

/// Result of handling a chunk
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    /// Chunk accepted, more bytes expected
    Progress(Upload),
    /// Last byte accepted and the upload was finalized
    Complete(File),
}

impl ChunkOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, ChunkOutcome::Complete(_))
    }

    pub fn upload(&self) -> Option<&Upload> {
        match self {
            ChunkOutcome::Progress(upload) => Some(upload),
            ChunkOutcome::Complete(_) => None,
        }
    }

    pub fn file(&self) -> Option<&File> {
        match self {
            ChunkOutcome::Progress(_) => None,
            ChunkOutcome::Complete(file) => Some(file),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(size: u64, received: u64) -> Upload {
        let mut upload = Upload::new(
            "a.bin".to_string(),
            size,
            Parent::Folder(FolderId::new()),
            UserId::new(),
            AssetstoreId::new(),
        );
        upload.received = received;
        upload
    }

    #[test]
    fn state_follows_received_bytes() {
        assert_eq!(upload(10, 0).state(), UploadState::Created);
        assert_eq!(upload(10, 4).state(), UploadState::InProgress);
        assert_eq!(upload(10, 10).state(), UploadState::Completing);
        assert_eq!(upload(0, 0).state(), UploadState::Completing);
    }

    #[test]
    fn parent_type_is_case_insensitive() {
        assert_eq!("Folder".parse::<ParentType>().unwrap(), ParentType::Folder);
        assert_eq!(
            Parent::parse("ITEM", "abc").unwrap(),
            Parent::Item(ItemId::from("abc"))
        );
        assert!(Parent::parse("collection", "abc").unwrap_err().is_validation());
    }

    #[test]
    fn unknown_assetstore_type_is_a_configuration_error() {
        assert_eq!("GridFS".parse::<AssetstoreType>().unwrap(), AssetstoreType::GridFs);
        assert!("ftp".parse::<AssetstoreType>().unwrap_err().is_configuration());
    }

    #[test]
    fn parent_serializes_as_type_and_id() {
        let value = serde_json::to_value(Parent::Item(ItemId::from("i1"))).unwrap();
        assert_eq!(value, serde_json::json!({ "parentType": "item", "parentId": "i1" }));
    }

    #[test]
    fn empty_backend_state_does_not_decode() {
        #[derive(Debug, Deserialize)]
        struct Anything {
            #[allow(dead_code)]
            path: String,
        }
        assert!(BackendState::empty().decode::<Anything>().unwrap_err().is_backend());
    }
}

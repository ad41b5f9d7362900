use std::sync::Arc;

use cairn_core::{AccessLevel, AccessPolicy, RequestContext};
use chrono::{DateTime, Utc};

use crate::{
    Chunk, ChunkOutcome, File, Parent, Upload, UploadError, UploadId, UploadManager, UploadResult,
    UserId,
};

pub const CREATE_UPLOAD: &str = "upload.create";
pub const HANDLE_CHUNK: &str = "upload.chunk";
pub const REQUEST_OFFSET: &str = "upload.offset";
pub const FINALIZE_UPLOAD: &str = "upload.finalize";
pub const CANCEL_UPLOAD: &str = "upload.cancel";
pub const STALE_UPLOADS: &str = "upload.stale";

/// Default access levels for the upload operations.
pub fn default_policy() -> AccessPolicy {
    AccessPolicy::new()
        .with(CREATE_UPLOAD, AccessLevel::AuthenticatedUser)
        .with(HANDLE_CHUNK, AccessLevel::AuthenticatedUser)
        .with(REQUEST_OFFSET, AccessLevel::AuthenticatedUser)
        .with(FINALIZE_UPLOAD, AccessLevel::AuthenticatedUser)
        .with(CANCEL_UPLOAD, AccessLevel::AuthenticatedUser)
        .with(STALE_UPLOADS, AccessLevel::Admin)
}

/// [`UploadManager`] behind an access check.
///
/// The policy is consulted before the operation runs; the manager itself
/// stays unaware of who is calling beyond the uploading user's id.
#[derive(Clone)]
pub struct GuardedUploads {
    manager: Arc<UploadManager>,
    policy: AccessPolicy,
}

impl GuardedUploads {
    pub fn new(manager: Arc<UploadManager>) -> Self {
        Self {
            manager,
            policy: default_policy(),
        }
    }

    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn manager(&self) -> &UploadManager {
        &self.manager
    }

    fn check(&self, operation: &str, ctx: &RequestContext) -> UploadResult<()> {
        self.policy.check(operation, ctx).map_err(UploadError::from)
    }

    pub async fn create_upload(
        &self,
        ctx: &RequestContext,
        name: &str,
        parent: Parent,
        size: u64,
    ) -> UploadResult<Upload> {
        self.check(CREATE_UPLOAD, ctx)?;
        let user = ctx
            .principal
            .as_ref()
            .map(|p| UserId::from(p.id.as_str()))
            .ok_or_else(|| UploadError::from(cairn_core::AccessError::NotAuthenticated))?;
        self.manager.create_upload(&user, name, parent, size).await
    }

    pub async fn handle_chunk(
        &self,
        ctx: &RequestContext,
        id: &UploadId,
        chunk: Chunk,
    ) -> UploadResult<ChunkOutcome> {
        self.check(HANDLE_CHUNK, ctx)?;
        self.manager.handle_chunk(id, chunk).await
    }

    pub async fn request_offset(&self, ctx: &RequestContext, id: &UploadId) -> UploadResult<u64> {
        self.check(REQUEST_OFFSET, ctx)?;
        self.manager.request_offset(id).await
    }

    pub async fn finalize_upload(&self, ctx: &RequestContext, id: &UploadId) -> UploadResult<File> {
        self.check(FINALIZE_UPLOAD, ctx)?;
        self.manager.finalize_upload(id).await
    }

    pub async fn cancel_upload(&self, ctx: &RequestContext, id: &UploadId) -> UploadResult<()> {
        self.check(CANCEL_UPLOAD, ctx)?;
        self.manager.cancel_upload(id).await
    }

    pub async fn stale_uploads(
        &self,
        ctx: &RequestContext,
        older_than: DateTime<Utc>,
    ) -> UploadResult<Vec<Upload>> {
        self.check(STALE_UPLOADS, ctx)?;
        self.manager.stale_uploads(older_than).await
    }
}

use std::sync::Arc;

use cairn_core::{AccessLevel, Principal, RequestContext, Token};
use cairn_upload::backends::MemoryChunkCollection;
use cairn_upload::memory::{MemoryAssetstores, MemoryFileFactory, MemoryUploadStore};
use cairn_upload::{
    default_policy, AdapterRegistry, Assetstore, AssetstoreType, Chunk, ErrorKind, FolderId,
    GuardedUploads, Parent, UploadConfig, UploadManager, CREATE_UPLOAD,
};
use serde_json::json;

fn guarded() -> GuardedUploads {
    let assetstores = MemoryAssetstores::new();
    assetstores.insert_current(Assetstore::new("chunks", AssetstoreType::GridFs, json!({})));
    let manager = UploadManager::new(
        MemoryUploadStore::new(),
        assetstores,
        MemoryFileFactory::new(),
        Arc::new(AdapterRegistry::with_defaults(Arc::new(MemoryChunkCollection::new()))),
        UploadConfig::default(),
    );
    GuardedUploads::new(Arc::new(manager))
}

fn folder() -> Parent {
    Parent::Folder(FolderId::from("folder-1"))
}

fn alice() -> RequestContext {
    RequestContext::for_principal(Principal::user("u-alice", "alice"))
}

#[tokio::test]
async fn anonymous_callers_cannot_upload() {
    let uploads = guarded();
    let err = uploads
        .create_upload(&RequestContext::anonymous(), "x", folder(), 3)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Access);
}

#[tokio::test]
async fn authenticated_user_uploads_as_themselves() {
    let uploads = guarded();
    let ctx = alice();
    let upload = uploads.create_upload(&ctx, "x", folder(), 3).await.unwrap();
    assert_eq!(upload.user_id.as_str(), "u-alice");

    assert_eq!(uploads.request_offset(&ctx, &upload.id).await.unwrap(), 0);
    let outcome = uploads
        .handle_chunk(&ctx, &upload.id, Chunk::new(0, b"abc".to_vec()))
        .await
        .unwrap();
    assert!(outcome.is_complete());
}

#[tokio::test]
async fn stale_listing_needs_an_admin() {
    let uploads = guarded();
    let err = uploads
        .stale_uploads(&alice(), chrono::Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Access);

    let admin = RequestContext::for_principal(Principal::admin("u-root", "root"));
    assert!(uploads
        .stale_uploads(&admin, chrono::Utc::now())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn custom_policy_can_open_up_offsets_to_tokens() {
    let policy = default_policy().with(cairn_upload::REQUEST_OFFSET, AccessLevel::TokenOnly);
    let uploads = guarded().with_policy(policy);

    let upload = uploads.create_upload(&alice(), "x", folder(), 3).await.unwrap();
    let token_only = RequestContext::anonymous().with_token(Token::new("t-1"));
    assert_eq!(uploads.request_offset(&token_only, &upload.id).await.unwrap(), 0);

    // Chunks still require a logged-in user.
    let err = uploads
        .handle_chunk(&token_only, &upload.id, Chunk::new(0, b"abc".to_vec()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Access);
}

#[tokio::test]
async fn operations_missing_from_the_policy_are_refused() {
    let policy = default_policy();
    assert!(policy.level(CREATE_UPLOAD).is_some());

    let uploads = guarded().with_policy(cairn_core::AccessPolicy::new());
    let err = uploads
        .create_upload(&alice(), "x", folder(), 3)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Access);
}

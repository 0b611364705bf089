// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blob gateway.
//!
//! Stores record images under owner-scoped keys of the form
//! `{owner_id}/{random}.{ext}` and resolves them to public addresses.

use std::sync::Arc;

use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::auth::Session;
use crate::backend::ObjectBackend;
use crate::error::{RosterError, RosterResult};
use crate::models::AssetUpload;

/// Gateway to the image bucket.
pub struct BlobGateway<T> {
    backend: Arc<T>,
    bucket: String,
}

impl<T> Clone for BlobGateway<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            bucket: self.bucket.clone(),
        }
    }
}

impl<T: ObjectBackend> BlobGateway<T> {
    pub fn new(backend: Arc<T>, bucket: impl Into<String>) -> Self {
        Self {
            backend,
            bucket: bucket.into(),
        }
    }

    /// Upload an image and return its storage key.
    ///
    /// The key is prefixed by the session's user ID and never collides with
    /// an existing object.
    pub async fn upload(&self, session: &Session, file: AssetUpload) -> RosterResult<String> {
        let key = object_key(&session.user_id, file.extension());
        let content_type = file.resolved_content_type();

        let stored = self
            .backend
            .upload(session, &self.bucket, &key, file.bytes, &content_type)
            .await
            .map_err(|e| RosterError::Storage(e.to_string()))?;

        debug!(user_id = %session.user_id, key = %stored, content_type = %content_type, "Uploaded asset");
        Ok(stored)
    }

    /// Public retrieval address for a key.
    pub fn public_address(&self, key: &str) -> String {
        self.backend.public_url(&self.bucket, key)
    }

    /// Remove a stored object. Removing a missing key succeeds.
    pub async fn remove(&self, session: &Session, key: &str) -> RosterResult<()> {
        self.backend
            .remove(session, &self.bucket, &[key.to_string()])
            .await
            .map_err(|e| RosterError::Storage(e.to_string()))?;

        debug!(user_id = %session.user_id, key = %key, "Removed asset");
        Ok(())
    }
}

fn object_key(owner_id: &str, extension: Option<&str>) -> String {
    let name = Uuid::new_v4().simple();
    match extension {
        Some(ext) => format!("{owner_id}/{name}.{ext}"),
        None => format!("{owner_id}/{name}"),
    }
}

/// Recover a storage key from a public address.
///
/// The key is the last two path segments (`{owner_id}/{object}`). Returns
/// `None` for anything that is not an absolute URL with at least two
/// non-empty segments.
pub fn storage_key_from_address(address: &str) -> Option<String> {
    let url = Url::parse(address).ok()?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        [.., owner, object] => Some(format!("{owner}/{object}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BackendCall, MemoryBackend};

    const BUCKET: &str = "student-image";

    fn session(user_id: &str) -> Session {
        Session {
            access_token: format!("token-{user_id}"),
            refresh_token: "refresh".to_string(),
            user_id: user_id.to_string(),
            email: None,
            expires_at: 0,
        }
    }

    #[tokio::test]
    async fn upload_key_is_owner_prefixed_and_keeps_extension() {
        let backend = Arc::new(MemoryBackend::new());
        let blobs = BlobGateway::new(Arc::clone(&backend), BUCKET);

        let key = blobs
            .upload(&session("u1"), AssetUpload::new("photo.JPG", vec![1, 2, 3]))
            .await
            .unwrap();

        assert!(key.starts_with("u1/"));
        assert!(key.ends_with(".JPG"));
        assert_eq!(backend.object(BUCKET, &key), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn upload_without_extension_has_none() {
        let backend = Arc::new(MemoryBackend::new());
        let blobs = BlobGateway::new(Arc::clone(&backend), BUCKET);

        let key = blobs
            .upload(&session("u1"), AssetUpload::new("scan", vec![9]))
            .await
            .unwrap();

        let object = key.strip_prefix("u1/").unwrap();
        assert!(!object.contains('.'));
    }

    #[tokio::test]
    async fn repeated_uploads_get_distinct_keys() {
        let backend = Arc::new(MemoryBackend::new());
        let blobs = BlobGateway::new(Arc::clone(&backend), BUCKET);
        let file = AssetUpload::new("a.png", vec![1]);

        let first = blobs.upload(&session("u1"), file.clone()).await.unwrap();
        let second = blobs.upload(&session("u1"), file).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn upload_failure_is_a_storage_error() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_next_upload("bucket is full");
        let blobs = BlobGateway::new(Arc::clone(&backend), BUCKET);

        let result = blobs
            .upload(&session("u1"), AssetUpload::new("a.png", vec![1]))
            .await;
        assert!(matches!(result, Err(RosterError::Storage(msg)) if msg.contains("bucket is full")));
    }

    #[tokio::test]
    async fn remove_targets_single_key_and_tolerates_missing() {
        let backend = Arc::new(MemoryBackend::new());
        let blobs = BlobGateway::new(Arc::clone(&backend), BUCKET);

        blobs.remove(&session("u1"), "u1/missing.png").await.unwrap();
        assert!(backend.calls().contains(&BackendCall::Remove {
            bucket: BUCKET.to_string(),
            keys: vec!["u1/missing.png".to_string()],
        }));
    }

    #[test]
    fn public_address_is_derived_from_key() {
        let blobs = BlobGateway::new(Arc::new(MemoryBackend::new()), BUCKET);
        assert_eq!(
            blobs.public_address("u1/abc.png"),
            "https://memory.invalid/storage/v1/object/public/student-image/u1/abc.png"
        );
    }

    #[test]
    fn key_is_recovered_from_public_address() {
        assert_eq!(
            storage_key_from_address(
                "https://cdn.example.com/storage/v1/object/public/student-image/u1/abc.png"
            )
            .as_deref(),
            Some("u1/abc.png")
        );
        assert_eq!(
            storage_key_from_address("https://cdn.example.com/u1/abc.png?download=1").as_deref(),
            Some("u1/abc.png")
        );
    }

    #[test]
    fn unusable_addresses_yield_no_key() {
        assert_eq!(storage_key_from_address("not a url"), None);
        assert_eq!(storage_key_from_address("https://cdn.example.com/abc.png"), None);
        assert_eq!(storage_key_from_address("https://cdn.example.com/"), None);
    }
}

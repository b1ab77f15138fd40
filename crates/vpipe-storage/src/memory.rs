//! In-memory object store.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::repository::StorageRepository;

/// Object store backed by a map, with switchable failures per bucket.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    failing_downloads: Mutex<HashSet<String>>,
    failing_uploads: Mutex<HashSet<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object.
    pub fn put(&self, bucket: &str, name: &str, data: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert((bucket.to_string(), name.to_string()), data.into());
        }
    }

    /// Read an object back without going through the trait.
    pub fn get(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(&(bucket.to_string(), name.to_string())).cloned())
    }

    /// Make downloads from `bucket` fail as if the store were unreachable.
    pub fn fail_downloads(&self, bucket: &str) {
        if let Ok(mut failing) = self.failing_downloads.lock() {
            failing.insert(bucket.to_string());
        }
    }

    /// Make uploads to `bucket` fail as if the store were unreachable.
    pub fn fail_uploads(&self, bucket: &str) {
        if let Ok(mut failing) = self.failing_uploads.lock() {
            failing.insert(bucket.to_string());
        }
    }

    fn is_failing(set: &Mutex<HashSet<String>>, bucket: &str) -> bool {
        set.lock().map(|s| s.contains(bucket)).unwrap_or(false)
    }
}

#[async_trait]
impl StorageRepository for MemoryStorage {
    async fn download(&self, bucket: &str, name: &str) -> StorageResult<Vec<u8>> {
        if Self::is_failing(&self.failing_downloads, bucket) {
            return Err(StorageError::download_failed(format!(
                "connection reset while reading {}/{}",
                bucket, name
            )));
        }
        self.get(bucket, name)
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", bucket, name)))
    }

    async fn upload(&self, bucket: &str, name: &str, data: Vec<u8>) -> StorageResult<()> {
        if Self::is_failing(&self.failing_uploads, bucket) {
            return Err(StorageError::upload_failed(format!(
                "connection reset while writing {}/{}",
                bucket, name
            )));
        }
        self.put(bucket, name, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpipe_models::{Classify, ErrorKind};

    #[tokio::test]
    async fn test_upload_then_download() {
        let storage = MemoryStorage::new();
        storage.upload("trim", "a.mp4", b"abc".to_vec()).await.unwrap();
        assert_eq!(storage.download("trim", "a.mp4").await.unwrap(), b"abc".to_vec());
        assert!(storage.get("edit", "a.mp4").is_none());
    }

    #[tokio::test]
    async fn test_missing_object() {
        let storage = MemoryStorage::new();
        let err = storage.download("uploads", "missing.mp4").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("uploads/missing.mp4"));
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let storage = MemoryStorage::new();
        storage.put("uploads", "a.mp4", b"x".to_vec());
        storage.fail_downloads("uploads");
        storage.fail_uploads("trim");

        let err = storage.download("uploads", "a.mp4").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);

        let err = storage.upload("trim", "a.mp4", vec![]).await.unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed(_)));
        assert!(err.is_retryable());
    }
}

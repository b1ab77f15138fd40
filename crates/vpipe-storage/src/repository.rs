//! Storage seam.

use async_trait::async_trait;

use crate::error::StorageResult;

/// Bucket-addressed object store.
///
/// Objects are whole videos held in memory; a stage reads one object from its
/// input bucket and writes one object with the same name to its output bucket.
#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// Fetch the object `name` from `bucket`.
    async fn download(&self, bucket: &str, name: &str) -> StorageResult<Vec<u8>>;

    /// Store `data` as `name` in `bucket`, replacing any existing object.
    async fn upload(&self, bucket: &str, name: &str, data: Vec<u8>) -> StorageResult<()>;
}

//! Blob storage seam.

use async_trait::async_trait;

use crate::client::R2Client;
use crate::error::StorageResult;

/// Durable byte storage that returns a URL for what it stored.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return a URL that serves them.
    async fn put(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> StorageResult<String>;

    /// Cheap reachability probe for readiness checks.
    async fn check(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl BlobStore for R2Client {
    async fn put(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> StorageResult<String> {
        self.upload_bytes(bytes, key, content_type).await?;
        self.object_url(key).await
    }

    async fn check(&self) -> StorageResult<()> {
        self.check_connectivity().await
    }
}

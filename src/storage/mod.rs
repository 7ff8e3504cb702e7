//! # Blob Storage
//!
//! Archives and attachments live in a bucket addressed by string keys. The
//! bucket is chosen by URL: `file://<dir>` for a directory on local disk and
//! `mem://` for a process-local store used by tests and throwaway runs.
//!
//! Writers must be shut down (`AsyncWriteExt::shutdown`) to commit their
//! contents.

mod filesystem;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

pub use filesystem::FilesystemBucket;
pub use memory::MemoryBucket;

pub type BlobWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid storage location: {0}")]
    InvalidLocation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata of a stored blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobAttributes {
    pub size: u64,
}

#[async_trait]
pub trait Bucket: Send + Sync {
    /// Opens a writer that replaces any blob stored under `key`.
    async fn writer(&self, key: &str) -> Result<BlobWriter, StorageError>;

    async fn reader(&self, key: &str) -> Result<BlobReader, StorageError>;

    async fn attributes(&self, key: &str) -> Result<BlobAttributes, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Removes a blob. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Opens the bucket named by a storage URL.
pub async fn open_bucket(location: &str) -> Result<Arc<dyn Bucket>, StorageError> {
    if let Some(path) = location.strip_prefix("file://") {
        if path.is_empty() {
            return Err(StorageError::InvalidLocation(location.to_string()));
        }
        let bucket = FilesystemBucket::new(path).await?;
        tracing::info!(root = %path, "Opened filesystem bucket");
        return Ok(Arc::new(bucket));
    }

    if location.starts_with("mem://") {
        tracing::info!("Opened in-memory bucket");
        return Ok(Arc::new(MemoryBucket::new()));
    }

    Err(StorageError::InvalidLocation(location.to_string()))
}

/// Rejects keys that could address anything outside the bucket.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.starts_with('/') || key.starts_with('\\') || key.contains("..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }

    for component in std::path::Path::new(key).components() {
        if !matches!(component, std::path::Component::Normal(_)) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn round_trip(bucket: Arc<dyn Bucket>) {
        let key = "exports/tenant/user/export_locations.xml";
        let mut writer = bucket.writer(key).await.unwrap();
        writer.write_all(b"<inventory/>").await.unwrap();
        writer.shutdown().await.unwrap();

        assert!(bucket.exists(key).await.unwrap());
        assert_eq!(bucket.attributes(key).await.unwrap().size, 12);

        let mut contents = String::new();
        bucket
            .reader(key)
            .await
            .unwrap()
            .read_to_string(&mut contents)
            .await
            .unwrap();
        assert_eq!(contents, "<inventory/>");

        bucket.delete(key).await.unwrap();
        assert!(!bucket.exists(key).await.unwrap());
        bucket.delete(key).await.unwrap();
        assert!(matches!(
            bucket.reader(key).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn memory_bucket_stores_and_deletes() {
        round_trip(open_bucket("mem://").await.unwrap()).await;
    }

    #[tokio::test]
    async fn filesystem_bucket_stores_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let location = format!("file://{}", dir.path().display());
        round_trip(open_bucket(&location).await.unwrap()).await;
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        assert!(matches!(
            open_bucket("s3://bucket").await,
            Err(StorageError::InvalidLocation(_))
        ));
        assert!(matches!(
            open_bucket("file://").await,
            Err(StorageError::InvalidLocation(_))
        ));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        assert!(validate_key("exports/a.xml").is_ok());
        for key in ["", "/etc/passwd", "../escape", "a/../../b", "\\share"] {
            assert!(validate_key(key).is_err(), "{key} should be rejected");
        }
    }
}

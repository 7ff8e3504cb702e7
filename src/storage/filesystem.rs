//! Local directory backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{BlobAttributes, BlobReader, BlobWriter, Bucket, StorageError, validate_key};

pub struct FilesystemBucket {
    root: PathBuf,
}

impl FilesystemBucket {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn not_found_as(key: &str, error: std::io::Error) -> StorageError {
    if error.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(error)
    }
}

#[async_trait]
impl Bucket for FilesystemBucket {
    async fn writer(&self, key: &str) -> Result<BlobWriter, StorageError> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = fs::File::create(&path).await?;
        Ok(Box::new(file))
    }

    async fn reader(&self, key: &str) -> Result<BlobReader, StorageError> {
        let path = self.key_path(key)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_as(key, e))?;
        Ok(Box::new(file))
    }

    async fn attributes(&self, key: &str) -> Result<BlobAttributes, StorageError> {
        let path = self.key_path(key)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| not_found_as(key, e))?;
        Ok(BlobAttributes {
            size: metadata.len(),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.key_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

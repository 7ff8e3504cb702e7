//! Process-local backend.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::{BlobAttributes, BlobReader, BlobWriter, Bucket, StorageError, validate_key};

type Objects = Arc<Mutex<HashMap<String, Arc<[u8]>>>>;

#[derive(Default, Clone)]
pub struct MemoryBucket {
    objects: Objects,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, Arc<[u8]>>> {
        lock(&self.objects)
    }

    fn get(&self, key: &str) -> Result<Arc<[u8]>, StorageError> {
        validate_key(key)?;
        self.objects()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

fn lock(objects: &Objects) -> MutexGuard<'_, HashMap<String, Arc<[u8]>>> {
    objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Buffers writes and publishes the blob on shutdown.
struct MemoryWriter {
    key: String,
    buffer: Option<Vec<u8>>,
    objects: Objects,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().buffer.as_mut() {
            Some(buffer) => {
                buffer.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after shutdown",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(buffer) = this.buffer.take() {
            lock(&this.objects).insert(this.key.clone(), Arc::from(buffer));
        }
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    async fn writer(&self, key: &str) -> Result<BlobWriter, StorageError> {
        validate_key(key)?;
        Ok(Box::new(MemoryWriter {
            key: key.to_string(),
            buffer: Some(Vec::new()),
            objects: self.objects.clone(),
        }))
    }

    async fn reader(&self, key: &str) -> Result<BlobReader, StorageError> {
        let data = self.get(key)?;
        Ok(Box::new(io::Cursor::new(data)))
    }

    async fn attributes(&self, key: &str) -> Result<BlobAttributes, StorageError> {
        let data = self.get(key)?;
        Ok(BlobAttributes {
            size: data.len() as u64,
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        Ok(self.objects().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.objects().remove(key);
        Ok(())
    }
}

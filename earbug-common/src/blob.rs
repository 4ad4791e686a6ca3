//! Durable object store collaborator
//!
//! Snapshots are published as whole objects. A reader either sees the previous
//! object or the new one, never a partial write.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Error, Result};

/// Key-value blob storage with all-or-nothing writes
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a whole object. A missing key is [`Error::NotFound`].
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Publish a whole object, replacing any previous value atomically
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Reject keys that are empty or would escape the store root
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("blob key must not be empty".to_string()));
    }
    let path = Path::new(key);
    if path.components().any(|c| !matches!(c, Component::Normal(_))) {
        return Err(Error::InvalidInput(format!("invalid blob key: {:?}", key)));
    }
    Ok(())
}

/// Directory-backed blob store
///
/// Writes go to a uniquely named sibling temp file which is flushed to disk
/// and then renamed over the destination.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("blob {}", key)))
            }
            Err(e) => Err(Error::Durability(format!("read {}: {}", path.display(), e))),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| Error::Durability(format!("create {}: {}", parent.display(), e)))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4()));

        let result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Durability(format!("write {}: {}", path.display(), e)));
        }

        debug!(key = %key, bytes = bytes.len(), "Blob published");
        Ok(())
    }
}

/// In-process blob store, used for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("blob {}", key)))
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.objects.write().await.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

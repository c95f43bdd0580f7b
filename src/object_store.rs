//! Object store gateway for raw candidate-file bytes.
//!
//! Bytes are written once at batch creation and deleted once at teardown;
//! mutation in place is forbidden. Keys follow a prefix-per-batch scheme so
//! `delete_all` can drop everything a batch ever wrote.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use crate::batch::{BatchId, FileRef, ItemId};
use crate::error::{Result, SieveletError};

/// Trait for storing and tearing down uploaded file bytes.
///
/// The returned [`FileRef`] is opaque to the engine; it is only ever handed
/// to the analyzer adapter.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a key derived from `(batch_id, item_id, filename)`.
    /// The derived key is unique per `(batch_id, item_id)`; overwrites are
    /// refused.
    ///
    /// # Errors
    /// - [`SieveletError::ObjectExists`] if the key is already occupied
    /// - I/O errors from the backing store
    async fn put(
        &self,
        batch_id: BatchId,
        item_id: ItemId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<FileRef>;

    /// Remove every object under the batch prefix. Idempotent; a missing
    /// prefix is not an error.
    async fn delete_all(&self, batch_id: BatchId) -> Result<()>;
}

/// Only the final path component of the submitted filename is used in keys,
/// so uploads cannot escape their batch prefix.
fn key_filename(filename: &str) -> &str {
    filename
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or("upload")
}

// ============================================================================
// Filesystem Implementation
// ============================================================================

/// Object store backed by a local directory tree under the configured bucket
/// root: `<root>/<batch_id>/<item_id>/<filename>`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn batch_prefix(&self, batch_id: BatchId) -> PathBuf {
        self.root.join(batch_id.0.to_string())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    #[tracing::instrument(skip(self, bytes), fields(batch_id = %batch_id, item_id = %item_id, size = bytes.len()))]
    async fn put(
        &self,
        batch_id: BatchId,
        item_id: ItemId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<FileRef> {
        let path = self
            .batch_prefix(batch_id)
            .join(item_id.0.to_string())
            .join(key_filename(filename));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SieveletError::ObjectExists(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(bytes).await?;
        file.flush().await?;

        tracing::debug!(path = %path.display(), "stored object");
        Ok(FileRef(path.display().to_string()))
    }

    #[tracing::instrument(skip(self), fields(batch_id = %batch_id))]
    async fn delete_all(&self, batch_id: BatchId) -> Result<()> {
        let prefix = self.batch_prefix(batch_id);
        match tokio::fs::remove_dir_all(&prefix).await {
            Ok(()) => {
                tracing::debug!(prefix = %prefix.display(), "removed batch prefix");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

/// In-memory object store for tests.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently stored under the batch prefix.
    pub fn object_count(&self, batch_id: BatchId) -> usize {
        let prefix = format!("{}/", batch_id.0);
        self.objects
            .lock()
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .count()
    }

    /// Fetch stored bytes by their reference.
    pub fn get(&self, file_ref: &FileRef) -> Option<Vec<u8>> {
        self.objects.lock().get(file_ref.as_str()).cloned()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        batch_id: BatchId,
        item_id: ItemId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<FileRef> {
        let key = format!("{}/{}/{}", batch_id.0, item_id.0, key_filename(filename));
        let mut objects = self.objects.lock();
        if objects.contains_key(&key) {
            return Err(SieveletError::ObjectExists(key));
        }
        objects.insert(key.clone(), bytes.to_vec());
        Ok(FileRef(key))
    }

    async fn delete_all(&self, batch_id: BatchId) -> Result<()> {
        let prefix = format!("{}/", batch_id.0);
        self.objects.lock().retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_put_and_delete_all() {
        let store = InMemoryObjectStore::new();
        let batch = BatchId::new();
        let other = BatchId::new();

        let file_ref = store
            .put(batch, ItemId::new(), "resume.pdf", b"bytes")
            .await
            .unwrap();
        store
            .put(other, ItemId::new(), "resume.pdf", b"other")
            .await
            .unwrap();
        assert_eq!(store.get(&file_ref), Some(b"bytes".to_vec()));
        assert_eq!(store.object_count(batch), 1);

        store.delete_all(batch).await.unwrap();
        assert_eq!(store.object_count(batch), 0);
        // Other batches are untouched, and re-deleting is a no-op.
        assert_eq!(store.object_count(other), 1);
        store.delete_all(batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_refuses_overwrite() {
        let store = InMemoryObjectStore::new();
        let batch = BatchId::new();
        let item = ItemId::new();

        store.put(batch, item, "resume.pdf", b"one").await.unwrap();
        let second = store.put(batch, item, "resume.pdf", b"two").await;
        assert!(matches!(second, Err(SieveletError::ObjectExists(_))));
    }

    #[tokio::test]
    async fn test_same_filename_in_different_items_is_distinct() {
        let store = InMemoryObjectStore::new();
        let batch = BatchId::new();

        let a = store
            .put(batch, ItemId::new(), "resume.pdf", b"a")
            .await
            .unwrap();
        let b = store
            .put(batch, ItemId::new(), "resume.pdf", b"b")
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(store.object_count(batch), 2);
    }

    #[test]
    fn test_key_filename_strips_directories() {
        assert_eq!(key_filename("resume.pdf"), "resume.pdf");
        assert_eq!(key_filename("dir/sub/resume.pdf"), "resume.pdf");
        assert_eq!(key_filename("c:\\docs\\resume.pdf"), "resume.pdf");
        assert_eq!(key_filename(".."), "upload");
        assert_eq!(key_filename(""), "upload");
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let batch = BatchId::new();
        let item = ItemId::new();

        let file_ref = store
            .put(batch, item, "resume.pdf", b"local bytes")
            .await
            .unwrap();
        let read = tokio::fs::read(file_ref.as_str()).await.unwrap();
        assert_eq!(read, b"local bytes");

        // Overwrites are refused.
        let second = store.put(batch, item, "resume.pdf", b"again").await;
        assert!(matches!(second, Err(SieveletError::ObjectExists(_))));

        store.delete_all(batch).await.unwrap();
        assert!(tokio::fs::metadata(file_ref.as_str()).await.is_err());
        // Missing prefix is tolerated.
        store.delete_all(batch).await.unwrap();
    }
}

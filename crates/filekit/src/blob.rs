//! The byte-addressable storage capability the service is built on.
//!
//! [`BlobStore`] is the only seam between the sharding/notification core and a
//! concrete backend. [`MemoryBlobStore`] is a complete in-process backend,
//! useful for tests and ephemeral deployments.

use crate::error::{Result, StorageError, StorageErrorExt};
use crate::{mime, path};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Write options forwarded to the backend (e.g. `ContentType`, `CacheControl`).
pub type Metadata = BTreeMap<String, String>;

/// Metadata key carrying the detected MIME type of a saved file.
pub const CONTENT_TYPE: &str = "ContentType";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// An immediate child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    /// Full store path of the entry.
    pub path: String,
    pub kind: EntryKind,
}

/// A backend addressed by `/`-separated relative store paths.
///
/// Backends report failures as [`StorageError`]s and never retry. `write`,
/// `write_stream` and `delete` return `Ok(false)` when the backend declined the
/// mutation without an underlying fault.
pub trait BlobStore: Send + Sync {
    fn file_exists(&self, path: &str) -> impl Future<Output = Result<bool>> + Send;

    fn directory_exists(&self, path: &str) -> impl Future<Output = Result<bool>> + Send;

    fn read(&self, path: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Writes a small payload in full, replacing any existing object.
    fn write(
        &self,
        path: &str,
        data: &[u8],
        metadata: &Metadata,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Drains `reader` into the object at `path`, replacing any existing object.
    fn write_stream<R>(
        &self,
        path: &str,
        reader: R,
        metadata: &Metadata,
    ) -> impl Future<Output = Result<bool>> + Send
    where
        R: AsyncRead + Unpin + Send;

    fn delete(&self, path: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Lists the immediate children of a directory. A missing directory is empty.
    fn list_directory(&self, path: &str) -> impl Future<Output = Result<Vec<DirEntry>>> + Send;

    fn mime_type(&self, path: &str) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug)]
struct MemoryObject {
    data: Arc<[u8]>,
    metadata: Metadata,
}

/// A thread-safe in-memory [`BlobStore`]. Directories are implicit.
///
/// Cloning is cheap; clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<FxHashMap<String, MemoryObject>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata recorded with the object at `path`.
    #[must_use]
    pub fn metadata_of(&self, path: &str) -> Option<Metadata> {
        let key = object_key(path).ok()?;
        self.objects.read().get(&key).map(|o| o.metadata.clone())
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// All stored object paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.read().keys().cloned().collect();
        paths.sort_unstable();
        paths
    }

    fn insert(&self, key: String, data: Arc<[u8]>, metadata: &Metadata) {
        trace!(path = %key, bytes = data.len(), "Memory object stored");
        self.objects.write().insert(key, MemoryObject { data, metadata: metadata.clone() });
    }

    fn not_found(key: &str) -> StorageError {
        StorageError::FileNotFound { message: key.to_owned().into(), context: None }
    }
}

impl BlobStore for MemoryBlobStore {
    async fn file_exists(&self, path: &str) -> Result<bool> {
        let key = object_key(path)?;
        Ok(self.objects.read().contains_key(&key))
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        let dir = path::normalize_prefix(path)?;
        if dir.is_empty() {
            return Ok(true);
        }
        let needle = format!("{dir}/");
        Ok(self.objects.read().keys().any(|k| k.starts_with(&needle)))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let key = object_key(path)?;
        self.objects
            .read()
            .get(&key)
            .map(|o| o.data.to_vec())
            .ok_or_else(|| Self::not_found(&key))
    }

    async fn write(&self, path: &str, data: &[u8], metadata: &Metadata) -> Result<bool> {
        let key = object_key(path)?;
        self.insert(key, Arc::from(data), metadata);
        Ok(true)
    }

    async fn write_stream<R>(&self, path: &str, mut reader: R, metadata: &Metadata) -> Result<bool>
    where
        R: AsyncRead + Unpin + Send,
    {
        let key = object_key(path)?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .context(format!("Failed to drain stream for {key}"))?;
        self.insert(key, Arc::from(data), metadata);
        Ok(true)
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let key = object_key(path)?;
        Ok(self.objects.write().remove(&key).is_some())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let dir = path::normalize_prefix(path)?;
        let needle = if dir.is_empty() { String::new() } else { format!("{dir}/") };

        let mut children: BTreeMap<String, EntryKind> = BTreeMap::new();
        for key in self.objects.read().keys() {
            let Some(rest) = key.strip_prefix(&needle) else { continue };
            match rest.split_once('/') {
                Some((child, _)) => {
                    children.insert(child.to_owned(), EntryKind::Directory);
                },
                None => {
                    children.entry(rest.to_owned()).or_insert(EntryKind::File);
                },
            }
        }

        Ok(children
            .into_iter()
            .map(|(name, kind)| DirEntry { path: path::join([dir.as_str(), name.as_str()]), kind })
            .collect())
    }

    async fn mime_type(&self, path: &str) -> Result<String> {
        let key = object_key(path)?;
        let objects = self.objects.read();
        let object = objects.get(&key).ok_or_else(|| Self::not_found(&key))?;
        if let Some(mime) = object.metadata.get(CONTENT_TYPE) {
            return Ok(mime.clone());
        }
        Ok(mime::detect(&object.data, &key))
    }
}

fn object_key(raw: &str) -> Result<String> {
    let key = path::normalize_prefix(raw)?;
    if key.is_empty() {
        return Err(StorageError::FileNotFound {
            message: raw.to_owned().into(),
            context: Some("Target must be a file".into()),
        });
    }
    Ok(key)
}

//! Sandboxed local-disk [`BlobStore`] with atomic writes and optional compression.
//!
//! Every store path is resolved against a canonical root before touching the
//! disk. Writes go to a unique temporary file which is synced and then renamed
//! over the target, so readers never observe a partially written object.

use crate::builder::LocalBlobStoreBuilder;
use crate::maintenance;
use crate::security;
use filekit::{
    BlobStore, DirEntry, EntryKind, Metadata, Result, StorageError, StorageErrorExt, mime, path,
};
use serde::Deserialize;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Lz4,
}

impl Compression {
    fn compress(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::None => data.to_vec(),
            Self::Lz4 => lz4_flex::compress_prepend_size(data),
        }
    }

    fn decompress(self, data: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(data),
            Self::Lz4 => lz4_flex::decompress_size_prepended(&data).map_err(|e| {
                StorageError::Codec {
                    message: e.to_string().into(),
                    context: Some("Lz4 decompression failed".into()),
                }
            }),
        }
    }
}

/// The internal shared state of a [`LocalBlobStore`].
#[derive(Debug)]
pub struct LocalInner {
    /// Canonical physical root; nothing outside it is ever touched.
    pub(crate) root: PathBuf,
    pub(crate) compression: Compression,
    pub(crate) tmp_counter: AtomicU64,
    /// Age after which leftover temp files are purged.
    pub(crate) stale_after: Duration,
}

/// A thread-safe handle to a directory tree used as a [`BlobStore`].
///
/// The handle is reference-counted and cheap to clone.
///
/// # Example
///
/// ```rust
/// use filekit::BlobStore;
/// use filekit_local::{Compression, LocalBlobStore};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), filekit::StorageError> {
/// # let tmp = tempfile::tempdir().unwrap();
/// let store = LocalBlobStore::builder()
///     .root(tmp.path().join("uploads"))
///     .compression(Compression::Lz4)
///     .connect()
///     .await?;
///
/// store.write("docs/1/readme.txt", b"hello", &Default::default()).await?;
/// assert!(store.directory_exists("docs/1").await?);
/// assert_eq!(store.read("docs/1/readme.txt").await?, b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    pub(crate) inner: Arc<LocalInner>,
}

impl Deref for LocalBlobStore {
    type Target = LocalInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl LocalBlobStore {
    #[must_use = "The store is not initialized until you call .connect()"]
    pub fn builder() -> LocalBlobStoreBuilder {
        LocalBlobStoreBuilder::new()
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Resolves a store path to its physical location inside the root.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PathTraversalAttempt`] if the path escapes the sandbox.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        security::resolve_path(&self.root, path)
    }

    /// Removes temporary files older than the configured age, left behind by
    /// interrupted writes, and returns how many were deleted.
    pub async fn purge_tmp(&self) -> usize {
        maintenance::purge_tmp(&self.root, self.stale_after).await
    }

    async fn kind_of(&self, path: &str) -> Result<Option<EntryKind>> {
        let resolved = security::resolve_path(&self.root, path)?;
        match fs::metadata(&resolved).await {
            Ok(meta) if meta.is_dir() => Ok(Some(EntryKind::Directory)),
            Ok(meta) if meta.is_file() => Ok(Some(EntryKind::File)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Io {
                source: err,
                context: Some(format!("Failed to stat {}", resolved.display()).into()),
            }),
        }
    }

    /// Copies already encoded bytes from `source` to `resolved` via temp file, `fsync` and rename.
    async fn commit(&self, resolved: &Path, mut source: impl AsyncRead + Unpin) -> Result<()> {
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .await
                .context(format!("Failed to create directories for {}", resolved.display()))?;
        }

        let temp = unique_tmp_path(resolved, &self.tmp_counter);
        let written = async {
            let mut file = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp)
                .await
                .context(format!("Temp creation failed: {}", temp.display()))?;
            tokio::io::copy(&mut source, &mut file).await.context("Write failed")?;
            file.flush().await.context("Write failed")?;
            file.sync_all().await.context("Hardware sync failed")
        }
        .await;

        if let Err(err) = written {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                warn!(path = %temp.display(), error = %cleanup, "Failed to remove temp file");
            }
            return Err(err);
        }

        if let Err(err) = fs::rename(&temp, resolved).await {
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                fs::remove_file(resolved)
                    .await
                    .context(format!("Failed to replace existing file: {}", resolved.display()))?;
                fs::rename(&temp, resolved).await.context(format!(
                    "Atomic swap failed: {} -> {}",
                    temp.display(),
                    resolved.display()
                ))?;
            } else {
                return Err(StorageError::Io {
                    source: err,
                    context: Some(
                        format!("Atomic swap failed: {} -> {}", temp.display(), resolved.display())
                            .into(),
                    ),
                });
            }
        }

        if let Some(parent) = resolved.parent() {
            sync_dir(parent).await;
        }

        Ok(())
    }
}

impl BlobStore for LocalBlobStore {
    async fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.kind_of(path).await? == Some(EntryKind::File))
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        Ok(self.kind_of(path).await? == Some(EntryKind::Directory))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let resolved = security::resolve_file(&self.root, path)?;

        let data = match fs::read(&resolved).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::FileNotFound {
                    message: path.to_owned().into(),
                    context: None,
                });
            },
            Err(err) => {
                return Err(StorageError::Io {
                    source: err,
                    context: Some(format!("Read failed: {}", resolved.display()).into()),
                });
            },
        };

        self.compression.decompress(data)
    }

    async fn write(&self, path: &str, data: &[u8], metadata: &Metadata) -> Result<bool> {
        let resolved = security::resolve_file(&self.root, path)?;
        let encoded = self.compression.compress(data);
        self.commit(&resolved, encoded.as_slice()).await?;

        trace!(path, ?metadata, "Metadata is not persisted by the local store");
        debug!(path = %resolved.display(), bytes = data.len(), "File saved atomically");
        Ok(true)
    }

    async fn write_stream<R>(&self, path: &str, mut reader: R, metadata: &Metadata) -> Result<bool>
    where
        R: AsyncRead + Unpin + Send,
    {
        let resolved = security::resolve_file(&self.root, path)?;

        match self.compression {
            Compression::None => self.commit(&resolved, reader).await?,
            Compression::Lz4 => {
                let mut data = Vec::new();
                reader.read_to_end(&mut data).await.context(format!("Reading source for {path}"))?;
                let encoded = self.compression.compress(&data);
                self.commit(&resolved, encoded.as_slice()).await?;
            },
        }

        trace!(path, ?metadata, "Metadata is not persisted by the local store");
        debug!(path = %resolved.display(), "File streamed atomically");
        Ok(true)
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let resolved = security::resolve_file(&self.root, path)?;
        match fs::remove_file(&resolved).await {
            Ok(()) => {
                debug!(path = %resolved.display(), "File deleted");
                Ok(true)
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io {
                source: err,
                context: Some(format!("Failed to delete: {}", resolved.display()).into()),
            }),
        }
    }

    async fn list_directory(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let resolved = security::resolve_path(&self.root, dir)?;
        let prefix = path::normalize_prefix(dir)?;

        let mut entries = match fs::read_dir(&resolved).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StorageError::Io {
                    source: err,
                    context: Some(format!("Failed to list {}", resolved.display()).into()),
                });
            },
        };

        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("Directory listing failed")? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(dir = %resolved.display(), name = ?file_name, "Skipping non UTF-8 entry");
                continue;
            };
            if maintenance::is_tmp_name(name) {
                continue;
            }

            let file_type = entry.file_type().await.context("Directory listing failed")?;
            let kind = if file_type.is_dir() { EntryKind::Directory } else { EntryKind::File };
            children.push(DirEntry { path: path::join([prefix.as_str(), name]), kind });
        }

        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    async fn mime_type(&self, path: &str) -> Result<String> {
        let data = self.read(path).await?;
        let head = &data[..data.len().min(mime::SNIFF_LEN)];
        Ok(mime::detect(head, path))
    }
}

async fn sync_dir(path: &Path) {
    match fs::File::open(path).await {
        Ok(dir) => {
            if let Err(err) = dir.sync_all().await {
                warn!(path = %path.display(), error = %err, "Directory sync failed");
            }
        },
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Directory open failed");
        },
    }
}

fn unique_tmp_path(target: &Path, counter: &AtomicU64) -> PathBuf {
    let counter = counter.fetch_add(1, Ordering::Relaxed);
    let file_name = target.file_name().and_then(|s| s.to_str()).unwrap_or("blob");
    target.with_file_name(format!("{file_name}{}{counter}", maintenance::TMP_INFIX))
}

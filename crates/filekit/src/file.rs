use crate::error::{Result, StorageErrorExt};
use crate::mime;
use crate::path;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::OnceCell;

/// Where the bytes of a pending upload come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// A readable file on the local disk (e.g. a temporary upload).
    Path(PathBuf),
    /// An in-memory payload.
    Bytes(Arc<[u8]>),
}

/// A file pending storage.
///
/// The original name and extension are fixed at construction; the MIME type is
/// sniffed from the content on first request and cached for the lifetime of
/// the record.
#[derive(Debug)]
pub struct FileRecord {
    source: FileSource,
    original_name: String,
    extension: Option<String>,
    mime_type: OnceCell<String>,
}

impl FileRecord {
    /// Wraps a file on the local disk. The original name is the path's file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Self::new(FileSource::Path(path), name)
    }

    /// Wraps an in-memory upload under the given original name.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(FileSource::Bytes(data.into()), name.into())
    }

    fn new(source: FileSource, original_name: String) -> Self {
        let extension = path::extension(&original_name);
        Self { source, original_name, extension, mime_type: OnceCell::new() }
    }

    #[must_use]
    pub const fn source(&self) -> &FileSource {
        &self.source
    }

    #[must_use]
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// Lowercased extension without the dot, if the original name has one.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Local path of the source, when it lives on disk.
    #[must_use]
    pub fn local_path(&self) -> Option<&Path> {
        match &self.source {
            FileSource::Path(p) => Some(p),
            FileSource::Bytes(_) => None,
        }
    }

    /// Detected MIME type, computed once from the first [`mime::SNIFF_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`](crate::StorageError::Io) if a disk-backed source
    /// cannot be read.
    pub async fn mime_type(&self) -> Result<&str> {
        let mime = self
            .mime_type
            .get_or_try_init(|| async {
                let head = self.head().await?;
                Ok::<_, crate::StorageError>(mime::detect(&head, &self.original_name))
            })
            .await?;
        Ok(mime.as_str())
    }

    /// Opens a fresh byte stream over the source.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`](crate::StorageError::Io) if a disk-backed source
    /// cannot be opened.
    pub async fn open(&self) -> Result<FileStream> {
        match &self.source {
            FileSource::Path(p) => {
                let file = fs::File::open(p)
                    .await
                    .context(format!("Failed to open upload source: {}", p.display()))?;
                Ok(FileStream::Disk(file))
            },
            FileSource::Bytes(data) => Ok(FileStream::Memory(Cursor::new(data.clone()))),
        }
    }

    async fn head(&self) -> Result<Vec<u8>> {
        match &self.source {
            FileSource::Bytes(data) => Ok(data[..data.len().min(mime::SNIFF_LEN)].to_vec()),
            FileSource::Path(_) => {
                let mut head = Vec::with_capacity(mime::SNIFF_LEN);
                self.open()
                    .await?
                    .take(mime::SNIFF_LEN as u64)
                    .read_to_end(&mut head)
                    .await
                    .context("Failed to sniff upload content")?;
                Ok(head)
            },
        }
    }
}

/// A readable byte stream over a [`FileRecord`] source. Closed when dropped.
#[derive(Debug)]
pub enum FileStream {
    Disk(fs::File),
    Memory(Cursor<Arc<[u8]>>),
}

impl AsyncRead for FileStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Disk(file) => Pin::new(file).poll_read(cx, buf),
            Self::Memory(cursor) => Pin::new(cursor).poll_read(cx, buf),
        }
    }
}

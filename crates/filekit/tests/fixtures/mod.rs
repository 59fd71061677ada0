#![allow(dead_code)]

use filekit::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::io::AsyncRead;

/// A [`MemoryBlobStore`] wrapper with switchable faults.
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    pub inner: MemoryBlobStore,
    /// `write_stream` returns `Ok(false)`.
    pub refuse_writes: Arc<AtomicBool>,
    /// `write_stream` returns an I/O error.
    pub break_writes: Arc<AtomicBool>,
    /// `delete` returns an I/O error.
    pub break_deletes: Arc<AtomicBool>,
    /// The next N `directory_exists` calls report a collision.
    pub forced_collisions: Arc<AtomicUsize>,
    /// The next N `file_exists` calls report an existing file.
    pub forced_file_collisions: Arc<AtomicUsize>,
    pub directory_checks: Arc<AtomicUsize>,
    pub file_checks: Arc<AtomicUsize>,
    pub stream_writes: Arc<AtomicUsize>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one forced hit, if any are left.
    fn take(counter: &AtomicUsize) -> bool {
        counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }

    fn io_error(what: &str) -> StorageError {
        StorageError::Io {
            source: std::io::Error::other(format!("injected {what} failure")),
            context: None,
        }
    }
}

impl BlobStore for FaultyStore {
    async fn file_exists(&self, path: &str) -> Result<bool> {
        self.file_checks.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.forced_file_collisions) {
            return Ok(true);
        }
        self.inner.file_exists(path).await
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        self.directory_checks.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.forced_collisions) {
            return Ok(true);
        }
        self.inner.directory_exists(path).await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, data: &[u8], metadata: &Metadata) -> Result<bool> {
        self.inner.write(path, data, metadata).await
    }

    async fn write_stream<R>(&self, path: &str, reader: R, metadata: &Metadata) -> Result<bool>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.stream_writes.fetch_add(1, Ordering::SeqCst);
        if self.break_writes.load(Ordering::SeqCst) {
            return Err(Self::io_error("write"));
        }
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.write_stream(path, reader, metadata).await
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        if self.break_deletes.load(Ordering::SeqCst) {
            return Err(Self::io_error("delete"));
        }
        self.inner.delete(path).await
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.inner.list_directory(path).await
    }

    async fn mime_type(&self, path: &str) -> Result<String> {
        self.inner.mime_type(path).await
    }
}

/// Per-kind hit counters attached to a service.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub before_save: Arc<AtomicUsize>,
    pub after_save: Arc<AtomicUsize>,
    pub before_delete: Arc<AtomicUsize>,
    pub after_delete: Arc<AtomicUsize>,
}

impl Counters {
    pub fn attach<B: BlobStore>(service: &StorageService<B>) -> Self {
        let counters = Self::default();
        for (kind, counter) in [
            (StorageEventKind::BeforeSave, &counters.before_save),
            (StorageEventKind::AfterSave, &counters.after_save),
            (StorageEventKind::BeforeDelete, &counters.before_delete),
            (StorageEventKind::AfterDelete, &counters.after_delete),
        ] {
            let counter = counter.clone();
            service.on(kind, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        counters
    }

    pub fn total(&self) -> usize {
        [&self.before_save, &self.after_save, &self.before_delete, &self.after_delete]
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .sum()
    }
}

pub const PNG_10_BYTES: [u8; 10] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x0D];

pub fn sharded(max: u64) -> StorageConfig {
    StorageConfig {
        use_dirindex: true,
        max_dir_files: ShardLimit::bounded(max).unwrap(),
        ..StorageConfig::default()
    }
}

pub fn unsharded() -> StorageConfig {
    StorageConfig { use_dirindex: false, ..StorageConfig::default() }
}

pub fn service<B: BlobStore>(store: B, config: StorageConfig) -> StorageService<B> {
    StorageService::builder().store(store).config(config).build().expect("service setup failed")
}

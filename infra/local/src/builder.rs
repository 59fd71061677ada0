use crate::engine::{Compression, LocalBlobStore, LocalInner};
use crate::maintenance::STALE_AFTER;
use filekit::{Result, StorageError, StorageErrorExt};
use private::Sealed;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tokio::fs;
use tracing::info;

#[derive(Debug, Clone)]
struct LocalConfig {
    compression: Compression,
    create: bool,
    purge_tmp: bool,
    stale_after: Duration,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            create: true,
            purge_tmp: true,
            stale_after: STALE_AFTER,
        }
    }
}

#[derive(Debug, Default)]
pub struct NoRoot;
#[derive(Debug)]
pub struct WithRoot(PathBuf);

mod private {
    pub(super) trait Sealed {}
}
impl Sealed for NoRoot {}
impl Sealed for WithRoot {}

#[allow(private_bounds)]
#[derive(Debug, Default)]
pub struct LocalBlobStoreBuilder<S: Sealed = NoRoot> {
    state: S,
    config: LocalConfig,
}

#[allow(private_bounds)]
impl<S: Sealed> LocalBlobStoreBuilder<S> {
    #[must_use = "Sets compression for stored objects"]
    pub const fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    #[must_use = "Sets whether a missing root directory is created"]
    pub const fn create(mut self, enable: bool) -> Self {
        self.config.create = enable;
        self
    }

    #[must_use = "Sets whether stale temp files are removed on connect"]
    pub const fn purge_tmp(mut self, enable: bool) -> Self {
        self.config.purge_tmp = enable;
        self
    }

    /// Temp files younger than this are treated as in-flight writes and kept
    /// by [`LocalBlobStore::purge_tmp`].
    #[must_use = "Sets the age after which temp files count as abandoned"]
    pub const fn stale_after(mut self, age: Duration) -> Self {
        self.config.stale_after = age;
        self
    }

    fn transition<N: Sealed>(self, state: N) -> LocalBlobStoreBuilder<N> {
        LocalBlobStoreBuilder { state, config: self.config }
    }
}

impl LocalBlobStoreBuilder<NoRoot> {
    #[must_use = "Creates a new store builder with default configuration"]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "Sets the root directory of the store"]
    pub fn root(self, path: impl Into<PathBuf>) -> LocalBlobStoreBuilder<WithRoot> {
        self.transition(WithRoot(path.into()))
    }
}

impl LocalBlobStoreBuilder<WithRoot> {
    /// Opens the store.
    ///
    /// The root is created when `create(true)` is set (the default), then
    /// canonicalized so symlinks cannot move the sandbox. Stale temp files from
    /// interrupted writes are removed unless `purge_tmp(false)` was set; cleanup
    /// failures are logged and do not fail the connect.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] if the root is empty or names
    /// something other than a directory, and [`StorageError::Io`] if the root
    /// is missing and `create` is off, or cannot be created or resolved.
    pub async fn connect(self) -> Result<LocalBlobStore> {
        let root = &self.state.0;
        if root.as_os_str().is_empty() {
            return Err(invalid_root(root, "path is empty"));
        }

        if self.config.create {
            fs::create_dir_all(root)
                .await
                .context(format!("Failed to bootstrap storage root: {}", root.display()))?;
        }

        let canonical = fs::canonicalize(root)
            .await
            .context(format!("Failed to resolve storage root: {}", root.display()))?;
        let is_dir = fs::metadata(&canonical)
            .await
            .context(format!("Failed to inspect storage root: {}", canonical.display()))?
            .is_dir();
        if !is_dir {
            return Err(invalid_root(&canonical, "not a directory"));
        }

        info!(
            path = %canonical.display(),
            compression = ?self.config.compression,
            stale_after = ?self.config.stale_after,
            "Local blob store opened"
        );

        let store = LocalBlobStore {
            inner: Arc::new(LocalInner {
                root: canonical,
                compression: self.config.compression,
                tmp_counter: AtomicU64::new(1),
                stale_after: self.config.stale_after,
            }),
        };

        if self.config.purge_tmp {
            store.purge_tmp().await;
        }

        Ok(store)
    }
}

fn invalid_root(root: &Path, reason: &str) -> StorageError {
    StorageError::Configuration {
        message: format!("Storage root {} is unusable: {reason}", root.display()).into(),
        context: None,
    }
}

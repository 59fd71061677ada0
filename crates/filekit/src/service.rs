//! The save/delete orchestration around a [`BlobStore`].

use crate::blob::{BlobStore, CONTENT_TYPE, Metadata};
use crate::config::{ConfigSource, SaveOptions, StorageConfig};
use crate::error::{HookError, Result, StorageError, StorageErrorExt};
use crate::events::{LifecycleNotifier, StorageEvent, StorageEventKind};
use crate::file::FileRecord;
use crate::path;
use crate::shard::ShardIndexAllocator;
use private::Sealed;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

/// Length of generated file names, before the extension.
pub const RANDOM_NAME_LEN: usize = 32;

/// A stored file resolved for delivery to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Last path segment, suitable for a download file name.
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// The internal shared state of a [`StorageService`].
#[derive(Debug)]
pub struct ServiceInner<B> {
    pub(crate) store: B,
    pub(crate) allocator: ShardIndexAllocator,
    pub(crate) notifier: LifecycleNotifier<B>,
    pub(crate) default_metadata: ConfigSource,
    pub(crate) default_prefix: String,
    pub(crate) base_url: Option<String>,
}

/// Saves uploads into sharded directories of a [`BlobStore`] and deletes them,
/// firing lifecycle hooks around every mutation.
///
/// The handle is reference-counted and cheap to clone; clones share the store,
/// the shard state and the registered hooks.
///
/// # Example
///
/// ```rust
/// use filekit::{FileRecord, MemoryBlobStore, SaveOptions, StorageConfig, StorageService};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), filekit::StorageError> {
/// let service = StorageService::builder()
///     .store(MemoryBlobStore::new())
///     .config(StorageConfig { path_prefix: "uploads".into(), ..StorageConfig::default() })
///     .build()?;
///
/// let file = FileRecord::from_bytes("avatar.png", b"\x89PNG\r\n\x1a\n..".to_vec());
/// let path = service.save(file, &SaveOptions::new()).await?;
/// assert!(path.starts_with("uploads/1/"));
///
/// assert!(service.delete(&path).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StorageService<B> {
    inner: Arc<ServiceInner<B>>,
}

impl<B> Clone for StorageService<B> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<B> Deref for StorageService<B> {
    type Target = ServiceInner<B>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl StorageService<()> {
    #[must_use = "The service is not usable until you call .build()"]
    pub fn builder() -> StorageServiceBuilder {
        StorageServiceBuilder::new()
    }
}

impl<B: BlobStore> StorageService<B> {
    /// The backing store this service writes through.
    #[must_use]
    pub fn store(&self) -> &B {
        &self.store
    }

    #[must_use]
    pub fn notifier(&self) -> &LifecycleNotifier<B> {
        &self.notifier
    }

    #[must_use]
    pub fn allocator(&self) -> &ShardIndexAllocator {
        &self.allocator
    }

    /// Registers a lifecycle handler. See [`LifecycleNotifier::on`].
    pub fn on<F>(&self, kind: StorageEventKind, handler: F)
    where
        F: Fn(&StorageEvent<'_, B>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.notifier.on(kind, handler);
    }

    /// Shard index the next save under `prefix` would use.
    ///
    /// # Errors
    /// See [`ShardIndexAllocator::current_shard`].
    pub async fn current_shard(&self, prefix: &str) -> Result<Option<u64>> {
        self.allocator.current_shard(&self.store, prefix).await
    }

    /// Stores `file` and returns its store path (`prefix/shard/name`).
    ///
    /// Steps, in order:
    /// 1. Resolve the prefix and ask the allocator for the current shard.
    /// 2. Pick the name: the original one, or a random token plus the original
    ///    extension, regenerated while anything already exists at the candidate.
    /// 3. Without `overwrite`, refuse a destination that already holds a file.
    /// 4. Fire `BeforeSave`; a failing handler aborts before anything is written.
    /// 5. Merge metadata: detected `ContentType`, then the service defaults, then
    ///    the per-call options, later keys replacing earlier ones.
    /// 6. Stream the file into the store and fire `AfterSave`.
    ///
    /// # Errors
    ///
    /// - Backing store failures, including [`StorageError::WriteFailed`] when the
    ///   store refuses the write. No `AfterSave` is fired in that case.
    /// - [`StorageError::AlreadyExists`] for an occupied destination without `overwrite`.
    /// - [`StorageError::Observer`] when a handler fails. A failing `AfterSave`
    ///   handler leaves the written file in place.
    pub async fn save(&self, file: FileRecord, options: &SaveOptions) -> Result<String> {
        let prefix =
            path::normalize_prefix(options.prefix.as_deref().unwrap_or(&self.default_prefix))?;
        let shard = self.allocator.current_shard(&self.store, &prefix).await?;
        let shard = shard.map(|index| index.to_string()).unwrap_or_default();

        let path = if options.preserve_name {
            path::join([prefix.as_str(), shard.as_str(), preserved_name(&file)?])
        } else {
            self.unique_path(&prefix, &shard, file.extension()).await?
        };

        if !options.overwrite && self.store.file_exists(&path).await? {
            return Err(StorageError::AlreadyExists {
                message: path.into(),
                context: Some("Saving without overwrite".into()),
            });
        }

        self.notifier.dispatch(StorageEventKind::BeforeSave, &path, &self.store)?;

        let metadata = self.resolve_metadata(&file, &options.metadata).await?;
        let stream = file.open().await?;
        let written = self
            .store
            .write_stream(&path, stream, &metadata)
            .await
            .context(format!("Saving {}", file.original_name()))?;

        if !written {
            warn!(path = %path, name = file.original_name(), "Backing store refused the write");
            return Err(StorageError::WriteFailed {
                message: path.into(),
                context: Some(format!("Saving {}", file.original_name()).into()),
            });
        }

        self.notifier.dispatch(StorageEventKind::AfterSave, &path, &self.store)?;

        debug!(path = %path, name = file.original_name(), "File saved");
        Ok(path)
    }

    /// Saves each file in order with the same options; one failure does not stop
    /// the rest. Results line up with the input positions.
    pub async fn save_all(
        &self,
        files: impl IntoIterator<Item = FileRecord>,
        options: &SaveOptions,
    ) -> Vec<Result<String>> {
        let mut results = Vec::new();
        for file in files {
            results.push(self.save(file, options).await);
        }
        results
    }

    /// Deletes the file at `path`.
    ///
    /// Returns `Ok(false)` without firing any hook when no file exists there, and
    /// `Ok(false)` without `AfterDelete` when the store fails to delete it.
    ///
    /// # Errors
    ///
    /// Returns backing store failures from the existence check, and
    /// [`StorageError::Observer`] when a handler fails.
    pub async fn delete(&self, path: &str) -> Result<bool> {
        if !self.store.file_exists(path).await? {
            debug!(path, "Delete skipped, no such file");
            return Ok(false);
        }

        self.notifier.dispatch(StorageEventKind::BeforeDelete, path, &self.store)?;

        match self.store.delete(path).await {
            Ok(true) => {},
            Ok(false) => {
                warn!(path, "Backing store refused the delete");
                return Ok(false);
            },
            Err(err) => {
                warn!(path, error = %err, "Delete failed");
                return Ok(false);
            },
        }

        self.notifier.dispatch(StorageEventKind::AfterDelete, path, &self.store)?;

        debug!(path, "File deleted");
        Ok(true)
    }

    /// Deletes every path, ignoring individual outcomes.
    pub async fn delete_all<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        for path in paths {
            let path = path.as_ref();
            if let Err(err) = self.delete(path).await {
                warn!(path, error = %err, "Delete aborted");
            }
        }
    }

    /// Public URL of a stored path, when a base URL is configured.
    #[must_use]
    pub fn url(&self, path: &str) -> Option<String> {
        let base = self.base_url.as_deref()?;
        Some(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches(['/', '\\'])
        ))
    }

    /// Loads a stored file together with its name and MIME type, or `None` if
    /// there is no file at `path`.
    ///
    /// # Errors
    /// Returns backing store failures.
    pub async fn view(&self, path: &str) -> Result<Option<StoredObject>> {
        if !self.store.file_exists(path).await? {
            return Ok(None);
        }

        let data = self.store.read(path).await?;
        let mime_type = self.store.mime_type(path).await?;
        Ok(Some(StoredObject { name: path::file_name(path).to_owned(), mime_type, data }))
    }

    async fn unique_path(&self, prefix: &str, shard: &str, ext: Option<&str>) -> Result<String> {
        loop {
            let token = nanoid::nanoid!(RANDOM_NAME_LEN);
            let name = match ext {
                Some(ext) => format!("{token}.{ext}"),
                None => token,
            };
            let candidate = path::join([prefix, shard, name.as_str()]);

            if self.store.directory_exists(&candidate).await?
                || self.store.file_exists(&candidate).await?
            {
                debug!(path = %candidate, "Generated name collides, retrying");
                continue;
            }
            return Ok(candidate);
        }
    }

    async fn resolve_metadata(
        &self,
        file: &FileRecord,
        per_call: &ConfigSource,
    ) -> Result<Metadata> {
        let mut metadata = Metadata::new();
        metadata.insert(CONTENT_TYPE.to_owned(), file.mime_type().await?.to_owned());
        metadata.extend(self.default_metadata.resolve(file));
        metadata.extend(per_call.resolve(file));
        Ok(metadata)
    }
}

fn preserved_name(file: &FileRecord) -> Result<&str> {
    let name = path::file_name(file.original_name());
    if name.is_empty() || name == "." || name == ".." {
        return Err(StorageError::PathTraversalAttempt {
            message: file.original_name().to_owned().into(),
            context: Some("Original name is not a usable file name".into()),
        });
    }
    Ok(name)
}

#[derive(Debug, Default)]
pub struct NoStore;
#[derive(Debug)]
pub struct WithStore<B>(B);

mod private {
    pub(super) trait Sealed {}
}
impl Sealed for NoStore {}
impl<B> Sealed for WithStore<B> {}

/// Typestate builder for [`StorageService`]; a store must be supplied before `build`.
#[allow(private_bounds)]
#[derive(Debug, Default)]
pub struct StorageServiceBuilder<S: Sealed = NoStore> {
    state: S,
    config: StorageConfig,
    default_metadata: Option<ConfigSource>,
}

#[allow(private_bounds)]
impl<S: Sealed> StorageServiceBuilder<S> {
    #[must_use = "Sets the service configuration"]
    pub fn config(mut self, config: StorageConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides `default_metadata` from the configuration, e.g. with a computed source.
    #[must_use = "Sets the default write metadata"]
    pub fn default_metadata(mut self, source: impl Into<ConfigSource>) -> Self {
        self.default_metadata = Some(source.into());
        self
    }
}

impl StorageServiceBuilder<NoStore> {
    #[must_use = "Creates a new service builder with default configuration"]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "Sets the backing store"]
    pub fn store<B: BlobStore>(self, store: B) -> StorageServiceBuilder<WithStore<B>> {
        StorageServiceBuilder {
            state: WithStore(store),
            config: self.config,
            default_metadata: self.default_metadata,
        }
    }
}

impl<B: BlobStore> StorageServiceBuilder<WithStore<B>> {
    /// Validates the configuration and assembles the service.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] if the configuration is unusable.
    pub fn build(self) -> Result<StorageService<B>> {
        self.config.validate()?;
        let config = self.config;

        let default_prefix = path::normalize_prefix(&config.path_prefix)?;
        let default_metadata =
            self.default_metadata.unwrap_or(ConfigSource::Static(config.default_metadata));

        debug!(
            sharding = config.use_dirindex,
            max_dir_files = ?config.max_dir_files.max_entries(),
            prefix = %default_prefix,
            "Storage service configured"
        );

        Ok(StorageService {
            inner: Arc::new(ServiceInner {
                store: self.state.0,
                allocator: ShardIndexAllocator::new(config.use_dirindex, config.max_dir_files),
                notifier: LifecycleNotifier::new(),
                default_metadata,
                default_prefix,
                base_url: config.base_url,
            }),
        })
    }
}

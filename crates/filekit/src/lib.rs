//! Storage for uploaded files on top of any byte-addressable backend.
//!
//! The crate writes uploads through a pluggable [`BlobStore`] and spreads them
//! over numbered subdirectories so no single directory grows past a configured
//! number of entries.
//!
//! # Core Features
//!
//! - **Directory Sharding**: A `.dirindex` marker per prefix records the shard that
//!   receives new files; it advances once the shard is full.
//! - **Lifecycle Hooks**: Synchronous `BeforeSave`/`AfterSave`/`BeforeDelete`/`AfterDelete`
//!   handlers; a failing handler aborts the operation.
//! - **Layered Metadata**: Detected content type, service defaults and per-call
//!   options, each either static or computed from the file.
//! - **Backend Agnostic**: The service only talks to the [`BlobStore`] trait.
//!   [`MemoryBlobStore`] ships here; the local disk backend lives in `filekit-local`.
//!
//! # Architectural Overview
//!
//! 1.  **[`StorageService`]**: save/delete orchestration, built via [`StorageServiceBuilder`].
//! 2.  **[`ShardIndexAllocator`]**: owns the marker files.
//! 3.  **[`LifecycleNotifier`]**: the handler registration table.
//! 4.  **[`FileRecord`]**: a pending upload.
//!
//! # Example
//!
//! ```rust
//! use filekit::{
//!     FileRecord, MemoryBlobStore, SaveOptions, ShardLimit, StorageConfig, StorageEventKind,
//!     StorageService,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), filekit::StorageError> {
//! let config = StorageConfig { max_dir_files: ShardLimit::bounded(2)?, ..StorageConfig::default() };
//! let service = StorageService::builder().store(MemoryBlobStore::new()).config(config).build()?;
//!
//! service.on(StorageEventKind::AfterSave, |event| {
//!     assert!(event.path.starts_with("docs/"));
//!     Ok(())
//! });
//!
//! let options = SaveOptions::new().prefix("docs");
//! for name in ["a.txt", "b.txt", "c.txt"] {
//!     service.save(FileRecord::from_bytes(name, b"hello".to_vec()), &options).await?;
//! }
//!
//! assert_eq!(service.current_shard("docs").await?, Some(2));
//! # Ok(())
//! # }
//! ```

mod blob;
mod config;
mod error;
mod events;
mod file;
pub mod mime;
pub mod path;
mod service;
mod shard;

pub use blob::{BlobStore, CONTENT_TYPE, DirEntry, EntryKind, MemoryBlobStore, Metadata};
pub use config::{ConfigSource, DEFAULT_MAX_DIR_FILES, SaveOptions, ShardLimit, StorageConfig};
pub use error::{HookError, Result, StorageError, StorageErrorExt};
pub use events::{LifecycleNotifier, StorageEvent, StorageEventKind};
pub use file::{FileRecord, FileSource, FileStream};
pub use service::{
    RANDOM_NAME_LEN, ServiceInner, StorageService, StorageServiceBuilder, StoredObject,
};
pub use shard::{
    FIRST_SHARD, MARKER_NAME, ShardIndexAllocator, ShardState, decode_marker, encode_marker,
};

//! A sandboxed local-disk backend for `filekit`.
//!
//! [`LocalBlobStore`] maps `/`-separated store paths onto a directory tree and
//! implements [`filekit::BlobStore`], so a [`filekit::StorageService`] can shard
//! uploads straight onto the filesystem.
//!
//! # Core Features
//!
//! - **Sandbox Security**: Store paths are resolved against a canonical root; `..`
//!   escapes, absolute paths and symlinked parents pointing outside are rejected.
//! - **Atomic Writes**: Unique temp file, `fsync`, then `rename` over the target.
//! - **Transparent Compression**: Optional LZ4 block compression, undone on read
//!   and before MIME sniffing.
//! - **Self-Healing**: Stale temp files from crashed writes are removed on connect.
//!
//! Write metadata is accepted and logged but not persisted; MIME types are
//! sniffed from content.
//!
//! # Example
//!
//! ```rust
//! use filekit::{FileRecord, SaveOptions, ShardLimit, StorageConfig, StorageService};
//! use filekit_local::LocalBlobStore;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), filekit::StorageError> {
//! # let tmp = tempfile::tempdir().unwrap();
//! let store = LocalBlobStore::builder().root(tmp.path()).connect().await?;
//! let service = StorageService::builder()
//!     .store(store.clone())
//!     .config(StorageConfig { max_dir_files: ShardLimit::bounded(100)?, ..Default::default() })
//!     .build()?;
//!
//! let path = service
//!     .save(FileRecord::from_bytes("notes.txt", b"hi".to_vec()), &SaveOptions::new().prefix("docs"))
//!     .await?;
//! assert!(store.resolve(&path)?.starts_with(store.root().join("docs").join("1")));
//! # Ok(())
//! # }
//! ```

mod builder;
mod engine;
mod maintenance;
mod security;

pub use builder::LocalBlobStoreBuilder;
pub use engine::{Compression, LocalBlobStore, LocalInner};

//! Directory sharding.
//!
//! Every sharded prefix owns a `.dirindex` marker holding the decimal index of
//! the shard that receives new files. Files land in `{prefix}/{index}/`; once
//! that directory holds `max_dir_files` entries the marker is advanced and new
//! files start landing in the next shard. Existing files are never moved.
//!
//! The marker is read-modify-written without locking, so concurrent writers may
//! push a shard slightly past its bound. The bound is a soft one.

use crate::blob::{BlobStore, Metadata};
use crate::config::ShardLimit;
use crate::error::{Result, StorageError, StorageErrorExt};
use crate::path;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub const MARKER_NAME: &str = ".dirindex";
pub const FIRST_SHARD: u64 = 1;

/// The allocator's view of one prefix as of its last marker access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardState {
    pub prefix: String,
    pub current_index: u64,
    pub max_entries: ShardLimit,
}

/// Computes the shard new files under a prefix should be written to.
///
/// State is kept per prefix and reloaded from the marker on every call; the
/// allocator is the only component that reads or writes markers.
#[derive(Debug)]
pub struct ShardIndexAllocator {
    enabled: bool,
    limit: ShardLimit,
    states: Mutex<FxHashMap<String, ShardState>>,
}

impl ShardIndexAllocator {
    #[must_use]
    pub fn new(enabled: bool, limit: ShardLimit) -> Self {
        Self { enabled, limit, states: Mutex::new(FxHashMap::default()) }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn limit(&self) -> ShardLimit {
        self.limit
    }

    /// Store path of the marker for an already normalized prefix.
    #[must_use]
    pub fn marker_path(prefix: &str) -> String {
        path::join([prefix, MARKER_NAME])
    }

    /// Last state observed for `prefix`, if it was ever allocated.
    #[must_use]
    pub fn state(&self, prefix: &str) -> Option<ShardState> {
        let prefix = path::normalize_prefix(prefix).ok()?;
        self.states.lock().get(&prefix).cloned()
    }

    /// Returns the shard index for the next write under `prefix`, or `None` when
    /// sharding is disabled.
    ///
    /// Creates the marker with [`FIRST_SHARD`] on first use of a prefix and
    /// advances it when the current shard is full.
    ///
    /// # Errors
    ///
    /// Any backing store failure is returned as is. A marker that cannot be
    /// parsed yields [`StorageError::InvalidMarker`]. A refused marker write
    /// yields [`StorageError::WriteFailed`] and leaves the recorded state as it was.
    pub async fn current_shard<B: BlobStore>(&self, store: &B, prefix: &str) -> Result<Option<u64>> {
        if !self.enabled {
            return Ok(None);
        }

        let prefix = path::normalize_prefix(prefix)?;
        let marker = Self::marker_path(&prefix);

        if !store.file_exists(&marker).await? {
            persist_marker(store, &marker, FIRST_SHARD).await?;
            debug!(prefix = %prefix, "Initialized shard marker");
            self.record(&prefix, FIRST_SHARD);
            return Ok(Some(FIRST_SHARD));
        }

        let persisted = decode_marker(&store.read(&marker).await?)
            .context(format!("Reading {marker}"))?;
        let mut index = self.monotonic(&prefix, persisted);

        if let Some(max) = self.limit.max_entries() {
            let shard_dir = path::join([prefix.as_str(), index.to_string().as_str()]);
            let count = count_entries(store, &shard_dir).await?;

            if count >= max {
                let next = index.saturating_add(1);
                persist_marker(store, &marker, next).await?;
                info!(prefix = %prefix, from = index, to = next, count, max, "Shard full, advancing");
                index = next;
            }
        }

        self.record(&prefix, index);
        Ok(Some(index))
    }

    /// Guards against a marker that moved backwards behind our back.
    fn monotonic(&self, prefix: &str, persisted: u64) -> u64 {
        match self.states.lock().get(prefix) {
            Some(state) if state.current_index > persisted => {
                warn!(
                    prefix = %prefix,
                    persisted,
                    known = state.current_index,
                    "Shard marker went backwards, keeping the higher index"
                );
                state.current_index
            },
            _ => persisted,
        }
    }

    fn record(&self, prefix: &str, index: u64) {
        self.states
            .lock()
            .entry(prefix.to_owned())
            .and_modify(|s| s.current_index = s.current_index.max(index))
            .or_insert_with(|| ShardState {
                prefix: prefix.to_owned(),
                current_index: index,
                max_entries: self.limit,
            });
    }
}

async fn persist_marker<B: BlobStore>(store: &B, marker: &str, index: u64) -> Result<()> {
    let written = store.write(marker, encode_marker(index).as_bytes(), &Metadata::new()).await?;
    if written {
        Ok(())
    } else {
        Err(StorageError::WriteFailed {
            message: marker.to_owned().into(),
            context: Some(format!("Persisting shard index {index}").into()),
        })
    }
}

async fn count_entries<B: BlobStore>(store: &B, shard_dir: &str) -> Result<u64> {
    let entries = store.list_directory(shard_dir).await?;
    let count = entries.iter().filter(|e| path::file_name(&e.path) != MARKER_NAME).count();
    Ok(u64::try_from(count).unwrap_or(u64::MAX))
}

#[must_use]
pub fn encode_marker(index: u64) -> String {
    index.to_string()
}

/// # Errors
/// Returns [`StorageError::InvalidMarker`] unless the payload is a positive decimal integer.
pub fn decode_marker(raw: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(raw).map_err(|_| StorageError::InvalidMarker {
        message: "marker is not valid UTF-8".into(),
        context: None,
    })?;
    match text.trim().parse::<u64>() {
        Ok(index) if index >= FIRST_SHARD => Ok(index),
        _ => Err(StorageError::InvalidMarker {
            message: format!("{:?} is not a shard index", text.trim()).into(),
            context: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use proptest::prelude::*;

    fn bounded(max: u64) -> ShardLimit {
        ShardLimit::bounded(max).unwrap()
    }

    async fn put(store: &MemoryBlobStore, path: &str) {
        store.write(path, b"x", &Metadata::new()).await.unwrap();
    }

    #[tokio::test]
    async fn disabled_allocator_returns_none() {
        let store = MemoryBlobStore::new();
        let alloc = ShardIndexAllocator::new(false, bounded(2));
        assert_eq!(alloc.current_shard(&store, "uploads").await.unwrap(), None);
        assert_eq!(store.len(), 0, "no marker must be written");
    }

    #[tokio::test]
    async fn first_access_creates_marker() {
        let store = MemoryBlobStore::new();
        let alloc = ShardIndexAllocator::new(true, bounded(2));

        assert_eq!(alloc.current_shard(&store, "uploads/").await.unwrap(), Some(1));
        assert_eq!(store.read("uploads/.dirindex").await.unwrap(), b"1");
        assert_eq!(alloc.state("uploads").unwrap().current_index, 1);
    }

    #[test]
    fn recorded_index_never_decreases() {
        let alloc = ShardIndexAllocator::new(true, bounded(2));
        alloc.record("uploads", 5);
        alloc.record("uploads", 3);
        assert_eq!(alloc.state("uploads").unwrap().current_index, 5);

        alloc.record("uploads", 6);
        assert_eq!(alloc.state("uploads").unwrap().current_index, 6);
    }

    #[tokio::test]
    async fn root_prefix_marker_lives_at_root() {
        let store = MemoryBlobStore::new();
        let alloc = ShardIndexAllocator::new(true, bounded(2));
        assert_eq!(alloc.current_shard(&store, "").await.unwrap(), Some(1));
        assert!(store.file_exists(".dirindex").await.unwrap());
    }

    #[tokio::test]
    async fn advances_when_shard_is_full() {
        let store = MemoryBlobStore::new();
        let alloc = ShardIndexAllocator::new(true, bounded(2));

        assert_eq!(alloc.current_shard(&store, "uploads").await.unwrap(), Some(1));
        put(&store, "uploads/1/a").await;
        assert_eq!(alloc.current_shard(&store, "uploads").await.unwrap(), Some(1));
        put(&store, "uploads/1/b").await;
        assert_eq!(alloc.current_shard(&store, "uploads").await.unwrap(), Some(2));
        assert_eq!(store.read("uploads/.dirindex").await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn repeated_calls_without_writes_are_idempotent() {
        let store = MemoryBlobStore::new();
        let alloc = ShardIndexAllocator::new(true, bounded(3));
        put(&store, "p/1/a").await;
        alloc.current_shard(&store, "p").await.unwrap();

        let first = alloc.current_shard(&store, "p").await.unwrap();
        let second = alloc.current_shard(&store, "p").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unbounded_never_advances() {
        let store = MemoryBlobStore::new();
        let alloc = ShardIndexAllocator::new(true, ShardLimit::Unbounded);
        alloc.current_shard(&store, "u").await.unwrap();
        for i in 0..50 {
            put(&store, &format!("u/1/{i}")).await;
        }
        assert_eq!(alloc.current_shard(&store, "u").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn existing_marker_is_honored() {
        let store = MemoryBlobStore::new();
        store.write("media/.dirindex", b"41\n", &Metadata::new()).await.unwrap();
        let alloc = ShardIndexAllocator::new(true, bounded(10));
        assert_eq!(alloc.current_shard(&store, "media").await.unwrap(), Some(41));
    }

    #[tokio::test]
    async fn garbage_marker_is_rejected() {
        let store = MemoryBlobStore::new();
        store.write("media/.dirindex", b"zero", &Metadata::new()).await.unwrap();
        let alloc = ShardIndexAllocator::new(true, bounded(10));
        assert!(matches!(
            alloc.current_shard(&store, "media").await,
            Err(StorageError::InvalidMarker { .. })
        ));
    }

    #[tokio::test]
    async fn marker_moving_backwards_keeps_higher_index() {
        let store = MemoryBlobStore::new();
        let alloc = ShardIndexAllocator::new(true, bounded(100));
        store.write("m/.dirindex", b"5", &Metadata::new()).await.unwrap();
        assert_eq!(alloc.current_shard(&store, "m").await.unwrap(), Some(5));

        store.write("m/.dirindex", b"3", &Metadata::new()).await.unwrap();
        assert_eq!(alloc.current_shard(&store, "m").await.unwrap(), Some(5));
    }

    #[test]
    fn decode_rejects_zero_and_negative() {
        assert!(decode_marker(b"0").is_err());
        assert!(decode_marker(b"-1").is_err());
        assert!(decode_marker(b"").is_err());
        assert_eq!(decode_marker(b" 7 ").unwrap(), 7);
    }

    proptest! {
        #[test]
        fn marker_roundtrip(index in 1u64..=u64::MAX) {
            prop_assert_eq!(decode_marker(encode_marker(index).as_bytes()).unwrap(), index);
        }
    }
}

use crate::blob::Metadata;
use crate::error::{Result, StorageError};
use crate::file::FileRecord;
use serde::Deserialize;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

/// FAT32 allows at most 65535 entries per directory.
pub const DEFAULT_MAX_DIR_FILES: u64 = 65_535;

/// Upper bound on files per shard directory.
///
/// Deserializes from an integer where `-1` means unbounded; `0` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "i64")]
pub enum ShardLimit {
    Unbounded,
    Bounded(NonZeroU64),
}

impl ShardLimit {
    /// # Errors
    /// Returns [`StorageError::Configuration`] when `max` is zero.
    pub fn bounded(max: u64) -> Result<Self> {
        NonZeroU64::new(max).map(Self::Bounded).ok_or_else(|| StorageError::Configuration {
            message: "max_dir_files must be positive or -1 for unbounded".into(),
            context: None,
        })
    }

    #[must_use]
    pub const fn max_entries(self) -> Option<u64> {
        match self {
            Self::Unbounded => None,
            Self::Bounded(n) => Some(n.get()),
        }
    }
}

impl Default for ShardLimit {
    fn default() -> Self {
        Self::bounded(DEFAULT_MAX_DIR_FILES).unwrap_or(Self::Unbounded)
    }
}

impl TryFrom<i64> for ShardLimit {
    type Error = StorageError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            -1 => Ok(Self::Unbounded),
            n if n > 0 => Self::bounded(n.unsigned_abs()),
            n => Err(StorageError::Configuration {
                message: format!("max_dir_files = {n}").into(),
                context: Some("Expected a positive count or -1 for unbounded".into()),
            }),
        }
    }
}

/// Service configuration, typically deserialized from the application config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Shard files into numbered subdirectories tracked by `.dirindex` markers.
    pub use_dirindex: bool,
    pub max_dir_files: ShardLimit,
    /// Metadata applied to every save before per-call options.
    pub default_metadata: Metadata,
    /// Prefix used when a save does not name one.
    pub path_prefix: String,
    /// Public URL under which stored paths are served.
    pub base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            use_dirindex: true,
            max_dir_files: ShardLimit::default(),
            default_metadata: Metadata::new(),
            path_prefix: String::new(),
            base_url: None,
        }
    }
}

impl StorageConfig {
    /// # Errors
    /// Returns [`StorageError::Configuration`] for an unusable prefix or base URL.
    pub fn validate(&self) -> Result<()> {
        crate::path::normalize_prefix(&self.path_prefix).map_err(|e| {
            StorageError::Configuration {
                message: e.to_string().into(),
                context: Some("path_prefix".into()),
            }
        })?;

        if let Some(url) = &self.base_url
            && url.trim().is_empty()
        {
            return Err(StorageError::Configuration {
                message: "base_url must not be blank".into(),
                context: None,
            });
        }

        Ok(())
    }
}

type MetadataFn = dyn Fn(&FileRecord) -> Metadata + Send + Sync;

/// Metadata given either up front or computed from the file being saved.
#[derive(Clone)]
pub enum ConfigSource {
    Static(Metadata),
    Computed(Arc<MetadataFn>),
}

impl ConfigSource {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&FileRecord) -> Metadata + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(f))
    }

    #[must_use]
    pub fn resolve(&self, file: &FileRecord) -> Metadata {
        match self {
            Self::Static(map) => map.clone(),
            Self::Computed(f) => f(file),
        }
    }
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::Static(Metadata::new())
    }
}

impl From<Metadata> for ConfigSource {
    fn from(map: Metadata) -> Self {
        Self::Static(map)
    }
}

impl fmt::Debug for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(map) => f.debug_tuple("Static").field(map).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Per-call options for [`StorageService::save`](crate::StorageService::save).
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub(crate) preserve_name: bool,
    pub(crate) overwrite: bool,
    pub(crate) metadata: ConfigSource,
    pub(crate) prefix: Option<String>,
}

impl SaveOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the original file name instead of generating a random one.
    #[must_use = "Sets whether the original file name is kept"]
    pub const fn preserve_name(mut self, enable: bool) -> Self {
        self.preserve_name = enable;
        self
    }

    /// Replace an existing file at the destination instead of failing.
    #[must_use = "Sets whether an existing file may be replaced"]
    pub const fn overwrite(mut self, enable: bool) -> Self {
        self.overwrite = enable;
        self
    }

    /// Metadata merged last, over the defaults and the detected content type.
    #[must_use = "Sets per-call write metadata"]
    pub fn metadata(mut self, source: impl Into<ConfigSource>) -> Self {
        self.metadata = source.into();
        self
    }

    /// Directory under which the file is sharded.
    #[must_use = "Sets the destination prefix"]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_limit_deserializes_sentinel() {
        let unbounded: ShardLimit = serde_json::from_str("-1").unwrap();
        assert_eq!(unbounded, ShardLimit::Unbounded);

        let bounded: ShardLimit = serde_json::from_str("2").unwrap();
        assert_eq!(bounded.max_entries(), Some(2));

        assert!(serde_json::from_str::<ShardLimit>("0").is_err());
        assert!(serde_json::from_str::<ShardLimit>("-7").is_err());
    }

    #[test]
    fn config_defaults_are_sane() {
        let cfg = StorageConfig::default();
        assert!(cfg.use_dirindex);
        assert_eq!(cfg.max_dir_files.max_entries(), Some(DEFAULT_MAX_DIR_FILES));
        assert!(cfg.path_prefix.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_deserializes_partial() {
        let cfg: StorageConfig = serde_json::from_value(serde_json::json!({
            "max_dir_files": -1,
            "default_metadata": { "CacheControl": "max-age=60" },
            "base_url": "https://cdn.example.com/files"
        }))
        .unwrap();
        assert_eq!(cfg.max_dir_files, ShardLimit::Unbounded);
        assert!(cfg.use_dirindex);
        assert_eq!(cfg.default_metadata["CacheControl"], "max-age=60");
    }

    #[test]
    fn invalid_prefix_is_a_configuration_error() {
        let cfg = StorageConfig { path_prefix: "../outside".into(), ..StorageConfig::default() };
        assert!(matches!(cfg.validate(), Err(StorageError::Configuration { .. })));
    }

    #[test]
    fn computed_source_sees_the_file() {
        let source = ConfigSource::computed(|file| {
            let mut m = Metadata::new();
            m.insert("ContentDisposition".into(), format!("filename=\"{}\"", file.original_name()));
            m
        });
        let file = FileRecord::from_bytes("report.pdf", b"%PDF-".to_vec());
        assert_eq!(source.resolve(&file)["ContentDisposition"], "filename=\"report.pdf\"");
    }
}

use config::{Config, Environment, File};
use filekit::StorageConfig;
use filekit_local::Compression;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Base name of the optional settings file in the working directory (`filekit.toml`, ...).
const DEFAULT_FILE: &str = "filekit";
const ENV_PREFIX: &str = "FILEKIT";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    /// Directory the local store is rooted at.
    pub(crate) root: PathBuf,
    pub(crate) compression: Compression,
    pub(crate) storage: StorageConfig,
    pub(crate) log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage"),
            compression: Compression::None,
            storage: StorageConfig::default(),
            log: LogSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub(crate) struct LogSettings {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub(crate) level: String,
    pub(crate) console: bool,
    /// Rolling log files are written here when set.
    pub(crate) path: Option<PathBuf>,
    pub(crate) max_files: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".into(), console: true, path: None, max_files: 10 }
    }
}

/// Layers the settings file under `FILEKIT__` environment overrides.
///
/// An explicit `path` must exist. Without one, `filekit.{toml,yaml,json,...}` in
/// the working directory is used if present. Nested keys use a double
/// underscore: `FILEKIT__STORAGE__MAX_DIR_FILES=-1` maps to `storage.max_dir_files`.
pub(crate) fn load_settings(path: Option<&Path>) -> Result<Settings, config::ConfigError> {
    let file = path.map_or_else(
        || File::with_name(DEFAULT_FILE).required(false),
        |p| File::from(p).required(true),
    );

    Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .convert_case(config::Case::Snake)
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

use std::borrow::Cow;

/// Boxed failure raised by a lifecycle handler.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A specialized [`StorageError`] enum of this crate.
///
/// Every variant produced by a [`BlobStore`](crate::BlobStore) is a backing-store
/// failure and is propagated unchanged; `Configuration` and `Observer` are raised
/// by the service itself.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File not found{}: {message}", format_context(.context))]
    FileNotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("File already exists{}: {message}", format_context(.context))]
    AlreadyExists { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Path traversal security violation{}: {message}", format_context(.context))]
    PathTraversalAttempt { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Hardware I/O failure{}: {source}", format_context(.context))]
    Io { source: std::io::Error, context: Option<Cow<'static, str>> },

    #[error("Codec failure{}: {message}", format_context(.context))]
    Codec { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Invalid shard marker{}: {message}", format_context(.context))]
    InvalidMarker { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Write rejected by backing store{}: {message}", format_context(.context))]
    WriteFailed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Invalid configuration{}: {message}", format_context(.context))]
    Configuration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Lifecycle handler failed{}: {source}", format_context(.context))]
    Observer { source: HookError, context: Option<Cow<'static, str>> },
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

pub trait StorageErrorExt<T> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T>;
}

impl<T> StorageErrorExt<T> for Result<T> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        self.map_err(|mut e| {
            match &mut e {
                StorageError::FileNotFound { context: c, .. }
                | StorageError::AlreadyExists { context: c, .. }
                | StorageError::PathTraversalAttempt { context: c, .. }
                | StorageError::Io { context: c, .. }
                | StorageError::Codec { context: c, .. }
                | StorageError::InvalidMarker { context: c, .. }
                | StorageError::WriteFailed { context: c, .. }
                | StorageError::Configuration { context: c, .. }
                | StorageError::Observer { context: c, .. } => *c = Some(context.into()),
            }
            e
        })
    }
}

impl From<std::io::Error> for StorageError {
    #[inline]
    fn from(source: std::io::Error) -> Self {
        Self::Io { source, context: None }
    }
}

impl<T> StorageErrorExt<T> for std::result::Result<T, std::io::Error> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T> {
        self.map_err(|source| StorageError::Io { source, context: Some(context.into()) })
    }
}

impl From<HookError> for StorageError {
    #[inline]
    fn from(source: HookError) -> Self {
        Self::Observer { source, context: None }
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}

//! Logical store path helpers.
//!
//! Store paths are `/`-separated keys relative to the root of a
//! [`BlobStore`](crate::BlobStore), never host filesystem paths.

use crate::error::{Result, StorageError};

pub const SEPARATOR: char = '/';

/// Normalizes a caller-supplied prefix into a relative store path.
///
/// Both `/` and `\` are accepted as separators. Empty and `.` segments are
/// dropped and `..` is collapsed lexically. The empty string denotes the root.
///
/// # Errors
///
/// Returns [`StorageError::PathTraversalAttempt`] if a `..` segment would climb
/// above the root.
pub fn normalize_prefix(raw: &str) -> Result<String> {
    let mut out: Vec<&str> = Vec::new();

    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => {},
            ".." => {
                if out.pop().is_none() {
                    return Err(StorageError::PathTraversalAttempt {
                        message: raw.to_owned().into(),
                        context: Some("Prefix attempted to escape the store root via '..'".into()),
                    });
                }
            },
            seg => out.push(seg),
        }
    }

    Ok(out.join("/"))
}

/// Joins path segments with [`SEPARATOR`], omitting empty ones.
#[must_use]
pub fn join<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for segment in segments.into_iter().filter(|s| !s.is_empty()) {
        if !out.is_empty() {
            out.push(SEPARATOR);
        }
        out.push_str(segment);
    }
    out
}

/// Last segment of a store path.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Extension of a file name without the dot, lowercased. Dotfiles have none.
#[must_use]
pub fn extension(name: &str) -> Option<String> {
    let name = file_name(name);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) if idx + 1 == name.len() => None,
        Some(idx) => Some(name[idx + 1..].to_ascii_lowercase()),
    }
}

use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Infix of in-flight temporary files: `<name>.fktmp.<counter>`.
pub(crate) const TMP_INFIX: &str = ".fktmp.";

/// Default age after which a temporary file counts as abandoned.
pub(crate) const STALE_AFTER: Duration = Duration::from_secs(300);

/// Removes temporary files abandoned by interrupted writes.
///
/// Shard directories are left in place even when empty, so shard numbering
/// stays visible on disk.
pub(crate) async fn purge_tmp(root: &Path, stale_after: Duration) -> usize {
    let root = root.to_path_buf();
    let now = SystemTime::now();

    match tokio::task::spawn_blocking(move || remove_stale(&root, now, stale_after)).await {
        Ok((removed, failed)) => {
            if removed > 0 || failed > 0 {
                info!(removed, failed, "Cleaned up temporary files");
            }
            removed
        },
        Err(e) => {
            error!(error = %e, "Temp file cleanup task panicked");
            0
        },
    }
}

fn remove_stale(root: &Path, now: SystemTime, threshold: Duration) -> (usize, usize) {
    let mut removed = 0;
    let mut failed = 0;

    WalkDir::new(root)
        .into_iter()
        .flatten()
        .filter(|e| is_tmp(e) && is_stale(e, now, threshold))
        .for_each(|entry| match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove temp file");
                failed += 1;
            },
        });

    (removed, failed)
}

pub(crate) fn is_tmp_name(name: &str) -> bool {
    name.contains(TMP_INFIX)
}

fn is_tmp(entry: &DirEntry) -> bool {
    entry.file_type().is_file() && entry.file_name().to_str().is_some_and(is_tmp_name)
}

fn is_stale(entry: &DirEntry, now: SystemTime, threshold: Duration) -> bool {
    entry
        .metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|modified| now.duration_since(modified).ok())
        .is_none_or(|age| age > threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stale_temp_files_are_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let shard = tmp.path().join("uploads").join("1");
        std::fs::create_dir_all(&shard).unwrap();
        std::fs::write(shard.join("a.png"), b"keep").unwrap();
        std::fs::write(shard.join("b.png.fktmp.7"), b"partial").unwrap();

        let later = SystemTime::now() + Duration::from_secs(3600);
        assert_eq!(remove_stale(tmp.path(), later, STALE_AFTER), (1, 0));
        assert!(shard.join("a.png").exists());
        assert!(!shard.join("b.png.fktmp.7").exists());
    }

    #[test]
    fn fresh_temp_files_survive() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("c.bin.fktmp.1"), b"writing").unwrap();

        assert_eq!(remove_stale(tmp.path(), SystemTime::now(), STALE_AFTER), (0, 0));
        assert!(tmp.path().join("c.bin.fktmp.1").exists());
    }
}

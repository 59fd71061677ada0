use crate::cli::Command;
use anyhow::Context;
use filekit::{BlobStore, FileRecord, Metadata, SaveOptions, StorageEventKind, StorageService};
use std::io::Write;
use tracing::{info, warn};

/// Logs every completed mutation.
pub(crate) fn register_audit_hooks<B: BlobStore>(service: &StorageService<B>) {
    service.on(StorageEventKind::AfterSave, |event| {
        info!(path = event.path, "Stored");
        Ok(())
    });
    service.on(StorageEventKind::AfterDelete, |event| {
        info!(path = event.path, "Removed");
        Ok(())
    });
}

pub(crate) async fn run<B: BlobStore>(
    service: &StorageService<B>,
    command: Command,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Command::Save { files, prefix, keep_name, overwrite, metadata } => {
            let mut options = SaveOptions::new()
                .preserve_name(keep_name)
                .overwrite(overwrite)
                .metadata(metadata.into_iter().collect::<Metadata>());
            if let Some(prefix) = prefix {
                options = options.prefix(prefix);
            }

            let records = files.iter().map(FileRecord::from_path);
            let mut failed = 0usize;
            for (file, result) in files.iter().zip(service.save_all(records, &options).await) {
                match result {
                    Ok(path) => match service.url(&path) {
                        Some(url) => writeln!(out, "{path}\t{url}")?,
                        None => writeln!(out, "{path}")?,
                    },
                    Err(err) => {
                        warn!(file = %file.display(), error = %err, "Save failed");
                        failed += 1;
                    },
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} files could not be saved", files.len());
            }
        },
        Command::Delete { paths } => {
            for path in paths {
                let deleted = service.delete(&path).await?;
                writeln!(out, "{}\t{path}", if deleted { "deleted" } else { "missing" })?;
            }
        },
        Command::Shard { prefix } => match service.current_shard(&prefix).await? {
            Some(index) => writeln!(out, "{index}")?,
            None => writeln!(out, "unsharded")?,
        },
        Command::View { path, output } => {
            let object = service
                .view(&path)
                .await?
                .with_context(|| format!("No file stored at '{path}'"))?;

            writeln!(out, "name\t{}", object.name)?;
            writeln!(out, "type\t{}", object.mime_type)?;
            writeln!(out, "size\t{}", object.data.len())?;
            if let Some(url) = service.url(&path) {
                writeln!(out, "url\t{url}")?;
            }
            if let Some(output) = output {
                tokio::fs::write(&output, &object.data)
                    .await
                    .with_context(|| format!("Failed to write {}", output.display()))?;
            }
        },
    }

    Ok(())
}

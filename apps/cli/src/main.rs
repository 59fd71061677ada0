//! Command line front end for a local-disk `filekit` store.

mod cli;
mod commands;
mod logger;
mod settings;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use filekit::StorageService;
use filekit_local::LocalBlobStore;
use logger::Logger;
use settings::load_settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings =
        load_settings(cli.config.as_deref()).context("Critical: Configuration is malformed")?;
    let _log = Logger::init(env!("CARGO_PKG_NAME"), &settings.log, cli.verbose)?;

    let root = cli.root.unwrap_or(settings.root);
    let store = LocalBlobStore::builder()
        .root(&root)
        .compression(settings.compression)
        .connect()
        .await
        .with_context(|| format!("Failed to open store at {}", root.display()))?;

    let service = StorageService::builder().store(store).config(settings.storage).build()?;
    commands::register_audit_hooks(&service);

    let mut stdout = std::io::stdout().lock();
    commands::run(&service, cli.command, &mut stdout).await
}

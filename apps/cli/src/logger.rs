use crate::settings::LogSettings;
use anyhow::{Context, bail};
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_FILE_SUFFIX: &str = "log";

/// Keeps the non-blocking file writer alive; drop it only at shutdown.
#[must_use = "Dropping this handle will stop background logging threads."]
#[derive(Debug)]
pub(crate) struct Logger {
    guard: Option<WorkerGuard>,
}

impl Logger {
    /// Installs the global subscriber: a compact console layer on stderr and,
    /// when a path is configured, a daily rolling file.
    ///
    /// `verbose` raises the default directive to `debug` (1) or `trace` (2+).
    /// `RUST_LOG` still wins when set.
    pub(crate) fn init(name: &str, settings: &LogSettings, verbose: u8) -> anyhow::Result<Self> {
        if settings.max_files == 0 {
            bail!("log.max_files must be greater than zero");
        }

        let directive = match verbose {
            0 => settings.level.as_str(),
            1 => "debug",
            _ => "trace",
        };
        let env_filter = EnvFilter::builder()
            .parse(directive)
            .with_context(|| format!("Invalid log filter '{directive}'"))?;
        let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(raw) if !raw.trim().is_empty() => EnvFilter::builder().parse_lossy(raw),
            _ => env_filter,
        };

        let mut layers = Vec::new();

        if settings.console {
            layers.push(layer().compact().with_writer(std::io::stderr).with_ansi(true).boxed());
        }

        let guard = if let Some(path) = &settings.path {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create log directory {}", path.display()))?;

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(name)
                .filename_suffix(LOG_FILE_SUFFIX)
                .max_log_files(settings.max_files)
                .build(path)
                .context("Failed to configure rolling log file")?;

            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            layers.push(layer().with_writer(non_blocking).with_ansi(false).boxed());
            Some(guard)
        } else {
            None
        };

        if layers.is_empty() {
            bail!("No logging layers enabled. Enable console or file output.");
        }

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layers)
            .try_init()
            .context("Tracing subscriber already installed")?;

        Ok(Self { guard })
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if self.guard.is_some() {
            tracing::debug!("Logging system shutting down, flushing buffers...");
        }
    }
}

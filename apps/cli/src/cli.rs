use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "filekit", version, about = "Store uploads in sharded directories")]
pub(crate) struct Cli {
    /// Settings file; defaults to `filekit.*` in the working directory when present.
    #[arg(long, short, env = "FILEKIT_CONFIG", global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Overrides the storage root from the settings.
    #[arg(long, global = true)]
    pub(crate) root: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(long, short, action = ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Store local files and print their store paths.
    Save {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Directory prefix inside the store.
        #[arg(long)]
        prefix: Option<String>,

        /// Keep the original file name instead of generating one.
        #[arg(long)]
        keep_name: bool,

        /// Replace an existing file at the destination.
        #[arg(long)]
        overwrite: bool,

        /// Extra write metadata, repeatable.
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        metadata: Vec<(String, String)>,
    },
    /// Delete stored files.
    Delete {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Print the shard that receives the next file under a prefix.
    Shard {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Show a stored file, optionally copying its contents out.
    View {
        path: String,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) =
        raw.split_once('=').ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

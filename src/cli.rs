use clap::{Args, Parser, Subcommand};

use crate::types::{LogLevel, Permission};

#[derive(Parser, Debug)]
#[command(
    name = "flickr-backup-rs",
    version,
    about = "Back up a Flickr photo collection with albums, metadata and reports"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Automatic retries for transient API failures
    #[arg(long, default_value_t = 1, global = true)]
    pub max_retries: u32,

    /// Seconds to wait before a retry
    #[arg(long, default_value_t = 2, global = true)]
    pub retry_delay: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download every photo into album folders with metadata sidecars
    Backup(BackupArgs),

    /// Export photo metadata to a CSV file
    ExportCsv(ExportCsvArgs),

    /// Show view statistics and the most popular photos
    Stats(StatsArgs),

    /// Summarize the completion ledger of a backup directory
    Status(StatusArgs),
}

/// Arguments shared by every command that talks to the API.
#[derive(Args, Debug, Clone)]
pub struct AuthArgs {
    /// Flickr API key
    #[arg(short = 'k', long = "key", env = "FLICKR_API_KEY")]
    pub api_key: String,

    /// Flickr API secret.
    /// WARNING: passing via --secret is visible in process listings.
    /// Prefer the FLICKR_API_SECRET environment variable instead.
    #[arg(short = 's', long = "secret", env = "FLICKR_API_SECRET")]
    pub api_secret: String,

    /// Where access tokens are persisted
    #[arg(short = 't', long, default_value = "~/.flickr_backup_tokens.json")]
    pub token_file: String,

    /// Discard saved tokens and authorize again
    #[arg(long)]
    pub reauth: bool,

    /// Permission scope requested when authorizing
    #[arg(long, value_enum, default_value = "read")]
    pub permission: Permission,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Local directory for the backup
    #[arg(short = 'd', long, default_value = "./flickr_backup")]
    pub directory: String,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Do not write title and date into downloaded JPEG files
    #[arg(long)]
    pub skip_metadata_embed: bool,
}

#[derive(Args, Debug)]
pub struct ExportCsvArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Output CSV file
    #[arg(short = 'o', long, default_value = "flickr_photos.csv")]
    pub output: String,

    /// Fetch camera EXIF data for every photo (one extra call per photo)
    #[arg(long)]
    pub exif: bool,

    /// Skip the per-photo detail call (privacy, location, comments)
    #[arg(long)]
    pub skip_detail: bool,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Number of popular photos to show
    #[arg(long, default_value_t = 20)]
    pub top: usize,

    /// Write the report as JSON to this file
    #[arg(short = 'o', long)]
    pub output: Option<String>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Backup directory to inspect
    #[arg(short = 'd', long, default_value = "./flickr_backup")]
    pub directory: String,

    /// Check that every recorded file still exists and is non-empty
    #[arg(long)]
    pub verify: bool,
}

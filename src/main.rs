//! flickr-backup-rs: incremental, resumable backup of a Flickr account.
//!
//! Authorizes with OAuth 1.0a, mirrors every photo into per-album folders
//! with JSON metadata sidecars, and records finished items in an on-disk
//! ledger so interrupted runs resume without repeating work. Also exports a
//! CSV catalogue and view statistics.

#![warn(clippy::all)]

mod api;
mod auth;
mod cli;
mod config;
mod download;
mod flickr;
mod persist;
mod report;
pub mod retry;
mod shutdown;
mod state;
mod types;

use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use api::error::ApiError;
use api::ResilientApiClient;
use auth::credentials::CredentialStore;
use auth::endpoints::Endpoints;
use auth::error::AuthError;
use auth::{AuthSession, OAuthAuthorizer, VerifierProvider};
use cli::Command;
use config::{expand_tilde, Config};
use download::error::SyncError;
use download::{BackupConfig, SyncOrchestrator};
use flickr::PhotosService;
use report::ReportError;
use state::CompletionLedger;

/// Exit status for a run stopped by the service's rate limit.
const EXIT_RATE_LIMITED: i32 = 2;

/// Create the backup directory and pick a timestamped log file inside it.
fn backup_log_path(directory: &str) -> anyhow::Result<PathBuf> {
    let dir = expand_tilde(directory);
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join(format!(
        "flickr_backup_{}.log",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    )))
}

/// Console logging always; a plain-text copy in `log_file` when given.
/// `RUST_LOG` overrides `--log-level`.
fn init_logging(level: types::LogLevel, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()?;
    Ok(())
}

/// Ask the operator for the verifier code on the terminal. Returns `None`
/// when stdin is not interactive so the handshake fails with a clear
/// instruction instead of hanging.
fn terminal_verifier() -> VerifierProvider {
    Box::new(|url: &str| {
        if !std::io::stdin().is_terminal() {
            return None;
        }
        tokio::task::block_in_place(|| {
            let rule = "=".repeat(70);
            println!("\n{}", rule);
            println!("Please authorize this application:");
            println!("{}", url);
            println!("{}", rule);
            print!("\nEnter the verification code: ");
            std::io::stdout().flush().ok()?;

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).ok()?;
            Some(line)
        })
    })
}

fn connect(config: &Config) -> anyhow::Result<(ResilientApiClient, AuthSession)> {
    let authorizer = OAuthAuthorizer::new(
        &config.api_key,
        &config.api_secret,
        Endpoints::flickr(),
        config.api_timeout,
        config.download_timeout,
    )?;
    let store = CredentialStore::new(config.token_file.clone(), &config.api_key);
    let session = AuthSession::new(
        Box::new(authorizer),
        store,
        config.permission,
        terminal_verifier(),
    )
    .force_reauth(config.reauth);
    Ok((ResilientApiClient::new(config.retry), session))
}

async fn authenticated_service(config: &Config) -> anyhow::Result<PhotosService> {
    let (mut client, mut session) = connect(config)?;
    session.ensure_authenticated(&mut client).await?;
    Ok(PhotosService::new(client))
}

/// Absolute form of the backup directory, created if missing. Ledger
/// entries record paths under it, so they must not depend on the working
/// directory of the run.
fn resolve_backup_dir(raw: &str) -> anyhow::Result<PathBuf> {
    let directory = expand_tilde(raw);
    std::fs::create_dir_all(&directory)
        .with_context(|| format!("Creating backup directory {}", directory.display()))?;
    directory
        .canonicalize()
        .with_context(|| format!("Resolving backup directory {}", directory.display()))
}

async fn run_backup(
    args: cli::BackupArgs,
    max_retries: u32,
    retry_delay: u64,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let config = Config::from_cli(&args.auth, max_retries, retry_delay)?;
    let directory = resolve_backup_dir(&args.directory)?;
    tracing::info!(directory = %directory.display(), "Starting flickr-backup-rs backup");
    tracing::debug!(?config, "Resolved configuration");

    let (client, mut session) = connect(&config)?;
    let ledger = CompletionLedger::open(&directory).await?;
    tracing::info!(
        "Ledger {} holds {} completed items",
        ledger.path().display(),
        ledger.len()
    );

    let mut orchestrator = SyncOrchestrator::new(
        PhotosService::new(client),
        ledger,
        BackupConfig {
            directory,
            embed_metadata: !args.skip_metadata_embed,
            no_progress_bar: args.no_progress_bar,
        },
        shutdown,
    );
    let summary = orchestrator.run(&mut session).await?;
    if summary.failed > 0 {
        tracing::warn!(
            "{} items failed and will be retried on the next run",
            summary.failed
        );
    }
    Ok(())
}

async fn run_export_csv(
    args: cli::ExportCsvArgs,
    max_retries: u32,
    retry_delay: u64,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let config = Config::from_cli(&args.auth, max_retries, retry_delay)?;
    let service = authenticated_service(&config).await?;
    let options = report::export::ExportOptions {
        output: expand_tilde(&args.output),
        fetch_exif: args.exif,
        skip_detail: args.skip_detail,
    };
    let summary = report::export::export_csv(&service, &options, &shutdown).await?;
    summary.log();
    Ok(())
}

async fn run_stats(
    args: cli::StatsArgs,
    max_retries: u32,
    retry_delay: u64,
) -> anyhow::Result<()> {
    let config = Config::from_cli(&args.auth, max_retries, retry_delay)?;
    let service = authenticated_service(&config).await?;
    let options = report::stats::StatsOptions {
        top: args.top,
        output: args.output.as_deref().map(expand_tilde),
    };
    let stats = report::stats::gather_stats(&service, &options).await?;
    print!("{}", stats.render());
    Ok(())
}

/// Run the status command.
fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let directory = expand_tilde(&args.directory);
    let ledger_path = directory.join(state::ledger::LEDGER_FILE);
    if !ledger_path.exists() {
        println!("No ledger found at {}", ledger_path.display());
        println!("Run a backup first to create it.");
        return Ok(());
    }

    let ledger = CompletionLedger::open_read_only(&directory)?;
    println!("Ledger: {}", ledger.path().display());
    println!();
    println!("Completed items: {}", ledger.len());

    let mut folders: Vec<(String, usize)> = download::folder_counts(&ledger).into_iter().collect();
    folders.sort();
    for (folder, count) in &folders {
        println!("  {:<40} {}", folder, count);
    }

    if let Some(last) = ledger.iter().filter_map(|(_, e)| e.completed_at).max() {
        println!();
        println!("Last completed: {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if args.verify {
        println!();
        println!("Verifying {} items...", ledger.len());
        let report = ledger.verify();
        for (id, path) in &report.missing {
            println!("MISSING: {} ({})", path.display(), id);
        }
        for (id, path) in &report.empty {
            println!("EMPTY:   {} ({})", path.display(), id);
        }
        println!();
        println!("Results:");
        println!("  Verified: {}", report.verified);
        println!("  Missing:  {}", report.missing.len());
        println!("  Empty:    {}", report.empty.len());

        if !report.is_clean() {
            std::process::exit(1);
        }
    }
    Ok(())
}

/// Whether any error in the chain is a rate limit.
fn is_rate_limited(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(e) = cause.downcast_ref::<ApiError>() {
            return e.is_rate_limited();
        }
        if let Some(e) = cause.downcast_ref::<SyncError>() {
            return e.is_rate_limited();
        }
        match cause.downcast_ref::<AuthError>() {
            Some(AuthError::RateLimited(_)) => return true,
            Some(AuthError::Api(e)) => return e.is_rate_limited(),
            _ => {}
        }
        matches!(
            cause.downcast_ref::<ReportError>(),
            Some(ReportError::Api(e)) if e.is_rate_limited()
        )
    })
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if is_rate_limited(err) {
        EXIT_RATE_LIMITED
    } else {
        1
    }
}

fn report_failure(err: &anyhow::Error) {
    if is_rate_limited(err) {
        let rule = "=".repeat(70);
        tracing::error!("{}", rule);
        tracing::error!("Rate limit exceeded (HTTP 429)");
        tracing::error!("Flickr API has rejected the request due to too many requests.");
        tracing::error!("Please wait and try again later.");
        tracing::error!("{}", rule);
    } else {
        tracing::error!("{:#}", err);
    }
}

async fn run(cli: cli::Cli) -> anyhow::Result<()> {
    let (max_retries, retry_delay) = (cli.max_retries, cli.retry_delay);
    match cli.command {
        Command::Status(args) => run_status(args),
        Command::Backup(args) => {
            let shutdown = shutdown::install_signal_handler()?;
            run_backup(args, max_retries, retry_delay, shutdown).await
        }
        Command::ExportCsv(args) => {
            let shutdown = shutdown::install_signal_handler()?;
            run_export_csv(args, max_retries, retry_delay, shutdown).await
        }
        Command::Stats(args) => run_stats(args, max_retries, retry_delay).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    let log_file = match &cli.command {
        Command::Backup(args) => match backup_log_path(&args.directory) {
            Ok(path) => Some(path),
            Err(e) => {
                eprintln!("Could not prepare log file: {}", e);
                None
            }
        },
        _ => None,
    };
    if let Err(e) = init_logging(cli.log_level, log_file.as_deref()) {
        eprintln!("Could not initialise logging: {}", e);
    }
    if let Some(path) = &log_file {
        tracing::info!("Logging to {}", path.display());
    }

    if let Err(e) = run(cli).await {
        report_failure(&e);
        std::process::exit(exit_code_for(&e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_backup_dir_is_absolute() {
        let base = std::env::temp_dir()
            .join("flickr_backup_tests")
            .join("main")
            .join("resolve");
        let _ = std::fs::remove_dir_all(&base);
        let nested = base.join("a").join("..").join("backup");

        let resolved = resolve_backup_dir(&nested.to_string_lossy()).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.is_dir());
        assert_eq!(resolved, base.join("backup").canonicalize().unwrap());
        assert!(!resolved.components().any(|c| c == std::path::Component::ParentDir));
    }

    #[test]
    fn test_exit_code_rate_limited_api_error() {
        let err = anyhow::Error::new(ApiError::rate_limited("HTTP 429"));
        assert_eq!(exit_code_for(&err), EXIT_RATE_LIMITED);
    }

    #[test]
    fn test_exit_code_rate_limited_sync_error() {
        let err = anyhow::Error::new(SyncError::RateLimited("HTTP 429".into()));
        assert_eq!(exit_code_for(&err), EXIT_RATE_LIMITED);
    }

    #[test]
    fn test_exit_code_rate_limited_during_auth() {
        let err = anyhow::Error::new(AuthError::RateLimited("HTTP 429".into()));
        assert_eq!(exit_code_for(&err), EXIT_RATE_LIMITED);

        let err = anyhow::Error::new(AuthError::Api(ApiError::rate_limited("HTTP 429")));
        assert_eq!(exit_code_for(&err), EXIT_RATE_LIMITED);
    }

    #[test]
    fn test_exit_code_rate_limited_report_error() {
        let err = anyhow::Error::new(ReportError::Api(ApiError::rate_limited("HTTP 429")));
        assert_eq!(exit_code_for(&err), EXIT_RATE_LIMITED);
    }

    #[test]
    fn test_exit_code_rate_limit_with_context() {
        let err = anyhow::Error::new(ApiError::rate_limited("HTTP 429")).context("listing albums");
        assert_eq!(exit_code_for(&err), EXIT_RATE_LIMITED);
    }

    #[test]
    fn test_exit_code_other_failures() {
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), 1);
        assert_eq!(exit_code_for(&anyhow::Error::new(SyncError::Interrupted)), 1);
        assert_eq!(
            exit_code_for(&anyhow::Error::new(ApiError::auth("code 98"))),
            1
        );
    }

    #[test]
    fn test_backup_log_path_is_timestamped() {
        let dir = std::env::temp_dir()
            .join("flickr_backup_tests")
            .join("main_log");
        let path = backup_log_path(dir.to_str().unwrap()).unwrap();
        assert!(dir.is_dir());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("flickr_backup_"));
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "flickr_backup_20240101_120000.log".len());
    }
}

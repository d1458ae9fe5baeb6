//! Backup engine: walks every album, then the items no album claims, and
//! brings each item to "asset + sidecar on disk, recorded in the ledger".
//! Items are handled one at a time; the ledger is consulted before any
//! network call so a finished item costs nothing on later runs.

pub mod error;
pub mod exif;
pub mod paths;

use std::collections::{HashMap, HashSet};
use std::fs::FileTimes;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{Local, NaiveDateTime, TimeZone};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use self::error::{DownloadError, SyncError};
use self::exif::EmbeddedMetadata;
use crate::auth::AuthSession;
use crate::flickr::types::{Photo, PhotoDetails};
use crate::flickr::{PhotosService, BACKUP_EXTRAS};
use crate::persist;
use crate::report::membership::MembershipReport;
use crate::state::CompletionLedger;

/// Subset of application config consumed by the backup engine.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub directory: PathBuf,
    pub embed_metadata: bool,
    pub no_progress_bar: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSummary {
    pub processed: usize,
    pub downloaded: usize,
    pub already_present: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Ledgered,
    Downloaded,
    Adopted,
    NoOriginal,
}

pub struct SyncOrchestrator {
    service: PhotosService,
    ledger: CompletionLedger,
    config: BackupConfig,
    shutdown: CancellationToken,
    membership: MembershipReport,
    handled: HashSet<String>,
    summary: BackupSummary,
}

impl SyncOrchestrator {
    pub fn new(
        service: PhotosService,
        ledger: CompletionLedger,
        config: BackupConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            service,
            ledger,
            config,
            shutdown,
            membership: MembershipReport::new(),
            handled: HashSet::new(),
            summary: BackupSummary::default(),
        }
    }

    pub fn summary(&self) -> &BackupSummary {
        &self.summary
    }

    /// Authenticate, then back up the whole collection. The summary is
    /// logged whether the run finishes or aborts.
    pub async fn run(&mut self, auth: &mut AuthSession) -> Result<BackupSummary, SyncError> {
        let started = Instant::now();
        let result = match auth.ensure_authenticated(self.service.client_mut()).await {
            Ok(()) => self.sync().await,
            Err(e) => Err(e.into()),
        };
        self.summary.elapsed = started.elapsed();
        self.log_summary(result.as_ref().err());
        result.map(|()| self.summary.clone())
    }

    async fn sync(&mut self) -> Result<(), SyncError> {
        let all_photos = self.service.all_photos(BACKUP_EXTRAS).await?;
        let albums = self.service.albums().await?;
        self.check_cancelled()?;

        let pb = create_progress_bar(self.config.no_progress_bar, all_photos.len() as u64);

        for album in &albums {
            self.check_cancelled()?;
            let title = album.title.content.as_str();
            let folder = self
                .config
                .directory
                .join(paths::album_folder_name(title, &album.id));
            tokio::fs::create_dir_all(&folder).await?;

            let members = self.service.album_photos(&album.id, BACKUP_EXTRAS).await?;
            pb.suspend(|| {
                tracing::info!("Album \"{}\": {} items", title, members.len());
            });
            for photo in &members {
                self.membership.add(title, &photo.id);
            }
            for photo in &members {
                self.check_cancelled()?;
                self.handle(photo, &folder, &pb).await?;
            }
        }

        let unsorted: Vec<&Photo> = all_photos
            .iter()
            .filter(|p| !self.membership.is_member(&p.id))
            .collect();
        if !unsorted.is_empty() {
            let folder = self.config.directory.join(paths::UNSORTED_FOLDER);
            tokio::fs::create_dir_all(&folder).await?;
            pb.suspend(|| {
                tracing::info!("{} items are in no album", unsorted.len());
            });
            for photo in unsorted {
                self.check_cancelled()?;
                self.membership.add_unsorted(&photo.id);
                self.handle(photo, &folder, &pb).await?;
            }
        }
        pb.finish_and_clear();

        match self.membership.write(&self.config.directory).await {
            Ok(path) => tracing::info!("Album membership written to {}", path.display()),
            Err(e) => tracing::warn!("Failed to write album membership report: {}", e),
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.shutdown.is_cancelled() {
            Err(SyncError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Process one item the first time it is met this run and update the
    /// counters. Later sightings from other albums only add membership.
    async fn handle(
        &mut self,
        photo: &Photo,
        folder: &Path,
        pb: &ProgressBar,
    ) -> Result<(), SyncError> {
        if !self.handled.insert(photo.id.clone()) {
            return Ok(());
        }
        self.summary.processed += 1;

        match self.process_item(photo, folder).await {
            Ok(ItemOutcome::Ledgered) => self.summary.already_present += 1,
            Ok(ItemOutcome::Adopted) => {
                pb.suspend(|| tracing::info!(id = %photo.id, "Recorded existing file"));
                self.summary.already_present += 1;
            }
            Ok(ItemOutcome::Downloaded) => {
                pb.suspend(|| tracing::info!(id = %photo.id, title = %photo.title, "Downloaded"));
                self.summary.downloaded += 1;
            }
            Ok(ItemOutcome::NoOriginal) => {
                pb.suspend(|| {
                    tracing::warn!(id = %photo.id, "No original URL available, skipping")
                });
                self.summary.skipped += 1;
            }
            Err(e) if e.is_fatal() => {
                pb.finish_and_clear();
                return Err(e.into());
            }
            Err(e) => {
                pb.suspend(|| tracing::error!(id = %photo.id, "Failed: {}", e));
                self.summary.failed += 1;
            }
        }
        pb.inc(1);
        Ok(())
    }

    async fn process_item(
        &mut self,
        photo: &Photo,
        folder: &Path,
    ) -> Result<ItemOutcome, DownloadError> {
        if self.ledger.is_complete(&photo.id) {
            return Ok(ItemOutcome::Ledgered);
        }

        let final_path = folder.join(paths::asset_filename(
            &photo.id,
            photo.originalformat.as_deref(),
        ));
        let part = paths::part_path(&final_path);

        let existing = tokio::fs::metadata(&final_path)
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);

        let outcome = if existing {
            let details = self.service.photo_info(&photo.id).await?;
            self.finalize(&photo.id, &details, None, &final_path).await?;
            ItemOutcome::Adopted
        } else {
            let Some(url) = photo.url_o.as_deref().filter(|u| !u.is_empty()) else {
                return Ok(ItemOutcome::NoOriginal);
            };
            tracing::debug!(id = %photo.id, path = %final_path.display(), "downloading");
            if let Err(e) = self.service.download(url, &part).await {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e.into());
            }

            let details = match self.service.photo_info(&photo.id).await {
                Ok(d) => d,
                Err(e) => {
                    // The asset itself is complete; keep it so the next run
                    // only has to fetch metadata.
                    tokio::fs::rename(&part, &final_path).await?;
                    return Err(e.into());
                }
            };
            self.finalize(&photo.id, &details, Some(&part), &final_path)
                .await?;
            ItemOutcome::Downloaded
        };

        if let Err(e) = self.ledger.mark_complete(&photo.id, &final_path).await {
            tracing::warn!(id = %photo.id, "Could not record completion: {}", e);
        }
        Ok(outcome)
    }

    /// Embed metadata, move the asset under its final name, write the
    /// sidecar and stamp the mtime. `staged` is the freshly downloaded
    /// `.part` file, or `None` when the asset is already at `final_path`.
    async fn finalize(
        &self,
        photo_id: &str,
        details: &PhotoDetails,
        staged: Option<&Path>,
        final_path: &Path,
    ) -> Result<(), DownloadError> {
        let meta = EmbeddedMetadata::from_details(details);
        let embed = self.config.embed_metadata && paths::is_jpeg(final_path) && !meta.is_empty();

        let staged: Option<PathBuf> = match staged {
            Some(p) => Some(p.to_path_buf()),
            None if embed => {
                let part = paths::part_path(final_path);
                tokio::fs::copy(final_path, &part).await?;
                Some(part)
            }
            None => None,
        };

        if let Some(part) = &staged {
            if embed {
                let path = part.clone();
                let embedded =
                    tokio::task::spawn_blocking(move || exif::embed_metadata(&path, &meta)).await;
                match embedded {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(id = %photo_id, "Failed to embed metadata: {:#}", e)
                    }
                    Err(e) => tracing::warn!("Metadata task panicked: {}", e),
                }
            }
            tokio::fs::rename(part, final_path).await?;
        }

        let sidecar = paths::sidecar_path(final_path);
        let json = serde_json::to_vec_pretty(details.raw())?;
        persist::write_atomic_async(sidecar, json, false).await?;

        if let Some(ts) = capture_timestamp(details) {
            let mtime_path = final_path.to_path_buf();
            match tokio::task::spawn_blocking(move || set_file_mtime(&mtime_path, ts)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    "Could not set mtime on {}: {}",
                    final_path.display(),
                    e
                ),
                Err(e) => tracing::warn!("mtime task panicked: {}", e),
            }
        }
        Ok(())
    }

    fn log_summary(&self, error: Option<&SyncError>) {
        let s = &self.summary;
        tracing::info!("── Summary ──");
        tracing::info!(
            "  {} processed, {} downloaded, {} already present, {} skipped, {} failed",
            s.processed,
            s.downloaded,
            s.already_present,
            s.skipped,
            s.failed
        );
        tracing::info!("  elapsed: {}", format_duration(s.elapsed));
        tracing::info!("  ledger: {} items in {}", self.ledger.len(), self.ledger.path().display());
        match error {
            Some(SyncError::Interrupted) => {
                tracing::warn!("  Interrupted; the next run resumes where this one stopped")
            }
            Some(e) => tracing::error!("  Aborted: {}", e),
            None => {}
        }
    }
}

/// Capture time from the detail payload, falling back to the upload time.
fn capture_timestamp(details: &PhotoDetails) -> Option<i64> {
    details
        .date_taken()
        .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.timestamp())
        .or_else(|| details.date_uploaded())
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY (e.g. piped output, cron jobs).
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Set the modification and access times of a file to the given Unix
/// timestamp. Negative timestamps (dates before 1970) are supported.
fn set_file_mtime(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let time = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(timestamp.unsigned_abs()))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    };
    let times = FileTimes::new().set_modified(time).set_accessed(time);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)?;
    Ok(())
}

/// Ledgered items per containing folder name.
pub fn folder_counts(ledger: &CompletionLedger) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for (_, entry) in ledger.iter() {
        let folder = entry
            .path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        *counts.entry(folder).or_insert(0) += 1;
    }
    counts
}

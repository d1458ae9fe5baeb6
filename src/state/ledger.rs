use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use crate::persist;

pub const LEDGER_FILE: &str = ".download_tracker.json";
pub const LOCK_FILE: &str = ".flickr_backup.lock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Older trackers stored a bare path per id.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Full(LedgerEntry),
    Legacy(PathBuf),
}

impl From<StoredEntry> for LedgerEntry {
    fn from(e: StoredEntry) -> Self {
        match e {
            StoredEntry::Full(entry) => entry,
            StoredEntry::Legacy(path) => LedgerEntry {
                path,
                completed_at: None,
            },
        }
    }
}

/// Outcome of [`CompletionLedger::verify`].
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub verified: usize,
    pub missing: Vec<(String, PathBuf)>,
    pub empty: Vec<(String, PathBuf)>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.empty.is_empty()
    }
}

/// On-disk keyed record of completed items, rewritten atomically on every
/// change.
pub struct CompletionLedger {
    path: PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
    /// Exclusive advisory lock on the backup directory, held for the
    /// lifetime of the ledger. `None` for read-only inspection.
    _lock: Option<std::fs::File>,
}

impl std::fmt::Debug for CompletionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionLedger")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .field("locked", &self._lock.is_some())
            .finish()
    }
}

fn acquire_lock(dir: &Path) -> Result<std::fs::File, LedgerError> {
    use fs4::fs_std::FileExt;

    let lock_path = dir.join(LOCK_FILE);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    // Called through the trait so it cannot resolve to std's inherent
    // `File::try_lock_exclusive`.
    FileExt::try_lock_exclusive(&file).map_err(|e| {
        tracing::debug!("Lock on {} not acquired: {}", lock_path.display(), e);
        LedgerError::Locked {
            path: lock_path.clone(),
        }
    })?;
    Ok(file)
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, LedgerEntry>, LedgerError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            tracing::warn!(
                "Could not read ledger {} ({}); starting empty",
                path.display(),
                e
            );
            return Ok(BTreeMap::new());
        }
    };

    match serde_json::from_str::<BTreeMap<String, StoredEntry>>(&contents) {
        Ok(stored) => Ok(stored.into_iter().map(|(k, v)| (k, v.into())).collect()),
        Err(e) => {
            let mut backup = path.as_os_str().to_os_string();
            backup.push(".corrupt");
            let backup = PathBuf::from(backup);
            tracing::warn!(
                "Ledger {} is corrupt ({}); moving it to {} and starting empty",
                path.display(),
                e,
                backup.display()
            );
            std::fs::rename(path, &backup)?;
            Ok(BTreeMap::new())
        }
    }
}

impl CompletionLedger {
    /// Load the ledger for `dir`, creating the directory if needed and taking
    /// the exclusive directory lock.
    pub async fn open(dir: &Path) -> Result<Self, LedgerError> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir)?;
            let lock = acquire_lock(&dir)?;
            let path = dir.join(LEDGER_FILE);
            let entries = load_entries(&path)?;
            tracing::debug!(
                "Loaded {} completed items from {}",
                entries.len(),
                path.display()
            );
            Ok(Self {
                path,
                entries,
                _lock: Some(lock),
            })
        })
        .await
        .map_err(|e| LedgerError::Io(std::io::Error::other(e)))?
    }

    /// Load without locking, for status reporting while a backup may run.
    pub fn open_read_only(dir: &Path) -> Result<Self, LedgerError> {
        let path = dir.join(LEDGER_FILE);
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<BTreeMap<String, StoredEntry>>(&contents)?
                .into_iter()
                .map(|(k, v)| (k, v.into()))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries,
            _lock: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_complete(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LedgerEntry)> {
        self.entries.iter()
    }

    /// Record `id` as done once `artifact` is on disk and non-empty, then
    /// rewrite the ledger file.
    ///
    /// If the rewrite fails the entry is still held in memory for this run
    /// and the error is returned.
    pub async fn mark_complete(&mut self, id: &str, artifact: &Path) -> Result<(), LedgerError> {
        let durable = match tokio::fs::metadata(artifact).await {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(_) => false,
        };
        if !durable {
            return Err(LedgerError::ArtifactNotDurable {
                id: id.to_string(),
                path: artifact.to_path_buf(),
            });
        }

        self.entries.insert(
            id.to_string(),
            LedgerEntry {
                path: artifact.to_path_buf(),
                completed_at: Some(Utc::now()),
            },
        );
        self.persist().await
    }

    async fn persist(&self) -> Result<(), LedgerError> {
        let json = serde_json::to_vec_pretty(&self.entries)?;
        persist::write_atomic_async(self.path.clone(), json, false).await?;
        Ok(())
    }

    /// Check that every recorded artifact still exists and is non-empty.
    pub fn verify(&self) -> VerifyReport {
        let mut report = VerifyReport::default();
        for (id, entry) in &self.entries {
            match std::fs::metadata(&entry.path) {
                Ok(meta) if meta.len() > 0 => report.verified += 1,
                Ok(_) => report.empty.push((id.clone(), entry.path.clone())),
                Err(_) => report.missing.push((id.clone(), entry.path.clone())),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("flickr_backup_tests")
            .join("ledger")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_absent_file_is_empty_ledger() {
        let dir = test_dir("absent");
        let ledger = CompletionLedger::open(&dir).await.unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.is_complete("1"));
    }

    #[tokio::test]
    async fn test_mark_complete_persists_immediately() {
        let dir = test_dir("persist");
        let artifact = dir.join("1.jpg");
        std::fs::write(&artifact, b"data").unwrap();

        {
            let mut ledger = CompletionLedger::open(&dir).await.unwrap();
            ledger.mark_complete("1", &artifact).await.unwrap();
            assert!(ledger.is_complete("1"));
        }

        let reopened = CompletionLedger::open(&dir).await.unwrap();
        assert!(reopened.is_complete("1"));
        let entry = reopened.get("1").unwrap();
        assert_eq!(entry.path, artifact);
        assert!(entry.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_refuses_missing_or_empty_artifact() {
        let dir = test_dir("refuse");
        let mut ledger = CompletionLedger::open(&dir).await.unwrap();

        let missing = dir.join("nope.jpg");
        let err = ledger.mark_complete("1", &missing).await.unwrap_err();
        assert!(matches!(err, LedgerError::ArtifactNotDurable { .. }));

        let empty = dir.join("empty.jpg");
        std::fs::write(&empty, b"").unwrap();
        let err = ledger.mark_complete("2", &empty).await.unwrap_err();
        assert!(matches!(err, LedgerError::ArtifactNotDurable { .. }));

        assert!(ledger.is_empty());
        assert!(!dir.join(LEDGER_FILE).exists());
    }

    #[tokio::test]
    async fn test_legacy_format_accepted() {
        let dir = test_dir("legacy");
        std::fs::write(
            dir.join(LEDGER_FILE),
            r#"{"111": "backup/Trips/111.jpg", "222": {"path": "backup/Unsorted/222.png", "completed_at": "2024-01-01T00:00:00Z"}}"#,
        )
        .unwrap();

        let ledger = CompletionLedger::open(&dir).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(
            ledger.get("111").unwrap().path,
            PathBuf::from("backup/Trips/111.jpg")
        );
        assert!(ledger.get("111").unwrap().completed_at.is_none());
        assert!(ledger.get("222").unwrap().completed_at.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_file_backed_up() {
        let dir = test_dir("corrupt");
        std::fs::write(dir.join(LEDGER_FILE), "{ truncated").unwrap();

        let ledger = CompletionLedger::open(&dir).await.unwrap();
        assert!(ledger.is_empty());
        assert!(dir.join(format!("{}.corrupt", LEDGER_FILE)).exists());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_empty_ledger() {
        let dir = test_dir("unreadable");
        // A directory where the file should be fails with EISDIR on read.
        std::fs::create_dir_all(dir.join(LEDGER_FILE)).unwrap();

        let ledger = CompletionLedger::open(&dir).await.unwrap();
        assert!(ledger.is_empty());
        assert!(dir.join(LEDGER_FILE).is_dir());
    }

    #[tokio::test]
    async fn test_second_open_is_locked() {
        let dir = test_dir("locked");
        let _first = CompletionLedger::open(&dir).await.unwrap();
        let err = CompletionLedger::open(&dir).await.unwrap_err();
        assert!(matches!(err, LedgerError::Locked { .. }));

        // Read-only inspection ignores the lock.
        assert!(CompletionLedger::open_read_only(&dir).is_ok());
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let dir = test_dir("lock_release");
        {
            let _ledger = CompletionLedger::open(&dir).await.unwrap();
        }
        CompletionLedger::open(&dir)
            .await
            .expect("lock should be released after drop");
    }

    #[tokio::test]
    async fn test_verify_reports_missing_and_empty() {
        let dir = test_dir("verify");
        let good = dir.join("good.jpg");
        let gone = dir.join("gone.jpg");
        let emptied = dir.join("emptied.jpg");
        for p in [&good, &gone, &emptied] {
            std::fs::write(p, b"data").unwrap();
        }

        let mut ledger = CompletionLedger::open(&dir).await.unwrap();
        ledger.mark_complete("good", &good).await.unwrap();
        ledger.mark_complete("gone", &gone).await.unwrap();
        ledger.mark_complete("emptied", &emptied).await.unwrap();
        std::fs::remove_file(&gone).unwrap();
        std::fs::write(&emptied, b"").unwrap();

        let report = ledger.verify();
        assert_eq!(report.verified, 1);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.empty.len(), 1);
        assert!(!report.is_clean());
    }
}

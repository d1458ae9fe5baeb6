//! Error types for the completion ledger.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Reading, writing or locking the ledger file failed.
    #[error("Ledger I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Another run holds the backup directory lock.
    #[error("Another flickr-backup-rs run is using {path} (lock file present and held)")]
    Locked { path: PathBuf },

    /// Refused to record an item whose artifact is missing or empty.
    #[error("Refusing to mark {id} complete: {path} is missing or empty")]
    ArtifactNotDurable { id: String, path: PathBuf },
}

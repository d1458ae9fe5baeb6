use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::CredentialError;
use crate::persist;

/// Long-lived access credentials produced by a successful handshake.
///
/// Only valid for the application key whose fingerprint they carry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub access_token_secret: String,
    pub account_id: String,
    pub api_key_fingerprint: String,
    pub issued_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("access_token_secret", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

/// SHA-256 hex digest of an application key. Stored instead of the key so the
/// token file can be matched against the current key without leaking it.
pub fn key_fingerprint(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// On-disk representation. Every field is optional so that incomplete files
/// are detected and reported instead of failing deserialization wholesale.
/// `user_id`, `api_key` and `saved_at` are the field names of older token
/// files.
#[derive(Deserialize)]
struct StoredCredentials {
    access_token: Option<String>,
    access_token_secret: Option<String>,
    #[serde(alias = "user_id")]
    account_id: Option<String>,
    api_key_fingerprint: Option<String>,
    api_key: Option<String>,
    #[serde(alias = "saved_at")]
    issued_at: Option<serde_json::Value>,
}

fn parse_issued_at(value: Option<serde_json::Value>) -> DateTime<Utc> {
    match value {
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|n| n.and_utc())
            })
            .unwrap_or_else(|_| Utc::now()),
        _ => Utc::now(),
    }
}

/// Persists credentials to a single owner-only JSON file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    fingerprint: String,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, api_key: &str) -> Self {
        Self {
            path: path.into(),
            fingerprint: key_fingerprint(api_key),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Load persisted credentials. Missing, unreadable, incomplete or
    /// foreign-key files all yield `None`; only the reason is logged.
    pub async fn load(&self) -> Option<Credentials> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No saved tokens at {}", self.path.display());
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to read tokens from {}: {}", self.path.display(), e);
                return None;
            }
        };

        let stored: StoredCredentials = match serde_json::from_str(&contents) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Token file {} is corrupt: {}", self.path.display(), e);
                return None;
            }
        };

        let fingerprint = match (stored.api_key_fingerprint, stored.api_key) {
            (Some(fp), _) => fp,
            (None, Some(raw_key)) => key_fingerprint(&raw_key),
            (None, None) => {
                tracing::info!("Saved tokens carry no API key binding, ignoring them");
                return None;
            }
        };
        if fingerprint != self.fingerprint {
            tracing::info!("Saved tokens were issued for a different API key, ignoring them");
            return None;
        }

        let (Some(access_token), Some(access_token_secret), Some(account_id)) = (
            stored.access_token.filter(|s| !s.is_empty()),
            stored.access_token_secret.filter(|s| !s.is_empty()),
            stored.account_id.filter(|s| !s.is_empty()),
        ) else {
            tracing::info!("Saved tokens are incomplete, ignoring them");
            return None;
        };

        tracing::debug!("Loaded saved tokens from {}", self.path.display());
        Some(Credentials {
            access_token,
            access_token_secret,
            account_id,
            api_key_fingerprint: fingerprint,
            issued_at: parse_issued_at(stored.issued_at),
        })
    }

    /// Atomically persist credentials with owner-only permissions.
    pub async fn save(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        let json = serde_json::to_vec_pretty(credentials)?;
        persist::write_atomic_async(self.path.clone(), json, true).await?;
        tracing::debug!("Saved tokens to {}", self.path.display());
        Ok(())
    }

    /// Remove persisted credentials, forcing a fresh handshake next time.
    pub async fn clear(&self) -> Result<(), CredentialError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!("Removed saved tokens at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

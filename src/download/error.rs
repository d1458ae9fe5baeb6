use thiserror::Error;

use crate::api::error::ApiError;
use crate::auth::error::AuthError;
use crate::state::LedgerError;

/// Failure of a single item. Most are logged and the item is skipped;
/// [`DownloadError::is_fatal`] marks the ones that end the whole run.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("Sidecar serialization failed: {0}")]
    Sidecar(#[from] serde_json::Error),
}

impl DownloadError {
    /// Rate limits and rejected credentials abort the run; everything else
    /// only skips the item.
    pub fn is_fatal(&self) -> bool {
        match self {
            DownloadError::Api(e) => e.is_rate_limited() || e.is_auth(),
            DownloadError::Disk(_) | DownloadError::Sidecar(_) => false,
        }
    }
}

/// Run-level failure of a backup.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    Auth(#[source] AuthError),

    #[error("Access was rejected mid-run: {0}")]
    Unauthorized(ApiError),

    #[error("Listing the collection failed: {0}")]
    Enumeration(ApiError),

    #[error("Interrupted by operator")]
    Interrupted,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),
}

impl SyncError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SyncError::RateLimited(_))
    }
}

impl From<ApiError> for SyncError {
    fn from(e: ApiError) -> Self {
        if e.is_rate_limited() {
            SyncError::RateLimited(e.message)
        } else if e.is_auth() {
            SyncError::Unauthorized(e)
        } else {
            SyncError::Enumeration(e)
        }
    }
}

impl From<AuthError> for SyncError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::RateLimited(message) => SyncError::RateLimited(message),
            AuthError::Api(api) if api.is_rate_limited() => SyncError::RateLimited(api.message),
            other => SyncError::Auth(other),
        }
    }
}

impl From<DownloadError> for SyncError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::Api(api) => api.into(),
            DownloadError::Disk(io) => SyncError::Disk(io),
            DownloadError::Sidecar(json) => SyncError::Disk(std::io::Error::other(json)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_fatal() {
        let e = DownloadError::Api(ApiError::rate_limited("HTTP 429"));
        assert!(e.is_fatal());
        assert!(SyncError::from(e).is_rate_limited());
    }

    #[test]
    fn test_auth_is_fatal() {
        let e = DownloadError::Api(ApiError::auth("code 98"));
        assert!(e.is_fatal());
        assert!(matches!(SyncError::from(e), SyncError::Unauthorized(_)));
    }

    #[test]
    fn test_transport_and_disk_not_fatal() {
        assert!(!DownloadError::Api(ApiError::transport("reset")).is_fatal());
        assert!(!DownloadError::Api(ApiError::protocol("bad json")).is_fatal());
        assert!(!DownloadError::Disk(std::io::Error::other("disk full")).is_fatal());
    }

    #[test]
    fn test_auth_error_rate_limit_maps_to_rate_limited() {
        let e: SyncError = AuthError::RateLimited("HTTP 429".into()).into();
        assert!(e.is_rate_limited());

        let e: SyncError = AuthError::Api(ApiError::rate_limited("HTTP 429")).into();
        assert!(e.is_rate_limited());

        let e: SyncError = AuthError::EmptyVerifier.into();
        assert!(matches!(e, SyncError::Auth(AuthError::EmptyVerifier)));
    }

    #[test]
    fn test_enumeration_failure() {
        let e: SyncError = ApiError::protocol("code 1").into();
        assert!(matches!(e, SyncError::Enumeration(_)));
        assert!(!e.is_rate_limited());
    }
}

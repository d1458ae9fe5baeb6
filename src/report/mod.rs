//! Derived outputs built from the collection: the album membership index,
//! the CSV catalogue export and view statistics.

pub mod export;
pub mod membership;
pub mod stats;

use thiserror::Error;

use crate::api::error::ApiError;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Writing report failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interrupted by operator")]
    Interrupted,
}

/// Per-photo lookups may degrade to empty columns, but a rate limit or a
/// rejected token stops the whole report.
pub(crate) fn degrade<T: Default>(
    result: Result<T, ApiError>,
    what: &str,
    photo_id: &str,
) -> Result<T, ReportError> {
    match result {
        Ok(v) => Ok(v),
        Err(e) if e.is_rate_limited() || e.is_auth() => Err(e.into()),
        Err(e) => {
            tracing::debug!(id = %photo_id, "Could not get {}: {}", what, e);
            Ok(T::default())
        }
    }
}

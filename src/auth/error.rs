use thiserror::Error;

use crate::api::error::ApiError;

/// Errors raised while establishing an authenticated session.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization handshake failed: {0}")]
    Handshake(String),

    #[error(
        "Authorization needs an interactive terminal to enter the verifier code.\n\
         Run `flickr-backup-rs backup --reauth` interactively, then restart."
    )]
    VerifierUnavailable,

    #[error("No verifier code was entered")]
    EmptyVerifier,

    #[error("Rate limited while authenticating: {0}")]
    RateLimited(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Failures writing or removing the persisted token file. Read failures never
/// surface; they degrade to "no saved credentials".
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

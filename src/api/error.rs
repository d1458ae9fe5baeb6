use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Connection failures, timeouts, 5xx and other unexpected HTTP statuses.
    Transport,
    /// HTTP 429.
    RateLimited,
    /// Malformed body or a remote failure envelope that is not auth-related.
    Protocol,
    /// HTTP 401/403, invalid-token style remote codes, or no bound session.
    Auth,
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApiErrorKind::Transport => "transport",
            ApiErrorKind::RateLimited => "rate limited",
            ApiErrorKind::Protocol => "protocol",
            ApiErrorKind::Auth => "auth",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Transport, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::RateLimited, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Protocol, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Auth, message)
    }

    /// Transport and protocol failures get one more attempt; rate limits and
    /// auth failures never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Transport | ApiErrorKind::Protocol)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == ApiErrorKind::RateLimited
    }

    pub fn is_auth(&self) -> bool {
        self.kind == ApiErrorKind::Auth
    }
}

/// Errors raised while sending or reading a request. HTTP status codes are
/// classified by the caller from the reply, so only the failure kind matters
/// here.
impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::protocol(e.to_string())
        } else {
            Self::transport(e.to_string())
        }
    }
}

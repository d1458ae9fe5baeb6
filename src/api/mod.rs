//! Resilient access to the remote REST API.
//!
//! [`ResilientApiClient`] is the only path to the service: it adds the JSON
//! envelope parameters, classifies HTTP and remote failures into
//! [`ApiErrorKind`]s and retries transient ones exactly as configured.

pub mod error;
pub mod session;

use std::path::Path;

use serde_json::Value;

use self::error::{ApiError, ApiErrorKind};
use self::session::{ApiSession, HttpReply};
use crate::retry::{self, RetryAction, RetryConfig};

/// Remote failure codes that mean the token or signature is not accepted.
/// 96 invalid signature, 97 missing signature, 98 invalid auth token,
/// 99 insufficient permissions, 100 invalid API key.
const AUTH_FAILURE_CODES: &[i64] = &[96, 97, 98, 99, 100];

pub struct ResilientApiClient {
    session: Option<Box<dyn ApiSession>>,
    retry: RetryConfig,
}

impl ResilientApiClient {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            session: None,
            retry,
        }
    }

    pub fn bind(&mut self, session: Box<dyn ApiSession>) {
        self.session = Some(session);
    }

    pub fn unbind(&mut self) {
        self.session = None;
    }

    pub fn is_bound(&self) -> bool {
        self.session.is_some()
    }

    pub fn account_id(&self) -> Option<&str> {
        self.session.as_deref().map(|s| s.account_id())
    }

    fn bound_session(&self) -> Result<&dyn ApiSession, ApiError> {
        self.session
            .as_deref()
            .ok_or_else(|| ApiError::auth("No authenticated session is bound"))
    }

    /// Invoke a remote method and return the decoded success payload.
    pub async fn call(&self, method: &str, params: &[(String, String)]) -> Result<Value, ApiError> {
        let session = self.bound_session()?;
        let query = envelope(method, params);

        retry::retry_with_backoff(
            &self.retry,
            classify,
            || async {
                tracing::debug!(method, "API call");
                let reply = session.get(&query).await?;
                interpret(method, reply)
            },
        )
        .await
    }

    /// Fetch an asset into `dest` with the same retry policy as `call`.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, ApiError> {
        let session = self.bound_session()?;
        retry::retry_with_backoff(&self.retry, classify, || async {
            session.download(url, dest).await
        })
        .await
    }
}

fn classify(e: &ApiError) -> RetryAction {
    if e.is_retryable() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

fn envelope(method: &str, params: &[(String, String)]) -> Vec<(String, String)> {
    let mut query = Vec::with_capacity(params.len() + 3);
    query.push(("method".to_string(), method.to_string()));
    query.push(("format".to_string(), "json".to_string()));
    query.push(("nojsoncallback".to_string(), "1".to_string()));
    query.extend(
        params
            .iter()
            .filter(|(k, _)| k != "method" && k != "format" && k != "nojsoncallback")
            .cloned(),
    );
    query
}

fn interpret(method: &str, reply: HttpReply) -> Result<Value, ApiError> {
    match reply.status {
        429 => {
            return Err(ApiError::rate_limited(format!(
                "HTTP 429 calling {}",
                method
            )))
        }
        401 | 403 => {
            return Err(ApiError::auth(format!(
                "HTTP {} calling {}",
                reply.status, method
            )))
        }
        s if !(200..300).contains(&s) => {
            return Err(ApiError::transport(format!("HTTP {} calling {}", s, method)))
        }
        _ => {}
    }

    let value: Value = serde_json::from_str(&reply.body)
        .map_err(|e| ApiError::protocol(format!("Invalid JSON from {}: {}", method, e)))?;

    if value.get("stat").and_then(Value::as_str) == Some("fail") {
        let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown failure");
        let kind = if AUTH_FAILURE_CODES.contains(&code) {
            ApiErrorKind::Auth
        } else {
            ApiErrorKind::Protocol
        };
        return Err(ApiError::new(
            kind,
            format!("{} failed (code {}): {}", method, code, message),
        ));
    }

    Ok(value)
}

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use super::error::ApiError;
use crate::auth::credentials::Credentials;
use crate::auth::oauth::OAuthSigner;

const USER_AGENT: &str = concat!("flickr-backup-rs/", env!("CARGO_PKG_VERSION"));

/// Raw HTTP outcome of one signed call, before envelope interpretation.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// Signed-request capability bound to one account. The production
/// implementation is [`OAuthSession`]; tests substitute scripted fakes.
#[async_trait::async_trait]
pub trait ApiSession: Send + Sync {
    /// Signed GET against the REST endpoint with the given query parameters.
    async fn get(&self, params: &[(String, String)]) -> Result<HttpReply, ApiError>;

    /// Stream the asset at `url` into `dest`, returning the bytes written.
    /// `dest` is flushed to disk before returning.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, ApiError>;

    fn account_id(&self) -> &str;
}

/// reqwest-backed session signing every REST call with the access token.
pub struct OAuthSession {
    api_client: Client,
    download_client: Client,
    signer: OAuthSigner,
    rest_url: String,
    account_id: String,
}

impl std::fmt::Debug for OAuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSession")
            .field("rest_url", &self.rest_url)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<Client, ApiError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ApiError::transport(format!("Failed to build HTTP client: {}", e)))
}

impl OAuthSession {
    pub fn new(
        consumer: &OAuthSigner,
        credentials: &Credentials,
        rest_url: &str,
        api_timeout: Duration,
        download_timeout: Duration,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            api_client: build_client(api_timeout)?,
            download_client: build_client(download_timeout)?,
            signer: consumer
                .clone()
                .with_token(&credentials.access_token, &credentials.access_token_secret),
            rest_url: rest_url.to_string(),
            account_id: credentials.account_id.clone(),
        })
    }
}

#[async_trait::async_trait]
impl ApiSession for OAuthSession {
    async fn get(&self, params: &[(String, String)]) -> Result<HttpReply, ApiError> {
        let signed = self
            .signer
            .sign("GET", &self.rest_url, params, &[])
            .map_err(|e| ApiError::protocol(format!("Failed to sign request: {}", e)))?;

        let response = self
            .api_client
            .get(&self.rest_url)
            .query(&signed)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::transport(format!("Failed to read response body: {}", e)))?;
        Ok(HttpReply { status, body })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, ApiError> {
        let response = self
            .download_client
            .get(url)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ApiError::rate_limited(format!("HTTP 429 downloading {}", url)));
        }
        if !status.is_success() {
            return Err(ApiError::transport(format!(
                "HTTP {} downloading {}",
                status.as_u16(),
                url
            )));
        }

        let content_length = response.content_length();
        let result = stream_to_file(response, dest, content_length).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    dest: &Path,
    content_length: Option<u64>,
) -> Result<u64, ApiError> {
    let io_err = |e: std::io::Error| {
        ApiError::transport(format!("Failed writing {}: {}", dest.display(), e))
    };

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(dest)
        .await
        .map_err(io_err)?;

    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            tracing::warn!(
                "Body error for {} (content_length={:?}, bytes_so_far={}): {}",
                dest.display(),
                content_length,
                bytes_written,
                e
            );
            ApiError::from(e)
        })?;
        file.write_all(&chunk).await.map_err(io_err)?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;

    if let Some(expected) = content_length {
        if expected != bytes_written {
            return Err(ApiError::transport(format!(
                "Truncated download for {}: expected {} bytes, got {}",
                dest.display(),
                expected,
                bytes_written
            )));
        }
    }
    if bytes_written == 0 {
        return Err(ApiError::transport(format!(
            "Empty response body for {}",
            dest.display()
        )));
    }

    Ok(bytes_written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::key_fingerprint;
    use std::path::PathBuf;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("flickr_backup_tests")
            .join("session")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn session(server: &MockServer) -> OAuthSession {
        let creds = Credentials {
            access_token: "access".into(),
            access_token_secret: "access-secret".into(),
            account_id: "1@N00".into(),
            api_key_fingerprint: key_fingerprint("key"),
            issued_at: chrono::Utc::now(),
        };
        OAuthSession::new(
            &OAuthSigner::new("key", "secret"),
            &creds,
            &format!("{}/services/rest/", server.uri()),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_sends_signed_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/rest/"))
            .and(query_param("method", "flickr.test.login"))
            .and(query_param("oauth_token", "access"))
            .and(query_param("oauth_consumer_key", "key"))
            .and(query_param("oauth_signature_method", "HMAC-SHA1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"stat":"ok"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let reply = session(&server)
            .get(&[("method".into(), "flickr.test.login".into())])
            .await
            .unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, r#"{"stat":"ok"}"#);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable_transport_error() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let creds = Credentials {
            access_token: "access".into(),
            access_token_secret: "access-secret".into(),
            account_id: "1@N00".into(),
            api_key_fingerprint: key_fingerprint("key"),
            issued_at: chrono::Utc::now(),
        };
        let session = OAuthSession::new(
            &OAuthSigner::new("key", "secret"),
            &creds,
            &format!("http://127.0.0.1:{}/services/rest/", port),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = session
            .get(&[("method".into(), "flickr.test.login".into())])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.is_rate_limited());
        assert!(!err.is_auth());
    }

    #[tokio::test]
    async fn test_get_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let reply = session(&server).get(&[]).await.unwrap();
        assert_eq!(reply.status, 429);
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photos/1_o.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpegbytes".to_vec()))
            .mount(&server)
            .await;

        let dir = test_dir("download_ok");
        let dest = dir.join("1.part.jpg");
        let written = session(&server)
            .download(&format!("{}/photos/1_o.jpg", server.uri()), &dest)
            .await
            .unwrap();
        assert_eq!(written, 9);
        assert_eq!(std::fs::read(&dest).unwrap(), b"jpegbytes");
    }

    #[tokio::test]
    async fn test_download_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let dir = test_dir("download_429");
        let dest = dir.join("2.part.jpg");
        let err = session(&server)
            .download(&format!("{}/photos/2_o.jpg", server.uri()), &dest)
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_empty_body_removed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = test_dir("download_empty");
        let dest = dir.join("3.part.jpg");
        let err = session(&server)
            .download(&format!("{}/photos/3_o.jpg", server.uri()), &dest)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::api::error::ApiErrorKind::Transport);
        assert!(!dest.exists());
    }
}

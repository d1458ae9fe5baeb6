//! Flickr authorization via the OAuth 1.0a three-legged handshake.
//!
//! The flow: saved tokens → live validation (`flickr.test.login`) → full
//! handshake (request token → operator approval → access token) when the
//! saved tokens are missing, foreign or rejected.

pub mod credentials;
pub mod endpoints;
pub mod error;
pub mod oauth;

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use self::credentials::{CredentialStore, Credentials};
use self::endpoints::Endpoints;
use self::error::AuthError;
use self::oauth::OAuthSigner;
use crate::api::session::{build_client, ApiSession, OAuthSession};
use crate::api::ResilientApiClient;
use crate::types::Permission;

/// Progress of the three-legged handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unauthenticated,
    RequestTokenObtained,
    UserApproved,
    AccessTokenObtained,
    Failed,
}

/// Short-lived token identifying one pending authorization.
#[derive(Clone)]
pub struct RequestToken {
    pub token: String,
    pub secret: String,
}

impl std::fmt::Debug for RequestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestToken")
            .field("token", &self.token)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Result of exchanging an approved request token.
#[derive(Clone)]
pub struct AccessGrant {
    pub token: String,
    pub secret: String,
    pub account_id: String,
    pub username: Option<String>,
}

/// The remote side of the handshake plus the factory for signed sessions.
#[async_trait::async_trait]
pub trait Authorizer: Send + Sync {
    async fn request_token(&self) -> Result<RequestToken, AuthError>;

    fn authorization_url(&self, token: &RequestToken, permission: Permission) -> String;

    async fn access_token(
        &self,
        token: &RequestToken,
        verifier: &str,
    ) -> Result<AccessGrant, AuthError>;

    fn open_session(&self, credentials: &Credentials) -> Result<Box<dyn ApiSession>, AuthError>;
}

/// Authorizer talking to the real OAuth endpoints over reqwest.
pub struct OAuthAuthorizer {
    client: Client,
    consumer: OAuthSigner,
    endpoints: Endpoints,
    api_timeout: Duration,
    download_timeout: Duration,
}

impl OAuthAuthorizer {
    pub fn new(
        api_key: &str,
        api_secret: &str,
        endpoints: Endpoints,
        api_timeout: Duration,
        download_timeout: Duration,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            client: build_client(api_timeout)?,
            consumer: OAuthSigner::new(api_key, api_secret),
            endpoints,
            api_timeout,
            download_timeout,
        })
    }

    /// Signed GET returning the decoded form body of a handshake step.
    async fn form_request(
        &self,
        signer: &OAuthSigner,
        url: &str,
        extra_oauth: &[(&str, &str)],
    ) -> Result<std::collections::HashMap<String, String>, AuthError> {
        let signed = signer
            .sign("GET", url, &[], extra_oauth)
            .map_err(|e| AuthError::Handshake(format!("Failed to sign request: {}", e)))?;
        let response = self.client.get(url).query(&signed).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.as_u16() == 429 {
            return Err(AuthError::RateLimited(format!("HTTP 429 from {}", url)));
        }
        if !status.is_success() {
            return Err(AuthError::Handshake(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                url,
                body.trim()
            )));
        }
        Ok(oauth::parse_form(&body))
    }
}

fn required(
    form: &mut std::collections::HashMap<String, String>,
    key: &str,
) -> Result<String, AuthError> {
    form.remove(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::Handshake(format!("Response is missing {}", key)))
}

#[async_trait::async_trait]
impl Authorizer for OAuthAuthorizer {
    async fn request_token(&self) -> Result<RequestToken, AuthError> {
        let mut form = self
            .form_request(
                &self.consumer,
                &self.endpoints.request_token,
                &[("oauth_callback", "oob")],
            )
            .await?;
        Ok(RequestToken {
            token: required(&mut form, "oauth_token")?,
            secret: required(&mut form, "oauth_token_secret")?,
        })
    }

    fn authorization_url(&self, token: &RequestToken, permission: Permission) -> String {
        format!(
            "{}?oauth_token={}&perms={}",
            self.endpoints.authorize,
            oauth::percent_encode(&token.token),
            permission.as_str()
        )
    }

    async fn access_token(
        &self,
        token: &RequestToken,
        verifier: &str,
    ) -> Result<AccessGrant, AuthError> {
        let signer = self.consumer.clone().with_token(&token.token, &token.secret);
        let mut form = self
            .form_request(
                &signer,
                &self.endpoints.access_token,
                &[("oauth_verifier", verifier)],
            )
            .await?;
        Ok(AccessGrant {
            token: required(&mut form, "oauth_token")?,
            secret: required(&mut form, "oauth_token_secret")?,
            account_id: required(&mut form, "user_nsid")?,
            username: form.remove("username"),
        })
    }

    fn open_session(&self, credentials: &Credentials) -> Result<Box<dyn ApiSession>, AuthError> {
        let session = OAuthSession::new(
            &self.consumer,
            credentials,
            &self.endpoints.rest,
            self.api_timeout,
            self.download_timeout,
        )?;
        Ok(Box::new(session))
    }
}

/// Supplies the operator's verifier code given the authorization URL.
/// Returns `None` when no operator can be asked.
pub type VerifierProvider = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Owns the handshake and binds a signed session to the API client.
pub struct AuthSession {
    authorizer: Box<dyn Authorizer>,
    store: CredentialStore,
    permission: Permission,
    verifier_provider: VerifierProvider,
    force_reauth: bool,
    state: HandshakeState,
}

impl AuthSession {
    pub fn new(
        authorizer: Box<dyn Authorizer>,
        store: CredentialStore,
        permission: Permission,
        verifier_provider: VerifierProvider,
    ) -> Self {
        Self {
            authorizer,
            store,
            permission,
            verifier_provider,
            force_reauth: false,
            state: HandshakeState::Unauthenticated,
        }
    }

    /// Discard saved tokens on the next `ensure_authenticated`.
    pub fn force_reauth(mut self, force: bool) -> Self {
        self.force_reauth = force;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Bind a validated session to `client`, running the handshake when no
    /// usable saved tokens exist. A failed validation only means
    /// "re-authorize"; a rate limit during validation is fatal.
    pub async fn ensure_authenticated(
        &mut self,
        client: &mut ResilientApiClient,
    ) -> Result<(), AuthError> {
        if self.force_reauth {
            tracing::info!("Re-authorization requested, discarding saved tokens");
            if let Err(e) = self.store.clear().await {
                tracing::warn!("Failed to remove saved tokens: {}", e);
            }
            self.force_reauth = false;
        }

        if let Some(credentials) = self.store.load().await {
            match self.validate(&credentials, client).await {
                Ok(()) => {
                    self.state = HandshakeState::AccessTokenObtained;
                    return Ok(());
                }
                Err(e @ AuthError::RateLimited(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("Saved tokens are no longer valid ({}), re-authorizing", e);
                    client.unbind();
                    if let Err(e) = self.store.clear().await {
                        tracing::warn!("Failed to remove stale tokens: {}", e);
                    }
                }
            }
        }

        let credentials = match self.handshake().await {
            Ok(c) => c,
            Err(e) => {
                self.state = HandshakeState::Failed;
                return Err(e);
            }
        };

        if let Err(e) = self.store.save(&credentials).await {
            tracing::warn!(
                "Failed to save tokens to {}: {}. You will need to authorize again next run.",
                self.store.path().display(),
                e
            );
        }
        client.bind(self.authorizer.open_session(&credentials)?);
        tracing::info!(account = %credentials.account_id, "Authorization complete");
        Ok(())
    }

    async fn validate(
        &self,
        credentials: &Credentials,
        client: &mut ResilientApiClient,
    ) -> Result<(), AuthError> {
        client.bind(self.authorizer.open_session(credentials)?);
        match client.call("flickr.test.login", &[]).await {
            Ok(value) => {
                let username = value
                    .pointer("/user/username/_content")
                    .and_then(Value::as_str)
                    .unwrap_or(&credentials.account_id);
                tracing::info!("Authenticated as {}", username);
                Ok(())
            }
            Err(e) if e.is_rate_limited() => Err(AuthError::RateLimited(e.message)),
            Err(e) => Err(e.into()),
        }
    }

    async fn handshake(&mut self) -> Result<Credentials, AuthError> {
        self.state = HandshakeState::Unauthenticated;

        let request_token = self.authorizer.request_token().await?;
        self.state = HandshakeState::RequestTokenObtained;

        let url = self
            .authorizer
            .authorization_url(&request_token, self.permission);
        tracing::info!("Waiting for the authorization verifier code");
        let verifier = (self.verifier_provider)(&url).ok_or(AuthError::VerifierUnavailable)?;
        let verifier = verifier.trim();
        if verifier.is_empty() {
            return Err(AuthError::EmptyVerifier);
        }
        self.state = HandshakeState::UserApproved;

        let grant = self
            .authorizer
            .access_token(&request_token, verifier)
            .await?;
        self.state = HandshakeState::AccessTokenObtained;
        if let Some(name) = &grant.username {
            tracing::info!("Authorized as {}", name);
        }

        Ok(Credentials {
            access_token: grant.token,
            access_token_secret: grant.secret,
            account_id: grant.account_id,
            api_key_fingerprint: self.store.fingerprint().to_string(),
            issued_at: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use crate::api::testing::FakeSession;
    use crate::auth::credentials::key_fingerprint;
    use crate::retry::RetryConfig;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("flickr_backup_tests")
            .join("auth")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    struct FakeAuthorizer {
        session: FakeSession,
        handshakes: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Authorizer for FakeAuthorizer {
        async fn request_token(&self) -> Result<RequestToken, AuthError> {
            self.handshakes.fetch_add(1, Ordering::SeqCst);
            Ok(RequestToken {
                token: "req".into(),
                secret: "req-secret".into(),
            })
        }

        fn authorization_url(&self, token: &RequestToken, permission: Permission) -> String {
            format!("https://auth.test/?oauth_token={}&perms={}", token.token, permission.as_str())
        }

        async fn access_token(
            &self,
            _token: &RequestToken,
            verifier: &str,
        ) -> Result<AccessGrant, AuthError> {
            assert_eq!(verifier, "123-456-789");
            Ok(AccessGrant {
                token: "fresh".into(),
                secret: "fresh-secret".into(),
                account_id: "1@N00".into(),
                username: Some("tester".into()),
            })
        }

        fn open_session(&self, _: &Credentials) -> Result<Box<dyn ApiSession>, AuthError> {
            Ok(Box::new(self.session.clone()))
        }
    }

    fn auth_session(
        dir: &std::path::Path,
        api_key: &str,
        session: &FakeSession,
        verifier: Option<&'static str>,
    ) -> (AuthSession, Arc<AtomicU32>) {
        let handshakes = Arc::new(AtomicU32::new(0));
        let authorizer = FakeAuthorizer {
            session: session.clone(),
            handshakes: handshakes.clone(),
        };
        let auth = AuthSession::new(
            Box::new(authorizer),
            CredentialStore::new(dir.join("tokens.json"), api_key),
            Permission::Read,
            Box::new(move |_url: &str| verifier.map(str::to_string)),
        );
        (auth, handshakes)
    }

    fn saved(api_key: &str) -> Credentials {
        Credentials {
            access_token: "saved".into(),
            access_token_secret: "saved-secret".into(),
            account_id: "1@N00".into(),
            api_key_fingerprint: key_fingerprint(api_key),
            issued_at: chrono::Utc::now(),
        }
    }

    fn client() -> ResilientApiClient {
        ResilientApiClient::new(RetryConfig {
            max_retries: 1,
            delay_secs: 0,
        })
    }

    #[tokio::test]
    async fn test_valid_saved_tokens_skip_handshake() {
        let dir = test_dir("valid_saved");
        CredentialStore::new(dir.join("tokens.json"), "key")
            .save(&saved("key"))
            .await
            .unwrap();
        let fake = FakeSession::new();
        fake.push_json(
            200,
            json!({"stat": "ok", "user": {"id": "1@N00", "username": {"_content": "tester"}}}),
        );
        let (mut auth, handshakes) = auth_session(&dir, "key", &fake, None);
        let mut client = client();

        auth.ensure_authenticated(&mut client).await.unwrap();
        assert!(client.is_bound());
        assert_eq!(handshakes.load(Ordering::SeqCst), 0);
        assert_eq!(fake.calls_to("flickr.test.login"), 1);
        assert_eq!(auth.state(), HandshakeState::AccessTokenObtained);
    }

    #[tokio::test]
    async fn test_key_mismatch_forces_handshake() {
        let dir = test_dir("key_mismatch");
        CredentialStore::new(dir.join("tokens.json"), "old-key")
            .save(&saved("old-key"))
            .await
            .unwrap();
        let fake = FakeSession::new();
        let (mut auth, handshakes) = auth_session(&dir, "new-key", &fake, Some("123-456-789"));
        let mut client = client();

        auth.ensure_authenticated(&mut client).await.unwrap();
        assert_eq!(handshakes.load(Ordering::SeqCst), 1);
        // Foreign tokens are never sent to the server.
        assert_eq!(fake.call_count(), 0);

        let stored = CredentialStore::new(dir.join("tokens.json"), "new-key")
            .load()
            .await
            .unwrap();
        assert_eq!(stored.access_token, "fresh");
    }

    #[tokio::test]
    async fn test_rejected_tokens_trigger_reauth() {
        let dir = test_dir("rejected");
        CredentialStore::new(dir.join("tokens.json"), "key")
            .save(&saved("key"))
            .await
            .unwrap();
        let fake = FakeSession::new();
        fake.push_json(
            200,
            json!({"stat": "fail", "code": 98, "message": "Invalid auth token"}),
        );
        let (mut auth, handshakes) = auth_session(&dir, "key", &fake, Some("123-456-789"));
        let mut client = client();

        auth.ensure_authenticated(&mut client).await.unwrap();
        assert_eq!(handshakes.load(Ordering::SeqCst), 1);
        assert!(client.is_bound());
    }

    #[tokio::test]
    async fn test_rate_limit_during_validation_is_fatal() {
        let dir = test_dir("rate_limited");
        CredentialStore::new(dir.join("tokens.json"), "key")
            .save(&saved("key"))
            .await
            .unwrap();
        let fake = FakeSession::new();
        fake.push(Err(ApiError::rate_limited("HTTP 429")));
        let (mut auth, handshakes) = auth_session(&dir, "key", &fake, Some("123-456-789"));
        let mut client = client();

        let err = auth.ensure_authenticated(&mut client).await.unwrap_err();
        assert!(matches!(err, AuthError::RateLimited(_)));
        assert_eq!(handshakes.load(Ordering::SeqCst), 0);
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_verifier_fails_handshake() {
        let dir = test_dir("no_verifier");
        let fake = FakeSession::new();
        let (mut auth, _) = auth_session(&dir, "key", &fake, None);
        let mut client = client();

        let err = auth.ensure_authenticated(&mut client).await.unwrap_err();
        assert!(matches!(err, AuthError::VerifierUnavailable));
        assert_eq!(auth.state(), HandshakeState::Failed);
        assert!(!client.is_bound());
    }

    #[tokio::test]
    async fn test_force_reauth_discards_saved_tokens() {
        let dir = test_dir("force");
        CredentialStore::new(dir.join("tokens.json"), "key")
            .save(&saved("key"))
            .await
            .unwrap();
        let fake = FakeSession::new();
        let (auth, handshakes) = auth_session(&dir, "key", &fake, Some("123-456-789"));
        let mut auth = auth.force_reauth(true);
        let mut client = client();

        auth.ensure_authenticated(&mut client).await.unwrap();
        assert_eq!(handshakes.load(Ordering::SeqCst), 1);
        assert_eq!(fake.calls_to("flickr.test.login"), 0);
    }

    mod oauth_endpoints {
        use super::*;
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn authorizer(server: &MockServer) -> OAuthAuthorizer {
            OAuthAuthorizer::new(
                "key",
                "secret",
                Endpoints::with_base(&server.uri()),
                Duration::from_secs(5),
                Duration::from_secs(5),
            )
            .unwrap()
        }

        #[tokio::test]
        async fn test_request_and_access_token_exchange() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/services/oauth/request_token"))
                .and(query_param("oauth_callback", "oob"))
                .respond_with(ResponseTemplate::new(200).set_body_string(
                    "oauth_callback_confirmed=true&oauth_token=req-token&oauth_token_secret=req-secret",
                ))
                .expect(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/services/oauth/access_token"))
                .and(query_param("oauth_verifier", "123-456-789"))
                .and(query_param("oauth_token", "req-token"))
                .respond_with(ResponseTemplate::new(200).set_body_string(
                    "fullname=Test%20User&oauth_token=acc-token&oauth_token_secret=acc-secret&user_nsid=12345%40N00&username=tester",
                ))
                .expect(1)
                .mount(&server)
                .await;

            let authorizer = authorizer(&server);
            let token = authorizer.request_token().await.unwrap();
            assert_eq!(token.token, "req-token");

            let url = authorizer.authorization_url(&token, Permission::Read);
            assert!(url.ends_with("/services/oauth/authorize?oauth_token=req-token&perms=read"));

            let grant = authorizer.access_token(&token, "123-456-789").await.unwrap();
            assert_eq!(grant.token, "acc-token");
            assert_eq!(grant.account_id, "12345@N00");
            assert_eq!(grant.username.as_deref(), Some("tester"));
        }

        #[tokio::test]
        async fn test_request_token_rejected() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/services/oauth/request_token"))
                .respond_with(
                    ResponseTemplate::new(401).set_body_string("oauth_problem=signature_invalid"),
                )
                .mount(&server)
                .await;

            let err = authorizer(&server).request_token().await.unwrap_err();
            match err {
                AuthError::Handshake(msg) => assert!(msg.contains("signature_invalid")),
                other => panic!("unexpected error: {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_missing_field_is_handshake_error() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/services/oauth/request_token"))
                .respond_with(ResponseTemplate::new(200).set_body_string("oauth_token=only"))
                .mount(&server)
                .await;

            let err = authorizer(&server).request_token().await.unwrap_err();
            assert!(matches!(err, AuthError::Handshake(_)));
        }
    }
}

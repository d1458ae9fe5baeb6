//! OAuth 1.0a request signing (HMAC-SHA1) as used by the Flickr API.
//!
//! Every request, including the handshake ones, carries the `oauth_*`
//! parameters in the query string alongside the regular parameters.

use std::collections::HashMap;

use base64::Engine;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;

pub use hmac::digest::InvalidLength;

const NONCE_LEN: usize = 32;

/// Consumer credentials plus the (optional) token the request is made with.
/// The token secret is empty while requesting the initial request token.
#[derive(Clone)]
pub struct OAuthSigner {
    consumer_key: String,
    consumer_secret: String,
    token: Option<String>,
    token_secret: String,
}

impl std::fmt::Debug for OAuthSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSigner")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl OAuthSigner {
    pub fn new(consumer_key: &str, consumer_secret: &str) -> Self {
        Self {
            consumer_key: consumer_key.to_string(),
            consumer_secret: consumer_secret.to_string(),
            token: None,
            token_secret: String::new(),
        }
    }

    pub fn with_token(mut self, token: &str, token_secret: &str) -> Self {
        self.token = Some(token.to_string());
        self.token_secret = token_secret.to_string();
        self
    }

    /// Return `params` extended with the `oauth_*` protocol parameters and the
    /// signature, ready to be sent as the query string of `method url`.
    ///
    /// `extra_oauth` carries step-specific protocol parameters such as
    /// `oauth_callback` or `oauth_verifier`.
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        extra_oauth: &[(&str, &str)],
    ) -> Result<Vec<(String, String)>, InvalidLength> {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.sign_with(method, url, params, extra_oauth, &nonce, &timestamp)
    }

    fn sign_with(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        extra_oauth: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<Vec<(String, String)>, InvalidLength> {
        let mut all: Vec<(String, String)> = params.to_vec();
        all.push(("oauth_consumer_key".into(), self.consumer_key.clone()));
        all.push(("oauth_nonce".into(), nonce.to_string()));
        all.push(("oauth_signature_method".into(), "HMAC-SHA1".into()));
        all.push(("oauth_timestamp".into(), timestamp.to_string()));
        all.push(("oauth_version".into(), "1.0".into()));
        if let Some(token) = &self.token {
            all.push(("oauth_token".into(), token.clone()));
        }
        for (k, v) in extra_oauth {
            all.push((k.to_string(), v.to_string()));
        }

        let base = signature_base_string(method, url, &all);
        let signature = sign_hmac_sha1(&base, &self.consumer_secret, &self.token_secret)?;
        all.push(("oauth_signature".into(), signature));
        Ok(all)
    }
}

/// RFC 3986 percent-encoding: everything except `A-Z a-z 0-9 - . _ ~`.
pub fn percent_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// `METHOD&enc(base_url)&enc(sorted, encoded k=v pairs joined by &)`.
pub fn signature_base_string(method: &str, url: &str, params: &[(String, String)]) -> String {
    let base_url = url.split(['?', '#']).next().unwrap_or(url);

    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    let normalized = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(base_url),
        percent_encode(&normalized)
    )
}

pub fn sign_hmac_sha1(
    base_string: &str,
    consumer_secret: &str,
    token_secret: &str,
) -> Result<String, InvalidLength> {
    let key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    );
    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())?;
    mac.update(base_string.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Decode an `application/x-www-form-urlencoded` handshake response body.
pub fn parse_form(body: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(body.trim().as_bytes())
        .into_owned()
        .collect()
}

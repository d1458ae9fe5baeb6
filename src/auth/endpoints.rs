/// URL endpoints for the Flickr REST API and its OAuth 1.0a handshake.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub rest: String,
    pub request_token: String,
    pub authorize: String,
    pub access_token: String,
}

impl Endpoints {
    pub fn flickr() -> Self {
        Self {
            rest: "https://api.flickr.com/services/rest/".to_string(),
            request_token: "https://www.flickr.com/services/oauth/request_token".to_string(),
            authorize: "https://www.flickr.com/services/oauth/authorize".to_string(),
            access_token: "https://www.flickr.com/services/oauth/access_token".to_string(),
        }
    }

    /// Same path layout rooted at `base`, for pointing the client at a mock
    /// server.
    #[cfg(test)]
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            rest: format!("{}/services/rest/", base),
            request_token: format!("{}/services/oauth/request_token", base),
            authorize: format!("{}/services/oauth/authorize", base),
            access_token: format!("{}/services/oauth/access_token", base),
        }
    }
}

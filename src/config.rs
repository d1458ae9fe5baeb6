use std::path::PathBuf;
use std::time::Duration;

use crate::cli::AuthArgs;
use crate::retry::RetryConfig;
use crate::types::Permission;

/// Per-run configuration for commands that talk to the API.
///
/// Built once in `main` and handed to each component constructor; nothing
/// reads configuration from globals.
pub struct Config {
    pub api_key: String,
    pub api_secret: String,
    pub token_file: PathBuf,

    pub retry: RetryConfig,
    pub api_timeout: Duration,
    pub download_timeout: Duration,

    pub permission: Permission,
    pub reauth: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("token_file", &self.token_file)
            .field("permission", &self.permission)
            .field("reauth", &self.reauth)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub const API_TIMEOUT_SECS: u64 = 30;
    pub const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

    pub fn from_cli(auth: &AuthArgs, max_retries: u32, retry_delay: u64) -> anyhow::Result<Self> {
        if auth.api_key.trim().is_empty() || auth.api_secret.trim().is_empty() {
            anyhow::bail!(
                "An API key and secret are required. Pass --key/--secret or set \
                 FLICKR_API_KEY and FLICKR_API_SECRET."
            );
        }

        Ok(Self {
            api_key: auth.api_key.trim().to_string(),
            api_secret: auth.api_secret.trim().to_string(),
            token_file: expand_tilde(&auth.token_file),
            retry: RetryConfig {
                max_retries,
                delay_secs: retry_delay,
            },
            api_timeout: Duration::from_secs(Self::API_TIMEOUT_SECS),
            download_timeout: Duration::from_secs(Self::DOWNLOAD_TIMEOUT_SECS),
            permission: auth.permission,
            reauth: auth.reauth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_args(key: &str, secret: &str) -> AuthArgs {
        AuthArgs {
            api_key: key.to_string(),
            api_secret: secret.to_string(),
            token_file: "~/.flickr_backup_tokens.json".to_string(),
            reauth: false,
            permission: Permission::Read,
        }
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Documents");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Documents"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(
            expand_tilde("/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            expand_tilde("relative/path"),
            PathBuf::from("relative/path")
        );
    }

    #[test]
    fn test_from_cli_resolves_defaults() {
        let cfg = Config::from_cli(&auth_args(" key ", "secret"), 1, 2).unwrap();
        assert_eq!(cfg.api_key, "key");
        assert_eq!(cfg.retry.max_retries, 1);
        assert_eq!(cfg.retry.delay_secs, 2);
        assert_eq!(cfg.api_timeout, Duration::from_secs(30));
        assert_eq!(cfg.download_timeout, Duration::from_secs(60));
        assert!(cfg.token_file.ends_with(".flickr_backup_tokens.json"));
    }

    #[test]
    fn test_from_cli_rejects_blank_credentials() {
        assert!(Config::from_cli(&auth_args("", "secret"), 1, 2).is_err());
        assert!(Config::from_cli(&auth_args("key", "  "), 1, 2).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let cfg = Config::from_cli(&auth_args("key", "hunter2"), 1, 2).unwrap();
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}

//! Environment-style process configuration.
//!
//! Everything the storage core needs is read once at startup. Invalid or
//! missing values for the selected auth mode are fatal here, never at request
//! time.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::repo::auth::AuthStrategy;
use crate::secrets::{resolve_secret_optional, SecretError};

pub const ENV_AUTH_MODE: &str = "GIT_AUTH_MODE";
pub const ENV_PRIVATE_KEY_PATH: &str = "GIT_PRIVATE_KEY_PATH";
pub const ENV_PRIVATE_KEY_PASSWORD: &str = "GIT_PRIVATE_KEY_PASSWORD";
pub const ENV_TOKEN: &str = "GIT_TOKEN";
pub const ENV_TOKEN_FILE: &str = "GIT_TOKEN_FILE";
pub const ENV_VENDOR: &str = "VCS_VENDOR";
pub const ENV_ACCOUNT: &str = "VCS_USER";
pub const ENV_DEFAULT_BRANCH: &str = "GIT_DEFAULT_BRANCH";
pub const ENV_AUTHOR_NAME: &str = "GIT_AUTHOR_NAME";
pub const ENV_AUTHOR_EMAIL: &str = "GIT_AUTHOR_EMAIL";
pub const ENV_NETWORK_TIMEOUT: &str = "GIT_NETWORK_TIMEOUT_SECS";
pub const ENV_CACHE_MAX_ENTRIES: &str = "REPO_CACHE_MAX_ENTRIES";
pub const ENV_CACHE_IDLE_SECS: &str = "REPO_CACHE_IDLE_SECS";
pub const ENV_SCRATCH_DIR: &str = "REPO_SCRATCH_DIR";

const DEFAULT_AUTH_MODE: &str = "ssh";
const DEFAULT_PRIVATE_KEY_PATH: &str = "/app/.ssh/privkey.pem";

/// Fatal, startup-time configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("SSH private key '{path}' is unreadable: {source}")]
    KeyUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH private key '{path}' is invalid: {reason}")]
    KeyInvalid { path: PathBuf, reason: String },

    #[error("Git token is missing or empty")]
    TokenMissing,

    #[error("Unknown git auth mode '{0}' (expected 'ssh' or 'token')")]
    UnknownAuthMode(String),

    #[error("Missing required setting {0}")]
    MissingSetting(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("Failed to write askpass helper: {0}")]
    Askpass(#[source] std::io::Error),

    #[error("Failed to resolve secret: {0}")]
    Secret(#[from] SecretError),
}

/// Author identity stamped on every commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        Self {
            name: "LiteWebServices Portal".to_string(),
            email: "noreply@example.com".to_string(),
        }
    }
}

/// Bounds for the repository handle cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum number of live handles.
    pub max_entries: u64,
    /// Handles not requested for this long are evicted.
    pub idle_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 64,
            idle_timeout: Duration::from_secs(3600),
        }
    }
}

/// Settings for the repository storage core.
#[derive(Debug)]
pub struct StoreConfig {
    /// The single auth strategy used for every remote.
    pub auth: AuthStrategy,
    /// Git hosting vendor base URL, e.g. `https://gitea.example.com`.
    pub vendor_base_url: String,
    /// Account or organization owning the project repositories.
    pub account: String,
    pub default_branch: String,
    pub author: CommitIdentity,
    /// Upper bound for clone, fetch and push.
    pub network_timeout: Duration,
    pub cache: CacheSettings,
    /// Root directory under which private checkouts are created.
    pub scratch_dir: PathBuf,
}

impl StoreConfig {
    /// Creates a config with defaults for everything but the essentials.
    pub fn new(
        auth: AuthStrategy,
        vendor_base_url: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            auth,
            vendor_base_url: vendor_base_url.into(),
            account: account.into(),
            default_branch: "main".to_string(),
            author: CommitIdentity::default(),
            network_timeout: Duration::from_secs(120),
            cache: CacheSettings::default(),
            scratch_dir: default_scratch_dir(),
        }
    }

    /// Loads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mode = get(ENV_AUTH_MODE).unwrap_or_else(|| DEFAULT_AUTH_MODE.to_string());
        let key_path =
            get(ENV_PRIVATE_KEY_PATH).unwrap_or_else(|| DEFAULT_PRIVATE_KEY_PATH.to_string());
        // Passphrases may legitimately carry surrounding whitespace.
        let passphrase = lookup(ENV_PRIVATE_KEY_PASSWORD).filter(|v| !v.is_empty());
        let token = resolve_secret_optional(
            get(ENV_TOKEN).as_deref(),
            get(ENV_TOKEN_FILE).as_deref(),
        )?;

        let auth = AuthStrategy::from_mode(&mode, &key_path, passphrase, token)?;

        let vendor_base_url = get(ENV_VENDOR).ok_or(ConfigError::MissingSetting(ENV_VENDOR))?;
        let account = get(ENV_ACCOUNT).ok_or(ConfigError::MissingSetting(ENV_ACCOUNT))?;

        let mut config = Self::new(auth, vendor_base_url, account);
        if let Some(branch) = get(ENV_DEFAULT_BRANCH) {
            config.default_branch = branch;
        }
        if let Some(name) = get(ENV_AUTHOR_NAME) {
            config.author.name = name;
        }
        if let Some(email) = get(ENV_AUTHOR_EMAIL) {
            config.author.email = email;
        }
        if let Some(secs) = parse_u64(ENV_NETWORK_TIMEOUT, get(ENV_NETWORK_TIMEOUT))? {
            config.network_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = parse_u64(ENV_CACHE_MAX_ENTRIES, get(ENV_CACHE_MAX_ENTRIES))? {
            config.cache.max_entries = max;
        }
        if let Some(secs) = parse_u64(ENV_CACHE_IDLE_SECS, get(ENV_CACHE_IDLE_SECS))? {
            config.cache.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = get(ENV_SCRATCH_DIR) {
            config.scratch_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

fn parse_u64(name: &'static str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidSetting {
            name,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(n) => Ok(Some(n)),
        Err(e) => Err(ConfigError::InvalidSetting {
            name,
            reason: format!("'{}' is not a number: {}", value, e),
        }),
    }
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("lwsportal-repos")
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_token_mode_with_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_AUTH_MODE, "token"),
            (ENV_TOKEN, "s3cret"),
            (ENV_VENDOR, "https://gitea.example.com"),
            (ENV_ACCOUNT, "acme-org"),
        ]))
        .unwrap();

        match &config.auth {
            AuthStrategy::Token { token } => assert_eq!(token.expose_secret(), "s3cret"),
            other => panic!("unexpected strategy: {other:?}"),
        }
        assert_eq!(config.default_branch, "main");
        assert_eq!(config.author, CommitIdentity::default());
        assert_eq!(config.network_timeout, Duration::from_secs(120));
        assert_eq!(config.cache, CacheSettings::default());
    }

    #[test]
    fn test_defaults_to_ssh_mode() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_VENDOR, "https://github.com"),
            (ENV_ACCOUNT, "acme-org"),
        ]))
        .unwrap();

        match &config.auth {
            AuthStrategy::SshKey {
                private_key_path,
                passphrase,
            } => {
                assert_eq!(private_key_path, &PathBuf::from(DEFAULT_PRIVATE_KEY_PATH));
                assert!(passphrase.is_none());
            }
            other => panic!("unexpected strategy: {other:?}"),
        }
    }

    #[test]
    fn test_overrides() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_AUTH_MODE, "token"),
            (ENV_TOKEN, "t"),
            (ENV_VENDOR, "https://gitea.example.com"),
            (ENV_ACCOUNT, "acme-org"),
            (ENV_DEFAULT_BRANCH, "trunk"),
            (ENV_AUTHOR_NAME, "Bot"),
            (ENV_AUTHOR_EMAIL, "bot@example.com"),
            (ENV_NETWORK_TIMEOUT, "15"),
            (ENV_CACHE_MAX_ENTRIES, "8"),
            (ENV_CACHE_IDLE_SECS, "60"),
            (ENV_SCRATCH_DIR, "/var/tmp/repos"),
        ]))
        .unwrap();

        assert_eq!(config.default_branch, "trunk");
        assert_eq!(config.author.name, "Bot");
        assert_eq!(config.author.email, "bot@example.com");
        assert_eq!(config.network_timeout, Duration::from_secs(15));
        assert_eq!(config.cache.max_entries, 8);
        assert_eq!(config.cache.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.scratch_dir, PathBuf::from("/var/tmp/repos"));
    }

    #[test]
    fn test_unknown_mode_is_fatal() {
        let result = StoreConfig::from_lookup(lookup(&[
            (ENV_AUTH_MODE, "kerberos"),
            (ENV_VENDOR, "https://github.com"),
            (ENV_ACCOUNT, "acme-org"),
        ]));
        assert!(matches!(result, Err(ConfigError::UnknownAuthMode(m)) if m == "kerberos"));
    }

    #[test]
    fn test_missing_vendor() {
        let result = StoreConfig::from_lookup(lookup(&[
            (ENV_AUTH_MODE, "token"),
            (ENV_TOKEN, "t"),
            (ENV_ACCOUNT, "acme-org"),
        ]));
        assert!(matches!(result, Err(ConfigError::MissingSetting(ENV_VENDOR))));
    }

    #[test]
    fn test_invalid_number() {
        let result = StoreConfig::from_lookup(lookup(&[
            (ENV_AUTH_MODE, "token"),
            (ENV_TOKEN, "t"),
            (ENV_VENDOR, "https://github.com"),
            (ENV_ACCOUNT, "acme-org"),
            (ENV_NETWORK_TIMEOUT, "soon"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidSetting {
                name: ENV_NETWORK_TIMEOUT,
                ..
            })
        ));

        let result = StoreConfig::from_lookup(lookup(&[
            (ENV_AUTH_MODE, "token"),
            (ENV_TOKEN, "t"),
            (ENV_VENDOR, "https://github.com"),
            (ENV_ACCOUNT, "acme-org"),
            (ENV_CACHE_MAX_ENTRIES, "0"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidSetting { .. })));
    }

    #[test]
    fn test_token_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "file-token\n").unwrap();

        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_AUTH_MODE, "token"),
            (ENV_TOKEN_FILE, path.to_str().unwrap()),
            (ENV_VENDOR, "https://github.com"),
            (ENV_ACCOUNT, "acme-org"),
        ]))
        .unwrap();

        match &config.auth {
            AuthStrategy::Token { token } => assert_eq!(token.expose_secret(), "file-token"),
            other => panic!("unexpected strategy: {other:?}"),
        }
    }

    // Tests that modify environment variables must run serially.
    #[test]
    #[serial_test::serial]
    fn test_from_env() {
        std::env::set_var(ENV_AUTH_MODE, "Token");
        std::env::set_var(ENV_TOKEN, "env-token");
        std::env::set_var(ENV_VENDOR, "https://gitea.example.com");
        std::env::set_var(ENV_ACCOUNT, "acme-org");
        std::env::set_var(ENV_CACHE_IDLE_SECS, "90");

        let config = StoreConfig::from_env().unwrap();
        assert!(matches!(config.auth, AuthStrategy::Token { .. }));
        assert_eq!(config.account, "acme-org");
        assert_eq!(config.cache.idle_timeout, Duration::from_secs(90));

        for name in [
            ENV_AUTH_MODE,
            ENV_TOKEN,
            ENV_VENDOR,
            ENV_ACCOUNT,
            ENV_CACHE_IDLE_SECS,
        ] {
            std::env::remove_var(name);
        }
    }
}

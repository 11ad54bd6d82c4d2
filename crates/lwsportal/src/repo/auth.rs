//! Git transport authentication.
//!
//! Exactly one [`AuthStrategy`] is configured per process. Resolving it
//! validates the configured material and yields [`TransportCredentials`]:
//! the environment handed to every `git` child process that talks to the
//! remote.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::ConfigError;
use crate::secrets::expand_home;

/// Username every git hosting vendor expects on its SSH endpoint, and the
/// basic-auth username paired with access tokens.
pub const TRANSPORT_USERNAME: &str = "git";

/// Configured authentication for reaching project remotes.
#[derive(Debug)]
pub enum AuthStrategy {
    /// Private key on disk, optionally passphrase protected.
    SshKey {
        private_key_path: PathBuf,
        passphrase: Option<SecretString>,
    },
    /// Access token used as the HTTP basic-auth password.
    Token { token: SecretString },
}

/// Which strategy produced a set of credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Ssh,
    Token,
}

impl AuthStrategy {
    /// Selects a strategy from the configured mode string.
    ///
    /// Validation of the key or token is deferred to [`AuthStrategy::resolve`].
    pub fn from_mode(
        mode: &str,
        private_key_path: &str,
        passphrase: Option<String>,
        token: Option<SecretString>,
    ) -> Result<Self, ConfigError> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "ssh" => Ok(AuthStrategy::SshKey {
                private_key_path: expand_home(private_key_path),
                passphrase: passphrase.map(SecretString::from),
            }),
            "token" => Ok(AuthStrategy::Token {
                token: token.unwrap_or_else(|| SecretString::from(String::new())),
            }),
            _ => Err(ConfigError::UnknownAuthMode(mode.trim().to_string())),
        }
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            AuthStrategy::SshKey { .. } => AuthMethod::Ssh,
            AuthStrategy::Token { .. } => AuthMethod::Token,
        }
    }

    /// Builds the remote URL for a project under this strategy.
    ///
    /// SSH remotes use the scp-like `git@host:account/project.git` form; token
    /// remotes append `account/project` to the vendor base URL.
    pub fn remote_url(&self, vendor_base_url: &str, account: &str, project: &str) -> String {
        let base = vendor_base_url.trim_end_matches('/');
        match self {
            AuthStrategy::SshKey { .. } => {
                let host = base
                    .strip_prefix("https://")
                    .or_else(|| base.strip_prefix("http://"))
                    .unwrap_or(base);
                format!("{}@{}:{}/{}.git", TRANSPORT_USERNAME, host, account, project)
            }
            AuthStrategy::Token { .. } => format!("{}/{}/{}", base, account, project),
        }
    }

    /// Validates the configured material and produces transport credentials.
    pub fn resolve(&self) -> Result<TransportCredentials, ConfigError> {
        match self {
            AuthStrategy::SshKey {
                private_key_path,
                passphrase,
            } => resolve_ssh(private_key_path, passphrase.as_ref()),
            AuthStrategy::Token { token } => resolve_token(token),
        }
    }
}

fn resolve_ssh(
    key_path: &Path,
    passphrase: Option<&SecretString>,
) -> Result<TransportCredentials, ConfigError> {
    let bytes = std::fs::read(key_path).map_err(|source| ConfigError::KeyUnreadable {
        path: key_path.to_path_buf(),
        source,
    })?;
    let pem = std::str::from_utf8(&bytes).map_err(|_| ConfigError::KeyInvalid {
        path: key_path.to_path_buf(),
        reason: "key file is not valid UTF-8".to_string(),
    })?;

    let passphrase = passphrase.map(|p| p.expose_secret()).filter(|p| !p.is_empty());
    russh_keys::decode_secret_key(pem, passphrase).map_err(|e| ConfigError::KeyInvalid {
        path: key_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    // Quote the key path for the shell git uses to run GIT_SSH_COMMAND.
    let safe_path = {
        let display = key_path.display().to_string();
        let escaped = shell_escape(&display);
        if escaped.starts_with('-') {
            format!("'./{}'", escaped)
        } else {
            format!("'{}'", escaped)
        }
    };

    let mut env_vars = vec![
        (
            "GIT_SSH_COMMAND".to_string(),
            format!(
                "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
                safe_path
            ),
        ),
        ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
    ];

    let askpass = match passphrase {
        Some(passphrase) => {
            let script = AskpassScript::write(&format!(
                "#!/bin/sh\nprintf '%s\\n' '{}'\n",
                shell_escape(passphrase)
            ))?;
            env_vars.push(("SSH_ASKPASS".to_string(), script.path_string()?));
            env_vars.push(("SSH_ASKPASS_REQUIRE".to_string(), "force".to_string()));
            Some(script)
        }
        None => None,
    };

    Ok(TransportCredentials {
        method: AuthMethod::Ssh,
        env_vars,
        _askpass: askpass,
    })
}

fn resolve_token(token: &SecretString) -> Result<TransportCredentials, ConfigError> {
    let token = token.expose_secret();
    if token.trim().is_empty() {
        return Err(ConfigError::TokenMissing);
    }

    // git asks for the username first, then the password.
    let script = AskpassScript::write(&format!(
        "#!/bin/sh\ncase \"$1\" in\n  Username*|username*) printf '%s\\n' '{}' ;;\n  *) printf '%s\\n' '{}' ;;\nesac\n",
        TRANSPORT_USERNAME,
        shell_escape(token)
    ))?;

    let env_vars = vec![
        ("GIT_ASKPASS".to_string(), script.path_string()?),
        ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
    ];

    Ok(TransportCredentials {
        method: AuthMethod::Token,
        env_vars,
        _askpass: Some(script),
    })
}

/// Escapes a value for safe use inside single-quoted shell strings.
/// Replaces single quotes with '\'' (end quote, escaped quote, start quote).
pub fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Credentials ready to be handed to `git` child processes.
///
/// Owns any helper script it references; the script is deleted when the
/// credentials are dropped, so they must outlive every command using them.
#[derive(Debug)]
pub struct TransportCredentials {
    method: AuthMethod,
    env_vars: Vec<(String, String)>,
    _askpass: Option<AskpassScript>,
}

impl TransportCredentials {
    pub fn method(&self) -> AuthMethod {
        self.method
    }

    pub fn username(&self) -> &'static str {
        TRANSPORT_USERNAME
    }

    /// Whether transport progress should be requested and logged.
    pub fn reports_progress(&self) -> bool {
        self.method == AuthMethod::Ssh
    }

    pub(crate) fn env_vars(&self) -> &[(String, String)] {
        &self.env_vars
    }
}

/// Owner-only askpass helper script, removed on drop.
#[derive(Debug)]
struct AskpassScript {
    path: PathBuf,
}

impl AskpassScript {
    fn write(contents: &str) -> Result<Self, ConfigError> {
        let path =
            std::env::temp_dir().join(format!(".lws-askpass-{}.sh", uuid::Uuid::new_v4()));

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o700)
                .open(&path)
                .map_err(ConfigError::Askpass)?;
            file.write_all(contents.as_bytes())
                .map_err(ConfigError::Askpass)?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&path, contents).map_err(ConfigError::Askpass)?;
        }

        Ok(Self { path })
    }

    fn path_string(&self) -> Result<String, ConfigError> {
        self.path.to_str().map(str::to_string).ok_or_else(|| {
            ConfigError::Askpass(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "temp directory path contains non-UTF8 characters",
            ))
        })
    }
}

impl Drop for AskpassScript {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Failed to clean up askpass script: {}", e);
        }
    }
}

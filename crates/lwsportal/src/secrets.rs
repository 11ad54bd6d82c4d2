//! Secret resolution for git credentials.
//!
//! A secret can be given directly (local development) or through a file
//! (the Docker/Kubernetes secrets pattern). Direct values win over files.

use secrecy::SecretString;
use std::fs;
use std::path::PathBuf;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need a direct value or a file path)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Resolves a secret from a direct value or a file, in that order.
///
/// File contents are trimmed, so a trailing newline written by `echo` or a
/// secrets mount does not end up in the credential.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
) -> Result<SecretString, SecretError> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return fs::read_to_string(&expanded)
            .map(|content| SecretString::from(content.trim().to_string()))
            .map_err(|source| SecretError::FileReadError {
                path: expanded.display().to_string(),
                source,
            });
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but a missing source is `Ok(None)`.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
) -> Result<Option<SecretString>, SecretError> {
    match resolve_secret(direct, file_path) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Expands a leading `~` to the user's home directory.
///
/// `~user/...` is not supported; such paths are returned unchanged.
pub(crate) fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_direct_value_takes_priority() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "file_value").unwrap();

        let result =
            resolve_secret(Some("direct_value"), Some(temp_file.path().to_str().unwrap()))
                .unwrap();
        assert_eq!(result.expose_secret(), "direct_value");
    }

    #[test]
    fn test_file_content_trimmed() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "  secret_with_whitespace  ").unwrap();

        let result = resolve_secret(None, Some(temp_file.path().to_str().unwrap())).unwrap();
        assert_eq!(result.expose_secret(), "secret_with_whitespace");
    }

    #[test]
    fn test_empty_direct_falls_back_to_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "from_file").unwrap();

        let result = resolve_secret(Some(""), Some(temp_file.path().to_str().unwrap())).unwrap();
        assert_eq!(result.expose_secret(), "from_file");
    }

    #[test]
    fn test_no_source_error() {
        assert!(matches!(
            resolve_secret(None, None),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(matches!(
            resolve_secret(Some(""), Some("")),
            Err(SecretError::NoSourceProvided)
        ));
    }

    #[test]
    fn test_file_not_found_error() {
        let result = resolve_secret(None, Some("/nonexistent/path/to/secret"));
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    fn test_resolve_secret_optional() {
        assert!(resolve_secret_optional(None, None).unwrap().is_none());
        let value = resolve_secret_optional(Some("tok"), None).unwrap();
        assert_eq!(value.unwrap().expose_secret(), "tok");
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_home("relative/path"), PathBuf::from("relative/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.ssh/id"), home.join(".ssh/id"));
            assert_eq!(expand_home("~"), home);
        }
    }
}

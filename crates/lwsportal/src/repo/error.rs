//! Repository-layer error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// A failed `git` invocation, classified from its stderr.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git network error: {0}")]
    Network(String),

    #[error("Git authentication failed: {0}")]
    AuthFailed(String),

    #[error("Git operation timed out after {0}s")]
    Timeout(u64),

    #[error("Git operation failed: {0}")]
    Command(String),

    #[error("Failed to run git: {0}")]
    Spawn(#[source] std::io::Error),
}

impl GitError {
    /// Returns true if the error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GitError::Network(_) | GitError::Timeout(_))
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitError::Network(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("could not read username")
        || lower.contains("host key verification failed")
    {
        return GitError::AuthFailed(stderr.trim().to_string());
    }

    GitError::Command(stderr.trim().to_string())
}

/// Errors raised by working-tree filesystem access.
#[derive(Error, Debug)]
pub enum WorkTreeError {
    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    #[error("Invalid working tree path: {0}")]
    InvalidPath(String),

    #[error("Not found in working tree: {0}")]
    NotFound(String),

    #[error("Working tree I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkTreeError {
    pub(crate) fn io(path: PathBuf, relative: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            WorkTreeError::NotFound(relative.to_string())
        } else {
            WorkTreeError::Io { path, source }
        }
    }
}

/// Errors raised by [`RepoHandle`](super::RepoHandle) operations.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Failed to resolve credentials for '{project}': {source}")]
    Credentials {
        project: String,
        #[source]
        source: ConfigError,
    },

    #[error("Clone of '{project}' failed: {source}")]
    Clone {
        project: String,
        #[source]
        source: GitError,
    },

    #[error("Pull of '{project}' failed: {source}")]
    Pull {
        project: String,
        #[source]
        source: GitError,
    },

    #[error("Push of '{project}' failed: {source}")]
    Push {
        project: String,
        #[source]
        source: GitError,
    },

    #[error("Commit in '{project}' failed: {source}")]
    Commit {
        project: String,
        #[source]
        source: GitError,
    },

    #[error("Repository '{0}' has not been cloned")]
    NotCloned(String),

    #[error("Repository '{0}' is already cloned; pull instead")]
    AlreadyCloned(String),

    #[error("Failed to prepare scratch checkout at '{path}': {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    WorkTree(#[from] WorkTreeError),
}

impl RepoError {
    /// Returns true for transport failures a caller may retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepoError::Clone { source, .. }
            | RepoError::Pull { source, .. }
            | RepoError::Push { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_network_error() {
        let err = classify_git_error("fatal: unable to access 'https://x/': Could not resolve host: x");
        assert!(matches!(err, GitError::Network(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_auth_error() {
        let err = classify_git_error("git@github.com: Permission denied (publickey).");
        assert!(matches!(err, GitError::AuthFailed(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_generic_error() {
        let err = classify_git_error("  fatal: Remote branch nope not found in upstream origin\n");
        match err {
            GitError::Command(msg) => {
                assert_eq!(msg, "fatal: Remote branch nope not found in upstream origin")
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_worktree_io_maps_not_found() {
        let err = WorkTreeError::io(
            PathBuf::from("/tmp/x/functions/a.py"),
            "functions/a.py",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, WorkTreeError::NotFound(p) if p == "functions/a.py"));
    }

    #[test]
    fn test_repo_error_retryable() {
        let err = RepoError::Push {
            project: "acme".to_string(),
            source: GitError::Timeout(30),
        };
        assert!(err.is_retryable());
        assert!(!RepoError::NotCloned("acme".to_string()).is_retryable());
    }
}

//! Pure data types for repository operations.

use serde::{Deserialize, Serialize};

/// Where a handle is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Constructed, nothing fetched yet.
    Uninitialized,
    /// Freshly cloned.
    Cloned,
    /// Reused from the registry and not yet refreshed, or its refresh failed.
    Stale,
    /// Matches the remote head as of the last pull.
    Fresh,
}

impl LifecycleState {
    pub fn is_cloned(self) -> bool {
        self != LifecycleState::Uninitialized
    }
}

/// How a path changed in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Verb used in commit messages.
    pub fn verb(self) -> &'static str {
        match self {
            ChangeKind::Added => "add",
            ChangeKind::Modified => "update",
            ChangeKind::Deleted => "delete",
        }
    }
}

/// A single staged path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedChange {
    /// Working-tree relative path with `/` separators.
    pub path: String,
    pub kind: ChangeKind,
}

/// Result of a commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    /// Staged changes covered by the commit. Empty when nothing changed.
    pub changes: Vec<StagedChange>,
    /// Commit hash, absent when there was nothing to commit.
    pub commit_id: Option<String>,
    pub message: Option<String>,
}

impl CommitSummary {
    pub fn is_empty(&self) -> bool {
        self.commit_id.is_none()
    }
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PushOutcome {
    Pushed,
    UpToDate,
}

/// Result of a pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PullOutcome {
    /// Local head already matched the remote; the tree was left alone.
    UpToDate,
    /// The tree was force-reset to the remote head.
    Reset { head: String },
}

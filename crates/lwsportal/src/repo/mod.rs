//! Per-project git working copies.
//!
//! A [`RepoHandle`] owns a private shallow checkout of one project's remote
//! and exposes clone, pull, commit and push on top of the `git` CLI, plus
//! lock-guarded filesystem access to the checked-out tree.

pub mod auth;
mod command;
pub mod error;
mod handle;
pub mod parse;
pub mod types;
pub mod worktree;

pub use auth::{AuthMethod, AuthStrategy, TransportCredentials};
pub use error::{GitError, RepoError, WorkTreeError};
pub use handle::RepoHandle;
pub use types::{ChangeKind, CommitSummary, LifecycleState, PullOutcome, PushOutcome, StagedChange};
pub use worktree::{TreeEntry, TreeMetadata, WorkTree};

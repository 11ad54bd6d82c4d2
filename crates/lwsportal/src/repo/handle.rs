//! Per-project repository handle.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::Instrument;

use super::auth::TransportCredentials;
use super::command::{run_local, run_local_check, run_local_with_env, run_remote, stdout_text};
use super::error::{GitError, RepoError};
use super::parse::{commit_message, parse_name_status, push_was_up_to_date};
use super::types::{CommitSummary, LifecycleState, PullOutcome, PushOutcome};
use super::worktree::{to_tree_path, TreeEntry, TreeMetadata, WorkTree};
use crate::config::StoreConfig;
use crate::sanitize::{redact_repo_url, scratch_prefix};

/// One project's private checkout, branch and remote.
///
/// Every operation, including plain filesystem access, takes the handle's
/// lock, so a handle is only ever mutated by one operation at a time.
pub struct RepoHandle {
    project_id: String,
    branch: String,
    remote_url: String,
    config: Arc<StoreConfig>,
    state: Mutex<RepoState>,
}

struct RepoState {
    lifecycle: LifecycleState,
    checkout: Option<tempfile::TempDir>,
}

impl RepoState {
    fn root(&self, project_id: &str) -> Result<PathBuf, RepoError> {
        self.checkout
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .ok_or_else(|| RepoError::NotCloned(project_id.to_string()))
    }
}

impl fmt::Debug for RepoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoHandle")
            .field("project_id", &self.project_id)
            .field("branch", &self.branch)
            .field("remote_url", &redact_repo_url(&self.remote_url))
            .finish()
    }
}

impl RepoHandle {
    /// Creates an uncloned handle. `branch` defaults to the configured default branch.
    pub fn new(project_id: impl Into<String>, branch: Option<&str>, config: Arc<StoreConfig>) -> Self {
        let project_id = project_id.into();
        let branch = branch
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(&config.default_branch)
            .to_string();
        let remote_url = config
            .auth
            .remote_url(&config.vendor_base_url, &config.account, &project_id);

        Self {
            project_id,
            branch,
            remote_url,
            config,
            state: Mutex::new(RepoState {
                lifecycle: LifecycleState::Uninitialized,
                checkout: None,
            }),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    pub async fn lifecycle(&self) -> LifecycleState {
        self.state.lock().await.lifecycle
    }

    /// Flags a cached handle as possibly behind its remote.
    pub(crate) async fn mark_stale(&self) {
        let mut state = self.state.lock().await;
        if state.lifecycle.is_cloned() {
            state.lifecycle = LifecycleState::Stale;
        }
    }

    fn credentials(&self) -> Result<TransportCredentials, RepoError> {
        self.config
            .auth
            .resolve()
            .map_err(|source| RepoError::Credentials {
                project: self.project_id.clone(),
                source,
            })
    }

    /// Shallow, single-branch clone into a fresh private checkout.
    ///
    /// The checkout only replaces the handle's state once git succeeded;
    /// a failed or timed-out clone leaves nothing behind.
    pub async fn clone_remote(&self) -> Result<(), RepoError> {
        let span = tracing::info_span!(
            "repo.clone",
            project = %self.project_id,
            branch = %self.branch,
        );
        self.clone_inner().instrument(span).await
    }

    async fn clone_inner(&self) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        if state.lifecycle.is_cloned() {
            return Err(RepoError::AlreadyCloned(self.project_id.clone()));
        }

        let credentials = self.credentials()?;

        let scratch_root = &self.config.scratch_dir;
        std::fs::create_dir_all(scratch_root).map_err(|source| RepoError::Scratch {
            path: scratch_root.clone(),
            source,
        })?;
        let checkout = tempfile::Builder::new()
            .prefix(&scratch_prefix(&self.project_id))
            .tempdir_in(scratch_root)
            .map_err(|source| RepoError::Scratch {
                path: scratch_root.clone(),
                source,
            })?;

        log::info!(
            "Cloning {} ({}) into {}",
            redact_repo_url(&self.remote_url),
            self.branch,
            checkout.path().display()
        );

        let target = checkout.path().to_string_lossy().to_string();
        let mut args = vec![
            "clone",
            "--depth",
            "1",
            "--single-branch",
            "--branch",
            self.branch.as_str(),
        ];
        if credentials.reports_progress() {
            args.push("--progress");
        }
        args.push(self.remote_url.as_str());
        args.push(target.as_str());

        run_remote(
            scratch_root,
            &args,
            &credentials,
            self.config.network_timeout,
        )
        .await
        .map_err(|source| RepoError::Clone {
            project: self.project_id.clone(),
            source,
        })?;

        state.checkout = Some(checkout);
        state.lifecycle = LifecycleState::Cloned;
        log::info!("Cloned {}", self.project_id);
        Ok(())
    }

    /// Fetches the remote branch and force-resets the tree when it moved.
    ///
    /// When the remote head equals the local head, or is an ancestor of it,
    /// nothing is checked out, so uncommitted edits and unpushed commits
    /// survive. A failed fetch leaves the tree and
    /// lifecycle untouched.
    pub async fn pull(&self) -> Result<PullOutcome, RepoError> {
        let span = tracing::info_span!("repo.pull", project = %self.project_id);
        self.pull_inner().instrument(span).await
    }

    async fn pull_inner(&self) -> Result<PullOutcome, RepoError> {
        let mut state = self.state.lock().await;
        let root = state.root(&self.project_id)?;
        let pull_err = |source: GitError| RepoError::Pull {
            project: self.project_id.clone(),
            source,
        };

        let credentials = self.credentials()?;
        let remote_ref = format!("refs/remotes/origin/{}", self.branch);
        let refspec = format!("+refs/heads/{}:{}", self.branch, remote_ref);
        let mut args = vec!["fetch", "--depth", "1", "--no-tags"];
        if credentials.reports_progress() {
            args.push("--progress");
        }
        args.push("origin");
        args.push(refspec.as_str());

        run_remote(&root, &args, &credentials, self.config.network_timeout)
            .await
            .map_err(pull_err)?;

        let local = rev_parse(&root, "HEAD").await.map_err(pull_err)?;
        let remote = rev_parse(&root, &remote_ref).await.map_err(pull_err)?;

        if local == remote {
            log::debug!("{} already up to date at {}", self.project_id, local);
            state.lifecycle = LifecycleState::Fresh;
            return Ok(PullOutcome::UpToDate);
        }

        // Local commits on top of an unchanged remote head are not divergence.
        let ahead = run_local_check(
            &root,
            ["merge-base", "--is-ancestor", remote.as_str(), local.as_str()],
        )
        .await
        .map_err(pull_err)?;
        if ahead {
            log::debug!(
                "{} has unpushed commits on top of {}; keeping {}",
                self.project_id,
                remote,
                local
            );
            state.lifecycle = LifecycleState::Fresh;
            return Ok(PullOutcome::UpToDate);
        }

        run_local(&root, ["reset", "--hard", "--quiet", remote.as_str()])
            .await
            .map_err(pull_err)?;
        run_local(&root, ["clean", "-fdx", "--quiet"])
            .await
            .map_err(pull_err)?;

        state.lifecycle = LifecycleState::Fresh;
        log::info!("Reset {} from {} to {}", self.project_id, local, remote);
        Ok(PullOutcome::Reset { head: remote })
    }

    /// Stages the given paths by their current tree state and commits them.
    ///
    /// A path present in the tree is staged as an addition or update; a path
    /// missing from the tree is staged as a deletion. Callers mutate the tree
    /// first and commit afterwards. Nothing staged is a successful no-op.
    pub async fn commit<S: AsRef<str>>(&self, paths: &[S]) -> Result<CommitSummary, RepoError> {
        let span = tracing::info_span!(
            "repo.commit",
            project = %self.project_id,
            paths = paths.len(),
        );
        self.commit_inner(paths).instrument(span).await
    }

    async fn commit_inner<S: AsRef<str>>(&self, paths: &[S]) -> Result<CommitSummary, RepoError> {
        let state = self.state.lock().await;
        let root = state.root(&self.project_id)?;
        let commit_err = |source: GitError| RepoError::Commit {
            project: self.project_id.clone(),
            source,
        };

        let tree = WorkTree::new(&root);
        let mut tree_paths = Vec::with_capacity(paths.len());
        for path in paths {
            tree_paths.push(to_tree_path(path.as_ref())?);
        }

        for tree_path in &tree_paths {
            if tree.exists(tree_path)? {
                run_local(&root, ["add", "--all", "--", tree_path.as_str()])
                    .await
                    .map_err(commit_err)?;
            } else {
                run_local(
                    &root,
                    [
                        "rm",
                        "--cached",
                        "-r",
                        "--ignore-unmatch",
                        "--quiet",
                        "--",
                        tree_path.as_str(),
                    ],
                )
                .await
                .map_err(commit_err)?;
            }
        }

        // Scope both the diff and the commit to the requested paths, so
        // anything else left in the index never rides along.
        let mut diff_args = vec!["diff", "--cached", "--name-status", "--no-renames", "-z", "--"];
        diff_args.extend(tree_paths.iter().map(String::as_str));
        let diff = run_local(&root, &diff_args).await.map_err(commit_err)?;
        let changes = parse_name_status(&diff.stdout);

        if changes.is_empty() {
            log::debug!("Nothing to commit in {}", self.project_id);
            return Ok(CommitSummary::default());
        }

        let message = commit_message(&changes);
        let author = &self.config.author;
        let identity = [
            ("GIT_AUTHOR_NAME", author.name.as_str()),
            ("GIT_AUTHOR_EMAIL", author.email.as_str()),
            ("GIT_COMMITTER_NAME", author.name.as_str()),
            ("GIT_COMMITTER_EMAIL", author.email.as_str()),
        ];
        let mut commit_args = vec![
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "--no-verify",
            "-m",
            message.as_str(),
            "--",
        ];
        commit_args.extend(changes.iter().map(|c| c.path.as_str()));

        if let Err(source) = run_local_with_env(&root, &commit_args, &identity).await {
            let mut reset_args = vec!["reset", "--quiet", "--"];
            reset_args.extend(tree_paths.iter().map(String::as_str));
            if let Err(e) = run_local(&root, &reset_args).await {
                log::warn!("Failed to unstage paths in {}: {}", self.project_id, e);
            }
            return Err(commit_err(source));
        }

        let commit_id = rev_parse(&root, "HEAD").await.map_err(commit_err)?;
        log::info!(
            "Committed {} change(s) to {} as {}",
            changes.len(),
            self.project_id,
            commit_id
        );

        Ok(CommitSummary {
            changes,
            commit_id: Some(commit_id),
            message: Some(message),
        })
    }

    /// Pushes the checked-out head to the remote branch.
    pub async fn push(&self) -> Result<PushOutcome, RepoError> {
        let span = tracing::info_span!("repo.push", project = %self.project_id);
        self.push_inner().instrument(span).await
    }

    async fn push_inner(&self) -> Result<PushOutcome, RepoError> {
        let state = self.state.lock().await;
        let root = state.root(&self.project_id)?;
        let credentials = self.credentials()?;

        let refspec = format!("HEAD:refs/heads/{}", self.branch);
        let mut args = vec!["push", "--porcelain"];
        if credentials.reports_progress() {
            args.push("--progress");
        }
        args.push("origin");
        args.push(refspec.as_str());

        let output = run_remote(&root, &args, &credentials, self.config.network_timeout)
            .await
            .map_err(|source| RepoError::Push {
                project: self.project_id.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if push_was_up_to_date(&stdout, &stderr) {
            log::debug!("{} already up to date on remote", self.project_id);
            Ok(PushOutcome::UpToDate)
        } else {
            log::info!("Pushed {} to {}", self.project_id, self.branch);
            Ok(PushOutcome::Pushed)
        }
    }

    /// Runs `f` against the working tree while holding the handle's lock.
    pub async fn with_worktree<R, F>(&self, f: F) -> Result<R, RepoError>
    where
        F: FnOnce(&WorkTree<'_>) -> R,
    {
        let state = self.state.lock().await;
        let root = state.root(&self.project_id)?;
        Ok(f(&WorkTree::new(&root)))
    }

    pub async fn open(&self, path: &str) -> Result<Vec<u8>, RepoError> {
        Ok(self.with_worktree(|tree| tree.open(path)).await??)
    }

    pub async fn read_to_string(&self, path: &str) -> Result<String, RepoError> {
        Ok(self.with_worktree(|tree| tree.read_to_string(path)).await??)
    }

    /// Creates or truncates a file; parents must exist.
    pub async fn create(&self, path: &str, contents: &[u8]) -> Result<(), RepoError> {
        Ok(self.with_worktree(|tree| tree.create(path, contents)).await??)
    }

    pub async fn remove(&self, path: &str) -> Result<(), RepoError> {
        Ok(self.with_worktree(|tree| tree.remove(path)).await??)
    }

    pub async fn mkdir_all(&self, path: &str) -> Result<(), RepoError> {
        Ok(self.with_worktree(|tree| tree.mkdir_all(path)).await??)
    }

    pub async fn read_dir(&self, path: &str) -> Result<Vec<TreeEntry>, RepoError> {
        Ok(self.with_worktree(|tree| tree.read_dir(path)).await??)
    }

    pub async fn stat(&self, path: &str) -> Result<TreeMetadata, RepoError> {
        Ok(self.with_worktree(|tree| tree.stat(path)).await??)
    }

    pub async fn exists(&self, path: &str) -> Result<bool, RepoError> {
        Ok(self.with_worktree(|tree| tree.exists(path)).await??)
    }

    /// Commit hash at the checkout's head.
    pub async fn head(&self) -> Result<String, RepoError> {
        let state = self.state.lock().await;
        let root = state.root(&self.project_id)?;
        rev_parse(&root, "HEAD")
            .await
            .map_err(|source| RepoError::Commit {
                project: self.project_id.clone(),
                source,
            })
    }
}

async fn rev_parse(root: &Path, rev: &str) -> Result<String, GitError> {
    let output = run_local(root, ["rev-parse", "--verify", "--quiet", rev]).await?;
    Ok(stdout_text(&output))
}

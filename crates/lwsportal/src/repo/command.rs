//! Running `git` as a child process.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::auth::TransportCredentials;
use super::error::{classify_git_error, GitError};
use super::parse::format_git_error;

fn base_command<I, S>(dir: &Path, args: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new("git");
    cmd.current_dir(dir)
        .args(args)
        // Messages are matched on, keep them untranslated.
        .env("LC_ALL", "C")
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Runs a local git command and returns its output, failing on non-zero exit.
pub(crate) async fn run_local<I, S>(dir: &Path, args: I) -> Result<Output, GitError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_local_with_env(dir, args, &[]).await
}

pub(crate) async fn run_local_with_env<I, S>(
    dir: &Path,
    args: I,
    env: &[(&str, &str)],
) -> Result<Output, GitError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = base_command(dir, args);
    for (key, value) in env {
        cmd.env(key, value);
    }
    let output = cmd.output().await.map_err(GitError::Spawn)?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(GitError::Command(format_git_error(&output)))
    }
}

/// Runs a local git predicate such as `merge-base --is-ancestor`.
///
/// Exit status 0 is `true` and 1 is `false`; anything else is a failure.
pub(crate) async fn run_local_check<I, S>(dir: &Path, args: I) -> Result<bool, GitError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = base_command(dir, args)
        .output()
        .await
        .map_err(GitError::Spawn)?;
    match output.status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(GitError::Command(format_git_error(&output))),
    }
}

/// Runs a git command that talks to the remote.
///
/// Credentials are injected through the environment, stderr is drained line by
/// line (and logged when the transport reports progress), and the whole run is
/// bounded by `limit`. On timeout the child is killed.
pub(crate) async fn run_remote<I, S>(
    dir: &Path,
    args: I,
    credentials: &TransportCredentials,
    limit: Duration,
) -> Result<Output, GitError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = base_command(dir, args);
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    for (key, value) in credentials.env_vars() {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(GitError::Spawn)?;
    let stderr_pipe = child.stderr.take();
    let stdout_pipe = child.stdout.take();
    let log_progress = credentials.reports_progress();

    let run = async {
        let stderr_task = async {
            let mut collected = Vec::new();
            if let Some(stderr) = stderr_pipe {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if log_progress {
                        log::debug!("git: {}", line.trim_end());
                    }
                    collected.extend_from_slice(line.as_bytes());
                    collected.push(b'\n');
                }
            }
            collected
        };

        let stdout_task = async {
            let mut collected = Vec::new();
            if let Some(mut stdout) = stdout_pipe {
                let _ = stdout.read_to_end(&mut collected).await;
            }
            collected
        };

        let (stderr, stdout) = tokio::join!(stderr_task, stdout_task);
        let status = child.wait().await?;
        Ok::<_, std::io::Error>(Output {
            status,
            stdout,
            stderr,
        })
    };

    let result = tokio::time::timeout(limit, run).await;
    match result {
        Ok(Ok(output)) if output.status.success() => Ok(output),
        Ok(Ok(output)) => Err(classify_git_error(&format_git_error(&output))),
        Ok(Err(e)) => Err(GitError::Spawn(e)),
        Err(_) => {
            let _ = child.start_kill();
            Err(GitError::Timeout(limit.as_secs()))
        }
    }
}

/// Trimmed stdout of a successful command.
pub(crate) fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

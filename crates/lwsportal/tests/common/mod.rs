//! Shared test utilities for lwsportal integration tests.
//!
//! `RemoteHarness` owns a temp directory holding bare "vendor" repositories
//! laid out as `{base}/{account}/{project}`, reachable through `file://`
//! URLs, plus a scratch root for handle checkouts.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tempfile::TempDir;

use lwsportal::{AuthStrategy, RepoHandle, StoreConfig};

pub const ACCOUNT: &str = "acme-org";
pub const OWNER: &str = "owner-1";

/// Runs git in `dir`, panicking with its stderr on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args([
            "-c",
            "user.name=Fixture",
            "-c",
            "user.email=fixture@example.com",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .env("LC_ALL", "C")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub struct RemoteHarness {
    temp_dir: TempDir,
    pub vendor_dir: PathBuf,
    pub scratch_dir: PathBuf,
}

impl RemoteHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let vendor_dir = temp_dir.path().join("vendor");
        let scratch_dir = temp_dir.path().join("scratch");
        std::fs::create_dir_all(vendor_dir.join(ACCOUNT)).unwrap();
        std::fs::create_dir_all(&scratch_dir).unwrap();
        Self {
            temp_dir,
            vendor_dir,
            scratch_dir,
        }
    }

    pub fn vendor_url(&self) -> String {
        format!("file://{}", self.vendor_dir.display())
    }

    pub fn remote_path(&self, project: &str) -> PathBuf {
        self.vendor_dir.join(ACCOUNT).join(project)
    }

    /// Token-mode config pointing at this harness.
    pub fn config(&self) -> StoreConfig {
        let auth = AuthStrategy::Token {
            token: SecretString::from("test-token".to_string()),
        };
        let mut config = StoreConfig::new(auth, self.vendor_url(), ACCOUNT);
        config.scratch_dir = self.scratch_dir.clone();
        config.network_timeout = Duration::from_secs(60);
        config
    }

    pub fn handle(&self, project: &str) -> RepoHandle {
        RepoHandle::new(project, None, Arc::new(self.config()))
    }

    /// Creates a bare remote on `main` with one commit holding a README.
    pub fn create_remote(&self, project: &str) -> PathBuf {
        let bare = self.remote_path(project);
        std::fs::create_dir_all(&bare).unwrap();
        git(&bare, &["init", "--bare", "--quiet"]);
        git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let seed = self.temp_dir.path().join(format!("seed-{}", project));
        std::fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(seed.join("README.md"), format!("# {}\n", project)).unwrap();
        git(&seed, &["add", "README.md"]);
        git(&seed, &["commit", "--quiet", "-m", "initial commit"]);
        git(&seed, &["push", "--quiet", bare.to_str().unwrap(), "main:main"]);
        std::fs::remove_dir_all(&seed).unwrap();

        bare
    }

    /// Pushes a commit to the remote from an unrelated clone.
    pub fn push_external(&self, project: &str, path: &str, contents: &str) -> String {
        let work = TempDir::new().unwrap();
        let bare = self.remote_path(project);
        git(
            work.path(),
            &["clone", "--quiet", bare.to_str().unwrap(), "checkout"],
        );
        let checkout = work.path().join("checkout");
        let target = checkout.join(path);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, contents).unwrap();
        git(&checkout, &["add", "--all"]);
        git(&checkout, &["commit", "--quiet", "-m", &format!("external {}", path)]);
        git(&checkout, &["push", "--quiet", "origin", "main"]);
        git(&checkout, &["rev-parse", "HEAD"])
    }

    pub fn remote_head(&self, project: &str) -> String {
        git(&self.remote_path(project), &["rev-parse", "refs/heads/main"])
    }

    /// File contents at the remote's `main`, if present.
    pub fn remote_file(&self, project: &str, path: &str) -> Option<String> {
        let output = Command::new("git")
            .current_dir(self.remote_path(project))
            .args(["show", &format!("main:{}", path)])
            .output()
            .expect("Failed to run git");
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub fn remote_commit_count(&self, project: &str) -> usize {
        git(&self.remote_path(project), &["rev-list", "--count", "main"])
            .parse()
            .unwrap()
    }

    pub fn remote_subject(&self, project: &str) -> String {
        git(&self.remote_path(project), &["log", "-1", "--format=%s", "main"])
    }

    pub fn remote_author(&self, project: &str) -> String {
        git(
            &self.remote_path(project),
            &["log", "-1", "--format=%an <%ae>", "main"],
        )
    }
}

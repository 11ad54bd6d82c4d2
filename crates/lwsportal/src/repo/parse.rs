//! Git output parsing helpers.

use std::process::Output;

use super::types::{ChangeKind, StagedChange};

/// Formats a git error with both stdout and stderr for better debugging.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Parses `git diff --cached --name-status --no-renames -z` output.
///
/// Records are `STATUS\0PATH\0`. Type changes count as modifications;
/// unknown status letters are ignored.
pub fn parse_name_status(output: &[u8]) -> Vec<StagedChange> {
    let text = String::from_utf8_lossy(output);
    let mut fields = text.split('\0').filter(|f| !f.is_empty());
    let mut changes = Vec::new();

    while let (Some(status), Some(path)) = (fields.next(), fields.next()) {
        let kind = match status.chars().next() {
            Some('A') => ChangeKind::Added,
            Some('M') | Some('T') => ChangeKind::Modified,
            Some('D') => ChangeKind::Deleted,
            _ => continue,
        };
        changes.push(StagedChange {
            path: path.to_string(),
            kind,
        });
    }

    changes
}

/// Whether a `git push --porcelain` run transferred nothing.
pub fn push_was_up_to_date(stdout: &str, stderr: &str) -> bool {
    let ref_lines: Vec<&str> = stdout
        .lines()
        .filter(|line| line.starts_with(|c| matches!(c, ' ' | '+' | '-' | '*' | '=' | '!')))
        .filter(|line| line.contains('\t'))
        .collect();

    if !ref_lines.is_empty() {
        return ref_lines.iter().all(|line| line.starts_with('='));
    }

    stderr.contains("Everything up-to-date")
}

/// Builds the commit message for a set of staged changes.
pub fn commit_message(changes: &[StagedChange]) -> String {
    match changes {
        [single] => format!("{} {}", single.kind.verb(), single.path),
        many => {
            let mut message = format!("update {} files\n", many.len());
            for change in many {
                message.push_str(&format!("\n{} {}", change.kind.verb(), change.path));
            }
            message
        }
    }
}

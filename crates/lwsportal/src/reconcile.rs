//! Backfills the function catalog from a repository's working tree.
//!
//! Reconciliation is strictly additive: files found under `functions/` that
//! the catalog does not know are recorded, nothing is ever removed.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;
use walkdir::WalkDir;

use crate::catalog::{Catalog, CatalogError, NewCatalogEntry};
use crate::language::Language;
use crate::repo::{RepoError, RepoHandle};

/// Tree directory holding function sources.
pub const FUNCTIONS_DIR: &str = "functions";

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error("Failed to list catalog entries: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Failed to read '{path}': {source}")]
    Walk {
        path: String,
        #[source]
        source: walkdir::Error,
    },
}

/// Tallies from one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// New catalog entries written.
    pub inserted: usize,
    /// Files already known to the catalog.
    pub existing: usize,
    /// Files with an extension outside the language table.
    pub unsupported: usize,
    /// Files whose insert failed and was skipped.
    pub failed: usize,
}

/// A regular file found under the functions directory.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DiscoveredFile {
    path: String,
    name: String,
    language: Option<Language>,
}

/// Records every supported function file in the tree that the catalog lacks.
pub async fn reconcile(
    handle: &RepoHandle,
    catalog: &dyn Catalog,
    owner_id: &str,
) -> Result<ReconcileReport, ReconcileError> {
    let span = tracing::info_span!("reconcile", project = %handle.project_id());
    reconcile_inner(handle, catalog, owner_id)
        .instrument(span)
        .await
}

async fn reconcile_inner(
    handle: &RepoHandle,
    catalog: &dyn Catalog,
    owner_id: &str,
) -> Result<ReconcileReport, ReconcileError> {
    let project_id = handle.project_id();
    let discovered = handle
        .with_worktree(|tree| discover(tree.root()))
        .await??;

    let known: HashSet<String> = catalog
        .list_entries(project_id)?
        .into_iter()
        .map(|entry| entry.path)
        .collect();

    let mut report = ReconcileReport::default();
    for file in discovered {
        if known.contains(&file.path) {
            log::debug!("Already catalogued: {}", file.path);
            report.existing += 1;
            continue;
        }

        let Some(language) = file.language else {
            log::debug!("Skipping unsupported file: {}", file.path);
            report.unsupported += 1;
            continue;
        };

        let entry = NewCatalogEntry {
            project_id: project_id.to_string(),
            name: file.name,
            language,
            path: file.path,
            created_by: owner_id.to_string(),
        };
        match catalog.insert_entry(&entry) {
            Ok(_) => {
                log::debug!("Catalogued {} ({})", entry.path, language);
                report.inserted += 1;
            }
            Err(e) => {
                log::warn!("Failed to catalog {}: {}", entry.path, e);
                report.failed += 1;
            }
        }
    }

    log::info!(
        "Reconciled {}: {} inserted, {} existing, {} unsupported, {} failed",
        project_id,
        report.inserted,
        report.existing,
        report.unsupported,
        report.failed
    );
    Ok(report)
}

/// Walks `functions/` depth first in name order, regular files only.
fn discover(root: &Path) -> Result<Vec<DiscoveredFile>, ReconcileError> {
    let functions = root.join(FUNCTIONS_DIR);
    match std::fs::symlink_metadata(&functions) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            log::warn!("{} is not a directory; nothing to reconcile", FUNCTIONS_DIR);
            return Ok(Vec::new());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ReconcileError::Repo(RepoError::WorkTree(
                crate::repo::WorkTreeError::Io {
                    path: functions,
                    source: e,
                },
            )))
        }
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&functions)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(ReconcileError::Walk {
                    path: FUNCTIONS_DIR.to_string(),
                    source: e,
                })
            }
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {}", FUNCTIONS_DIR, e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let language = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Language::from_extension);
        let name = entry
            .path()
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();

        files.push(DiscoveredFile {
            path,
            name,
            language,
        });
    }

    Ok(files)
}

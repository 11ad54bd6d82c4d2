//! Function source workflows.
//!
//! Each workflow resolves the project's repository through the registry,
//! mutates the working tree, commits, pushes and keeps the catalog in step.

use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use crate::catalog::{Catalog, CatalogEntry, NewCatalogEntry};
use crate::error::{Result, StoreError};
use crate::language::Language;
use crate::reconcile::{reconcile, ReconcileReport, FUNCTIONS_DIR};
use crate::registry::{RegistryError, RepoRegistry};
use crate::repo::worktree::to_tree_path;
use crate::repo::{CommitSummary, RepoError, RepoHandle, WorkTreeError};

/// A catalogued function together with its current source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSource {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    pub code: String,
}

/// Handler-facing facade over the registry and the catalog.
pub struct FunctionStore {
    registry: Arc<RepoRegistry>,
    catalog: Arc<dyn Catalog>,
}

impl FunctionStore {
    pub fn new(registry: Arc<RepoRegistry>, catalog: Arc<dyn Catalog>) -> Self {
        Self { registry, catalog }
    }

    pub fn registry(&self) -> &RepoRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    /// Opens the project's handle, falling back to the cached handle when
    /// only its refresh failed.
    async fn open(&self, project: &str) -> Result<Arc<RepoHandle>> {
        match self.registry.get_or_open(project, None).await {
            Ok(handle) => Ok(handle),
            Err(RegistryError::Stale { handle, source, .. }) => {
                log::warn!(
                    "Using stale checkout of {} after failed refresh: {}",
                    project,
                    source
                );
                Ok(handle)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a new function file, commits and pushes it, then records it.
    ///
    /// Empty `code` is replaced by a placeholder comment in the function's
    /// language.
    pub async fn create_function(
        &self,
        project: &str,
        owner: &str,
        name: &str,
        language: Language,
        code: Option<&str>,
    ) -> Result<CatalogEntry> {
        validate_name(name)?;
        let path = function_path(language, name);
        let span = tracing::info_span!("functions.create", project = %project, path = %path);

        async {
            if self.catalog.find_entry(project, &path)?.is_some() {
                return Err(StoreError::FunctionExists {
                    project: project.to_string(),
                    path: path.clone(),
                });
            }

            let handle = self.open(project).await?;
            let contents = match code.filter(|c| !c.is_empty()) {
                Some(code) => code.to_string(),
                None => placeholder(language),
            };

            handle
                .mkdir_all(&format!("{}/{}", FUNCTIONS_DIR, language.as_str()))
                .await?;
            handle.create(&path, contents.as_bytes()).await?;
            handle.commit(&[path.as_str()]).await?;
            handle.push().await?;

            let entry = self.catalog.insert_entry(&NewCatalogEntry {
                project_id: project.to_string(),
                name: name.to_string(),
                language,
                path: path.clone(),
                created_by: owner.to_string(),
            })?;
            log::info!("Created function {} in {}", path, project);
            Ok::<_, StoreError>(entry)
        }
        .instrument(span)
        .await
    }

    /// Lists the catalogued functions of a project.
    pub fn list_functions(&self, project: &str) -> Result<Vec<CatalogEntry>> {
        Ok(self.catalog.list_entries(project)?)
    }

    /// Reads a function's source from the working tree.
    pub async fn read_function(&self, project: &str, path: &str) -> Result<String> {
        let path = function_tree_path(path)?;
        let handle = self.open(project).await?;
        Ok(handle.read_to_string(&path).await?)
    }

    /// Looks a function up by catalog id and reads its source.
    pub async fn get_function(&self, id: &str) -> Result<FunctionSource> {
        let entry = self
            .catalog
            .find_by_id(id)?
            .ok_or_else(|| StoreError::FunctionNotFound(id.to_string()))?;
        let code = self.read_function(&entry.project_id, &entry.path).await?;
        Ok(FunctionSource { entry, code })
    }

    /// Replaces a function's source, commits and pushes.
    ///
    /// Writing identical content is not an error; the commit is then empty.
    pub async fn update_function(
        &self,
        project: &str,
        path: &str,
        content: &str,
    ) -> Result<CommitSummary> {
        let path = function_tree_path(path)?;
        let span = tracing::info_span!("functions.update", project = %project, path = %path);
        async {
            let handle = self.open(project).await?;
            handle.create(&path, content.as_bytes()).await?;
            let summary = handle.commit(&[path.as_str()]).await?;
            handle.push().await?;
            Ok::<_, StoreError>(summary)
        }
        .instrument(span)
        .await
    }

    /// Re-points a catalog entry at another path. The working tree is not
    /// touched.
    pub fn update_function_path(&self, id: &str, path: &str) -> Result<CatalogEntry> {
        let path = function_tree_path(path)?;
        let entry = self
            .catalog
            .update_path(id, &path)?
            .ok_or_else(|| StoreError::FunctionNotFound(id.to_string()))?;
        log::info!("Moved catalog entry {} to {}", id, entry.path);
        Ok(entry)
    }

    /// Removes a function file, commits the deletion, pushes, and drops the
    /// catalog entry.
    pub async fn delete_function(&self, project: &str, path: &str) -> Result<CommitSummary> {
        let path = function_tree_path(path)?;
        let span = tracing::info_span!("functions.delete", project = %project, path = %path);
        async {
            let handle = self.open(project).await?;
            match handle.remove(&path).await {
                Ok(()) => {}
                Err(RepoError::WorkTree(WorkTreeError::NotFound(_))) => {
                    log::warn!("{} already missing from {} working tree", path, project);
                }
                Err(e) => return Err(e.into()),
            }

            let summary = handle.commit(&[path.as_str()]).await?;
            handle.push().await?;

            if !self.catalog.delete_entry(project, &path)? {
                log::warn!("{} had no catalog entry in {}", path, project);
            }
            log::info!("Deleted function {} from {}", path, project);
            Ok::<_, StoreError>(summary)
        }
        .instrument(span)
        .await
    }

    /// Refreshes the project's checkout and backfills the catalog from it.
    pub async fn sync_project(&self, project: &str, owner: &str) -> Result<ReconcileReport> {
        let handle = self.open(project).await?;
        Ok(reconcile(&handle, self.catalog.as_ref(), owner).await?)
    }
}

/// Tree path for a function: `functions/{language}/{name}{ext}`.
pub fn function_path(language: Language, name: &str) -> String {
    format!(
        "{}/{}/{}{}",
        FUNCTIONS_DIR,
        language.as_str(),
        name,
        language.extension()
    )
}

/// Normalizes a tree path and requires it to name a file under `functions/`.
fn function_tree_path(path: &str) -> Result<String> {
    let normalized = to_tree_path(path)?;
    match normalized.split_once('/') {
        Some((FUNCTIONS_DIR, rest)) if !rest.is_empty() => Ok(normalized),
        _ => Err(StoreError::InvalidFunction(format!(
            "'{}' is not under {}/",
            path, FUNCTIONS_DIR
        ))),
    }
}

fn placeholder(language: Language) -> String {
    format!("{} TODO: implement function\n", language.comment_prefix())
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.trim().is_empty() {
        Some("name must not be empty")
    } else if name != name.trim() {
        Some("name must not have surrounding whitespace")
    } else if name.contains(['/', '\\', '\0']) {
        Some("name must not contain path separators")
    } else if name.starts_with('.') || name.contains("..") {
        Some("name must not start with '.' or contain '..'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidFunction(format!("'{}': {}", name, reason))),
        None => Ok(()),
    }
}

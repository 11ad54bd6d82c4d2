//! Function metadata catalog.
//!
//! The catalog records which functions exist per project. The storage core
//! only consumes it through the [`Catalog`] trait; [`SqliteCatalog`] is the
//! bundled adapter.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::language::Language;

mod migrations;
mod sqlite;

pub use sqlite::SqliteCatalog;

/// A recorded function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub language: Language,
    /// Working-tree relative path with `/` separators.
    pub path: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when recording a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCatalogEntry {
    pub project_id: String,
    pub name: String,
    pub language: Language,
    pub path: String,
    pub created_by: String,
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog already has '{path}' for project '{project_id}'")]
    Duplicate { project_id: String, path: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    #[error("Corrupt catalog row: {0}")]
    Corrupt(String),

    #[error("Catalog lock poisoned")]
    LockPoisoned,
}

/// Metadata store for functions, keyed by `(project_id, path)`.
pub trait Catalog: Send + Sync {
    fn list_entries(&self, project_id: &str) -> Result<Vec<CatalogEntry>, CatalogError>;

    /// Records a function. A second entry for the same path is rejected with
    /// [`CatalogError::Duplicate`].
    fn insert_entry(&self, entry: &NewCatalogEntry) -> Result<CatalogEntry, CatalogError>;

    /// Removes an entry; returns whether one existed.
    fn delete_entry(&self, project_id: &str, path: &str) -> Result<bool, CatalogError>;

    fn find_entry(&self, project_id: &str, path: &str)
        -> Result<Option<CatalogEntry>, CatalogError>;

    fn find_by_id(&self, id: &str) -> Result<Option<CatalogEntry>, CatalogError>;

    /// Re-points an entry at another path within its project. Returns the
    /// updated entry, or `None` when no entry has that id.
    fn update_path(&self, id: &str, path: &str) -> Result<Option<CatalogEntry>, CatalogError>;
}

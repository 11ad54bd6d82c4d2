//! Crate-level error type.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::reconcile::ReconcileError;
use crate::registry::RegistryError;
use crate::repo::{RepoError, WorkTreeError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    WorkTree(#[from] WorkTreeError),

    #[error("Invalid function: {0}")]
    InvalidFunction(String),

    #[error("Function '{path}' already exists in project '{project}'")]
    FunctionExists { project: String, path: String },

    #[error("Function '{0}' not found")]
    FunctionNotFound(String),
}

impl StoreError {
    /// Returns true for transport failures a caller may retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Repo(e) => e.is_retryable(),
            StoreError::Registry(e) => e.is_retryable(),
            StoreError::Reconcile(ReconcileError::Repo(e)) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

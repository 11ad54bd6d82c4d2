pub mod catalog;
pub mod config;
pub mod error;
pub mod functions;
pub mod language;
pub mod reconcile;
pub mod registry;
pub mod repo;
pub mod sanitize;
pub mod secrets;
pub mod telemetry;

pub use catalog::{Catalog, CatalogEntry, CatalogError, NewCatalogEntry, SqliteCatalog};
pub use config::{CacheSettings, CommitIdentity, ConfigError, StoreConfig};
pub use error::{Result, StoreError};
pub use functions::{function_path, FunctionSource, FunctionStore};
pub use language::Language;
pub use reconcile::{reconcile, ReconcileError, ReconcileReport};
pub use registry::{RegistryError, RepoRegistry};
pub use repo::{
    AuthStrategy, ChangeKind, CommitSummary, LifecycleState, PullOutcome, PushOutcome, RepoError,
    RepoHandle,
};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use telemetry::init_tracing;

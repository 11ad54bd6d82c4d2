//! Process-wide cache of repository handles.
//!
//! At most one live [`RepoHandle`] exists per project. The first reference
//! clones; every later reference pulls before returning the cached handle.
//! Concurrent first references to the same project share a single clone,
//! different projects never wait on each other.
//!
//! The cache bounds how many handles the registry itself keeps alive. A
//! handle dropped from the cache while callers still hold it stays the
//! project's handle: the next reference revives it instead of cloning again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use thiserror::Error;
use tracing::Instrument;

use crate::config::{ConfigError, StoreConfig};
use crate::repo::{RepoError, RepoHandle};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid project identifier: '{0}'")]
    InvalidProject(String),

    #[error("Failed to open repository '{project}': {source}")]
    Open {
        project: String,
        #[source]
        source: Arc<RepoError>,
    },

    /// The handle is cached but its refresh failed. The handle stays cached
    /// and is handed back so callers may decide to use it anyway.
    #[error("Repository '{project}' could not be refreshed: {source}")]
    Stale {
        project: String,
        handle: Arc<RepoHandle>,
        #[source]
        source: RepoError,
    },
}

impl RegistryError {
    /// The still-cached handle of a failed refresh.
    pub fn stale_handle(&self) -> Option<&Arc<RepoHandle>> {
        match self {
            RegistryError::Stale { handle, .. } => Some(handle),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Open { source, .. } => source.is_retryable(),
            RegistryError::Stale { source, .. } => source.is_retryable(),
            RegistryError::InvalidProject(_) => false,
        }
    }
}

/// Registry of open project repositories.
pub struct RepoRegistry {
    config: Arc<StoreConfig>,
    handles: Cache<String, Arc<RepoHandle>>,
    /// Every handle ever opened, for reviving ones still referenced elsewhere.
    live: Mutex<HashMap<String, Weak<RepoHandle>>>,
}

impl RepoRegistry {
    /// Creates a registry, resolving the auth strategy once so a broken
    /// configuration fails at startup.
    pub fn new(config: StoreConfig) -> Result<Self, ConfigError> {
        let credentials = config.auth.resolve()?;
        log::info!(
            "Repository registry using {:?} auth, capacity {}, idle timeout {}s",
            credentials.method(),
            config.cache.max_entries,
            config.cache.idle_timeout.as_secs()
        );
        drop(credentials);

        // LRU always admits the new entry; the default TinyLFU policy may
        // reject it outright once the cache is full.
        let handles = Cache::builder()
            .eviction_policy(EvictionPolicy::lru())
            .max_capacity(config.cache.max_entries)
            .time_to_idle(config.cache.idle_timeout)
            .eviction_listener(|project: Arc<String>, _handle, cause: RemovalCause| {
                log::info!("Evicted repository {} ({:?})", project, cause);
            })
            .build();

        Ok(Self {
            config: Arc::new(config),
            handles,
            live: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the project's handle, cloning on first use and pulling on reuse.
    ///
    /// `branch` only matters when the handle is created; a cached handle keeps
    /// the branch it was cloned with.
    pub async fn get_or_open(
        &self,
        project_id: &str,
        branch: Option<&str>,
    ) -> Result<Arc<RepoHandle>, RegistryError> {
        validate_project_id(project_id)?;
        let span = tracing::info_span!("registry.get_or_open", project = %project_id);
        self.get_or_open_inner(project_id, branch)
            .instrument(span)
            .await
    }

    async fn get_or_open_inner(
        &self,
        project_id: &str,
        branch: Option<&str>,
    ) -> Result<Arc<RepoHandle>, RegistryError> {
        let mut cloned = false;
        let entry = self
            .handles
            .entry(project_id.to_string())
            .or_try_insert_with(async {
                if let Some(handle) = self.live_handle(project_id) {
                    log::info!("Reviving evicted repository {} still in use", project_id);
                    return Ok::<_, RepoError>(handle);
                }
                let handle = RepoHandle::new(project_id, branch, Arc::clone(&self.config));
                handle.clone_remote().await?;
                let handle = Arc::new(handle);
                self.track(project_id, &handle);
                cloned = true;
                Ok::<_, RepoError>(handle)
            })
            .await
            .map_err(|source| {
                log::warn!("Opening repository {} failed: {}", project_id, source);
                RegistryError::Open {
                    project: project_id.to_string(),
                    source,
                }
            })?;

        let handle = entry.into_value();
        if cloned {
            log::info!("Opened repository {}", project_id);
            return Ok(handle);
        }

        if let Some(requested) = branch.map(str::trim).filter(|b| !b.is_empty()) {
            if requested != handle.branch() {
                log::warn!(
                    "Ignoring branch '{}' for {}: cached handle tracks '{}'",
                    requested,
                    project_id,
                    handle.branch()
                );
            }
        }

        handle.mark_stale().await;
        match handle.pull().await {
            Ok(outcome) => {
                log::debug!("Refreshed {}: {:?}", project_id, outcome);
                Ok(handle)
            }
            Err(source) => {
                log::warn!("Refreshing repository {} failed: {}", project_id, source);
                Err(RegistryError::Stale {
                    project: project_id.to_string(),
                    handle,
                    source,
                })
            }
        }
    }

    /// Drops the cached handle, if any. Its checkout is removed once the
    /// last outstanding reference goes away; until then a later reference
    /// revives it.
    pub async fn evict(&self, project_id: &str) -> bool {
        self.handles.remove(project_id).await.is_some()
    }

    /// The project's handle if some caller still holds it.
    fn live_handle(&self, project_id: &str) -> Option<Arc<RepoHandle>> {
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.get(project_id).and_then(Weak::upgrade)
    }

    fn track(&self, project_id: &str, handle: &Arc<RepoHandle>) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.retain(|_, weak| weak.strong_count() > 0);
        live.insert(project_id.to_string(), Arc::downgrade(handle));
    }

    pub fn contains(&self, project_id: &str) -> bool {
        self.handles.contains_key(project_id)
    }

    /// Number of cached handles after pending maintenance has run.
    pub async fn len(&self) -> u64 {
        self.handles.run_pending_tasks().await;
        self.handles.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn validate_project_id(project_id: &str) -> Result<(), RegistryError> {
    let invalid = project_id.trim().is_empty()
        || project_id != project_id.trim()
        || project_id.contains(['/', '\\', ':', '\0'])
        || project_id == "."
        || project_id == "..";
    if invalid {
        Err(RegistryError::InvalidProject(project_id.to_string()))
    } else {
        Ok(())
    }
}

//! Registry caching, refresh and eviction.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RemoteHarness;
use lwsportal::{LifecycleState, RegistryError, RepoError, RepoRegistry};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_open_yields_one_handle() {
    let harness = RemoteHarness::new();
    harness.create_remote("acme");
    let registry = Arc::new(RepoRegistry::new(harness.config()).unwrap());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            registry.get_or_open("acme", None).await
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    let first = &handles[0];
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, first)));
    assert_eq!(registry.len().await, 1);

    // Exactly one checkout was created.
    let checkouts = std::fs::read_dir(&harness.scratch_dir).unwrap().count();
    assert_eq!(checkouts, 1);
}

#[tokio::test]
async fn test_reuse_pulls_remote_changes() {
    let harness = RemoteHarness::new();
    harness.create_remote("acme");
    let registry = RepoRegistry::new(harness.config()).unwrap();

    let first = registry.get_or_open("acme", None).await.unwrap();
    assert_eq!(first.lifecycle().await, LifecycleState::Cloned);

    harness.push_external("acme", "functions/lua/add.lua", "return 2");

    let second = registry.get_or_open("acme", None).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.lifecycle().await, LifecycleState::Fresh);
    assert_eq!(
        second.read_to_string("functions/lua/add.lua").await.unwrap(),
        "return 2"
    );
}

#[tokio::test]
async fn test_refresh_failure_returns_stale_handle() {
    let harness = RemoteHarness::new();
    let remote = harness.create_remote("acme");
    let registry = RepoRegistry::new(harness.config()).unwrap();

    let opened = registry.get_or_open("acme", None).await.unwrap();
    std::fs::remove_dir_all(&remote).unwrap();

    let err = registry.get_or_open("acme", None).await.unwrap_err();
    let stale = err.stale_handle().expect("stale error carries the handle");
    assert!(Arc::ptr_eq(stale, &opened));
    assert!(matches!(
        err,
        RegistryError::Stale {
            source: RepoError::Pull { .. },
            ..
        }
    ));
    assert_eq!(opened.lifecycle().await, LifecycleState::Stale);
    assert!(registry.contains("acme"));

    // The cached tree is still usable.
    assert_eq!(opened.read_to_string("README.md").await.unwrap(), "# acme\n");
}

#[tokio::test]
async fn test_failed_open_is_not_cached() {
    let harness = RemoteHarness::new();
    let registry = RepoRegistry::new(harness.config()).unwrap();

    let err = registry.get_or_open("acme", None).await.unwrap_err();
    assert!(matches!(err, RegistryError::Open { .. }));
    assert!(!registry.contains("acme"));

    // Once the remote exists the next reference clones it.
    harness.create_remote("acme");
    let handle = registry.get_or_open("acme", None).await.unwrap();
    assert_eq!(handle.lifecycle().await, LifecycleState::Cloned);
}

fn checkouts_of(harness: &RemoteHarness, project: &str) -> usize {
    let prefix = format!("{}-", project);
    std::fs::read_dir(&harness.scratch_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .count()
}

#[tokio::test]
async fn test_evict_revives_handle_still_in_use() {
    let harness = RemoteHarness::new();
    harness.create_remote("acme");
    let registry = RepoRegistry::new(harness.config()).unwrap();

    let first = registry.get_or_open("acme", None).await.unwrap();
    assert!(registry.evict("acme").await);
    assert!(!registry.contains("acme"));

    let second = registry.get_or_open("acme", None).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.lifecycle().await, LifecycleState::Fresh);
    assert_eq!(checkouts_of(&harness, "acme"), 1);
}

#[tokio::test]
async fn test_evict_then_release_forces_fresh_clone() {
    let harness = RemoteHarness::new();
    harness.create_remote("acme");
    let registry = RepoRegistry::new(harness.config()).unwrap();

    let first = registry.get_or_open("acme", None).await.unwrap();
    first.create("local.txt", b"x").await.unwrap();
    assert!(registry.evict("acme").await);
    drop(first);
    // Let the cache finish its bookkeeping for the removed entry.
    assert!(registry.is_empty().await);

    let second = registry.get_or_open("acme", None).await.unwrap();
    assert_eq!(second.lifecycle().await, LifecycleState::Cloned);
    assert!(!second.exists("local.txt").await.unwrap());
    assert_eq!(checkouts_of(&harness, "acme"), 1);
}

#[tokio::test]
async fn test_full_cache_never_duplicates_a_live_handle() {
    let harness = RemoteHarness::new();
    harness.create_remote("acme");
    harness.create_remote("globex");
    let mut config = harness.config();
    config.cache.max_entries = 1;
    let registry = RepoRegistry::new(config).unwrap();

    let acme = registry.get_or_open("acme", None).await.unwrap();
    acme.create("marker.txt", b"acme").await.unwrap();
    for _ in 0..6 {
        registry.get_or_open("globex", None).await.unwrap();
    }
    assert!(registry.len().await <= 1);
    assert!(registry.contains("globex"));

    let again = registry.get_or_open("acme", None).await.unwrap();
    let third = registry.get_or_open("acme", None).await.unwrap();
    assert!(Arc::ptr_eq(&acme, &again));
    assert!(Arc::ptr_eq(&again, &third));
    assert!(third.exists("marker.txt").await.unwrap());
    assert_eq!(checkouts_of(&harness, "acme"), 1);
}

#[tokio::test]
async fn test_idle_expiry_keeps_held_handle_unique() {
    let harness = RemoteHarness::new();
    harness.create_remote("acme");
    let mut config = harness.config();
    config.cache.idle_timeout = Duration::from_millis(200);
    let registry = RepoRegistry::new(config).unwrap();

    let held = registry.get_or_open("acme", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!registry.contains("acme"));

    let again = registry.get_or_open("acme", None).await.unwrap();
    assert!(Arc::ptr_eq(&held, &again));
    assert_eq!(checkouts_of(&harness, "acme"), 1);
}

#[tokio::test]
async fn test_idle_expiry_of_released_handle_reclones() {
    let harness = RemoteHarness::new();
    harness.create_remote("acme");
    let mut config = harness.config();
    config.cache.idle_timeout = Duration::from_millis(200);
    let registry = RepoRegistry::new(config).unwrap();

    drop(registry.get_or_open("acme", None).await.unwrap());
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(registry.is_empty().await);

    let reopened = registry.get_or_open("acme", None).await.unwrap();
    assert_eq!(reopened.lifecycle().await, LifecycleState::Cloned);
}

#[tokio::test]
async fn test_projects_are_independent() {
    let harness = RemoteHarness::new();
    harness.create_remote("acme");
    harness.create_remote("globex");
    let registry = RepoRegistry::new(harness.config()).unwrap();

    let acme = registry.get_or_open("acme", None).await.unwrap();
    let globex = registry.get_or_open("globex", None).await.unwrap();
    assert!(!Arc::ptr_eq(&acme, &globex));
    assert_eq!(registry.len().await, 2);

    acme.create("only-acme.txt", b"x").await.unwrap();
    assert!(!globex.exists("only-acme.txt").await.unwrap());
}

#[tokio::test]
async fn test_branch_of_cached_handle_wins() {
    let harness = RemoteHarness::new();
    harness.create_remote("acme");
    let registry = RepoRegistry::new(harness.config()).unwrap();

    let handle = registry.get_or_open("acme", Some("main")).await.unwrap();
    let again = registry.get_or_open("acme", Some("develop")).await.unwrap();
    assert!(Arc::ptr_eq(&handle, &again));
    assert_eq!(again.branch(), "main");
}

#[tokio::test]
async fn test_invalid_project_rejected() {
    let harness = RemoteHarness::new();
    let registry = RepoRegistry::new(harness.config()).unwrap();
    assert!(matches!(
        registry.get_or_open("../acme", None).await,
        Err(RegistryError::InvalidProject(_))
    ));
}

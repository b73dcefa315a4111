//! Model lifecycle cache tests

use super::{catalog, shift_mtime, touch_artifact, StubLoader, StubModel};
use crate::lifecycle::{LifecyclePhase, ModelLifecycle};
use crate::store::InMemoryStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;

struct Fixture {
    _dir: tempfile::TempDir,
    path: std::path::PathBuf,
    store: Arc<InMemoryStore>,
    loader: Arc<StubLoader>,
    lifecycle: ModelLifecycle,
}

fn fixture(create_artifact: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = if create_artifact {
        touch_artifact(dir.path())
    } else {
        dir.path().join("model.bin")
    };
    let store = Arc::new(InMemoryStore::with_data(catalog([2, 5, 7, 9]), vec![]));
    let loader = Arc::new(StubLoader::new(Arc::new(StubModel::new(vec![5, 7, 9, 2], 9))));
    let lifecycle = ModelLifecycle::with_loader(&path, 3, store.clone(), loader.clone());

    Fixture {
        _dir: dir,
        path,
        store,
        loader,
        lifecycle,
    }
}

#[tokio::test]
async fn test_starts_unloaded() {
    let f = fixture(true);
    assert_eq!(f.lifecycle.phase(), LifecyclePhase::Unloaded);
    assert_eq!(f.loader.loads(), 0);
}

#[tokio::test]
async fn test_missing_artifact_is_unavailable() {
    let f = fixture(false);

    assert!(f.lifecycle.acquire(false).await.is_none());
    assert_eq!(f.lifecycle.phase(), LifecyclePhase::Unavailable);
    assert!(f.lifecycle.status().last_error.is_some());
    assert_eq!(f.loader.loads(), 0);
}

#[tokio::test]
async fn test_first_access_loads_and_warms_up() {
    let f = fixture(true);

    let loaded = f.lifecycle.acquire(false).await.expect("model should load");
    assert_eq!(f.lifecycle.phase(), LifecyclePhase::Ready);
    assert_eq!(f.loader.loads(), 1);
    assert_eq!(loaded.vocabulary_size, 9);
    assert_eq!(loaded.details.catalog_len(), 4);
    assert_eq!(loaded.details.get(0).unwrap().title, "Padding Token");

    // warm-up pass runs on an all-padding context
    assert_eq!(f.loader.model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*f.loader.model.last_context.lock().unwrap(), vec![0, 0, 0]);

    let status = f.lifecycle.status();
    assert_eq!(status.catalog_items, Some(4));
    assert_eq!(status.loads, 1);
}

#[tokio::test]
async fn test_unchanged_artifact_is_not_reloaded() {
    let f = fixture(true);

    let first = f.lifecycle.acquire(false).await.unwrap();
    let second = f.lifecycle.acquire(false).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(f.loader.loads(), 1);
}

#[tokio::test]
async fn test_newer_artifact_triggers_reload() {
    let f = fixture(true);
    let first = f.lifecycle.acquire(false).await.unwrap();

    shift_mtime(&f.path, 10);
    let second = f.lifecycle.acquire(false).await.unwrap();

    assert_eq!(f.loader.loads(), 2);
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.artifact_mtime > first.artifact_mtime);
}

#[tokio::test]
async fn test_older_artifact_does_not_trigger_reload() {
    let f = fixture(true);
    f.lifecycle.acquire(false).await.unwrap();

    shift_mtime(&f.path, -10);
    f.lifecycle.acquire(false).await.unwrap();

    assert_eq!(f.loader.loads(), 1);
}

#[tokio::test]
async fn test_force_reloads() {
    let f = fixture(true);
    f.lifecycle.acquire(false).await.unwrap();
    f.lifecycle.acquire(true).await.unwrap();
    assert_eq!(f.loader.loads(), 2);
}

#[tokio::test]
async fn test_removed_artifact_clears_loaded_model() {
    let f = fixture(true);
    f.lifecycle.acquire(false).await.unwrap();

    std::fs::remove_file(&f.path).unwrap();
    assert!(f.lifecycle.acquire(false).await.is_none());
    assert_eq!(f.lifecycle.phase(), LifecyclePhase::Unavailable);
    assert_eq!(f.lifecycle.status().vocabulary_size, None);

    touch_artifact(f.path.parent().unwrap());
    assert!(f.lifecycle.acquire(false).await.is_some());
    assert_eq!(f.loader.loads(), 2);
}

#[tokio::test]
async fn test_load_failure_retries_on_next_access() {
    let f = fixture(true);
    f.loader.fail.store(true, Ordering::SeqCst);

    assert!(f.lifecycle.acquire(false).await.is_none());
    assert_eq!(f.lifecycle.phase(), LifecyclePhase::Unavailable);

    f.loader.fail.store(false, Ordering::SeqCst);
    assert!(f.lifecycle.acquire(false).await.is_some());
    assert_eq!(f.loader.loads(), 2);
}

#[tokio::test]
async fn test_failed_reload_drops_previous_model() {
    let f = fixture(true);
    f.lifecycle.acquire(false).await.unwrap();

    f.loader.fail.store(true, Ordering::SeqCst);
    shift_mtime(&f.path, 10);

    assert!(f.lifecycle.acquire(false).await.is_none());
    assert_eq!(f.lifecycle.phase(), LifecyclePhase::Unavailable);
}

#[tokio::test]
async fn test_catalog_failure_is_unavailable() {
    let f = fixture(true);
    f.store.set_unavailable(true);

    assert!(f.lifecycle.acquire(false).await.is_none());
    assert_eq!(f.lifecycle.phase(), LifecyclePhase::Unavailable);
}

#[tokio::test]
async fn test_reload_rebuilds_detail_cache() {
    let f = fixture(true);
    let first = f.lifecycle.acquire(false).await.unwrap();
    assert!(first.details.get(11).is_none());

    f.store.add_movie(super::movie(11)).await;
    shift_mtime(&f.path, 10);

    let second = f.lifecycle.acquire(false).await.unwrap();
    assert_eq!(second.details.get(11).unwrap().title, "Movie 11");
    assert_eq!(second.details.catalog_len(), 5);
}

#[tokio::test]
async fn test_status_subscription_observes_ready() {
    let f = fixture(true);
    let mut rx = f.lifecycle.subscribe();

    f.lifecycle.acquire(false).await.unwrap();

    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().phase, LifecyclePhase::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access_loads_once() {
    let f = fixture(true);
    f.loader.delay_ms.store(200, Ordering::SeqCst);
    let lifecycle = Arc::new(f.lifecycle);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let lifecycle = Arc::clone(&lifecycle);
        tasks.spawn(async move { lifecycle.acquire(false).await });
    }

    let mut acquired = Vec::new();
    while let Some(result) = tasks.join_next().await {
        acquired.push(result.unwrap().expect("model should load"));
    }

    assert_eq!(acquired.len(), 8);
    assert_eq!(f.loader.loads(), 1);
    assert!(acquired.iter().all(|m| Arc::ptr_eq(m, &acquired[0])));
    assert_eq!(lifecycle.status().loads, 1);
}

use convenient_cache::{
    ArtifactMetadata, ArtifactStore, CacheError, CacheLayer, CacheMode, DirTransport, FetchResult,
    LayeredTransport, MemoryTransport, RuleKey, StoreConfig, StoreOutcome,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_ok;

fn project() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("out")).unwrap();
    fs::write(temp.path().join("out/app"), b"#!/bin/sh\necho hi\n").unwrap();
    temp
}

fn outputs() -> Vec<PathBuf> {
    vec![PathBuf::from("out/app")]
}

fn memory_store() -> (Arc<MemoryTransport>, ArtifactStore) {
    let transport = Arc::new(MemoryTransport::new());
    let store = ArtifactStore::new(transport.clone(), StoreConfig::default());
    (transport, store)
}

#[tokio::test]
async fn test_store_then_fetch_hits() {
    let project = project();
    let (_, store) = memory_store();
    let key = RuleKey::of_bytes(b"default");

    let outcome = assert_ok!(
        store
            .store(&[key], project.path(), &outputs(), ArtifactMetadata::new("//app", vec![key]))
            .await
    );
    assert!(matches!(outcome, StoreOutcome::Stored(_)));

    let FetchResult::Hit(artifact) = store.fetch(&key).await else {
        panic!("expected a hit");
    };
    assert_eq!(artifact.metadata.target, "//app");

    let target = TempDir::new().unwrap();
    let _ = artifact.materialize(target.path()).unwrap();
    assert_eq!(
        fs::read(target.path().join("out/app")).unwrap(),
        b"#!/bin/sh\necho hi\n"
    );
    assert_eq!(store.stats().hits, 1);
}

#[tokio::test]
async fn test_several_keys_share_one_copy_of_bytes() {
    let project = project();
    let (transport, store) = memory_store();
    let default = RuleKey::of_bytes(b"default");
    let input_based = RuleKey::of_bytes(b"input-based");

    let _ = store
        .store(
            &[default, input_based],
            project.path(),
            &outputs(),
            ArtifactMetadata::new("//app", vec![default, input_based]),
        )
        .await
        .unwrap();

    let keys = transport.keys();
    assert_eq!(keys.iter().filter(|k| k.starts_with("cache/")).count(), 1);
    assert_eq!(keys.iter().filter(|k| k.starts_with("rulekey/")).count(), 2);
    assert!(store.fetch(&default).await.is_hit());
    assert!(store.fetch(&input_based).await.is_hit());
}

#[tokio::test]
async fn test_new_key_links_to_existing_content() {
    let project = project();
    let (transport, store) = memory_store();
    let default = RuleKey::of_bytes(b"default");
    let later = RuleKey::of_bytes(b"later");

    let _ = store
        .store(&[default], project.path(), &outputs(), ArtifactMetadata::new("//app", vec![default]))
        .await
        .unwrap();
    let outcome = store
        .store(
            &[default, later],
            project.path(),
            &outputs(),
            ArtifactMetadata::new("//app", vec![default, later]),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, StoreOutcome::Linked(_)));
    assert_eq!(transport.keys().iter().filter(|k| k.starts_with("cache/")).count(), 1);
    assert!(store.fetch(&later).await.is_hit());
}

#[tokio::test]
async fn test_restore_is_idempotent() {
    let project = project();
    let (transport, store) = memory_store();
    let key = RuleKey::of_bytes(b"default");

    let _ = store
        .store(&[key], project.path(), &outputs(), ArtifactMetadata::new("//app", vec![key]))
        .await
        .unwrap();
    let calls = transport.store_calls();

    let outcome = store
        .store(&[key], project.path(), &outputs(), ArtifactMetadata::new("//app", vec![key]))
        .await
        .unwrap();

    assert_eq!(outcome, StoreOutcome::AlreadyStored);
    assert_eq!(transport.store_calls(), calls);
    assert_eq!(store.stats().skipped_stores, 1);
}

#[tokio::test]
async fn test_restore_repairs_missing_content() {
    let project = project();
    let cache = TempDir::new().unwrap();
    let transport = DirTransport::new(cache.path());
    let store = ArtifactStore::new(Arc::new(transport.clone()), StoreConfig::default());
    let key = RuleKey::of_bytes(b"default");
    let metadata = || ArtifactMetadata::new("//app", vec![key]);

    let StoreOutcome::Stored(content_key) = store
        .store(&[key], project.path(), &outputs(), metadata())
        .await
        .unwrap()
    else {
        panic!("expected a fresh store");
    };
    fs::remove_file(transport.path_for(&content_key.to_string())).unwrap();
    assert!(store.fetch(&key).await.is_miss());

    let StoreOutcome::Stored(repaired) = store
        .store(&[key], project.path(), &outputs(), metadata())
        .await
        .unwrap()
    else {
        panic!("expected the content to be uploaded again");
    };

    assert!(transport.path_for(&repaired.to_string()).exists());
    assert!(store.fetch(&key).await.is_hit());
}

#[tokio::test]
async fn test_dangling_key_relinks_to_content_of_another_key() {
    let project = project();
    let (transport, store) = memory_store();
    let sound = RuleKey::of_bytes(b"sound");
    let dangling = RuleKey::of_bytes(b"dangling");
    let _ = store
        .store(&[sound], project.path(), &outputs(), ArtifactMetadata::new("//app", vec![sound]))
        .await
        .unwrap();
    transport.insert_raw(&format!("rulekey/{dangling}"), b"cache/gone:1".to_vec());

    let outcome = store
        .store(
            &[sound, dangling],
            project.path(),
            &outputs(),
            ArtifactMetadata::new("//app", vec![sound, dangling]),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, StoreOutcome::Linked(_)));
    assert!(store.fetch(&dangling).await.is_hit());
}

#[tokio::test]
async fn test_small_artifacts_skip_the_content_key() {
    let project = project();
    let transport = Arc::new(MemoryTransport::new());
    let config = StoreConfig {
        two_level_min_bytes: 1 << 20,
        ..StoreConfig::default()
    };
    let store = ArtifactStore::new(transport.clone(), config);
    let key = RuleKey::of_bytes(b"default");

    let outcome = store
        .store(&[key], project.path(), &outputs(), ArtifactMetadata::new("//app", vec![key]))
        .await
        .unwrap();

    assert!(matches!(outcome, StoreOutcome::Direct(_)));
    assert_eq!(transport.keys(), vec![format!("artifact/{key}")]);
    let FetchResult::Hit(artifact) = store.fetch(&key).await else {
        panic!("expected a hit");
    };
    assert_eq!(artifact.metadata.target, "//app");

    let again = store
        .store(&[key], project.path(), &outputs(), ArtifactMetadata::new("//app", vec![key]))
        .await
        .unwrap();
    assert_eq!(again, StoreOutcome::AlreadyStored);
}

#[tokio::test]
async fn test_large_artifacts_skip_the_content_key() {
    let project = project();
    let transport = Arc::new(MemoryTransport::new());
    let config = StoreConfig {
        two_level_max_bytes: Some(1),
        ..StoreConfig::default()
    };
    let store = ArtifactStore::new(transport.clone(), config);
    let keys = [RuleKey::of_bytes(b"default"), RuleKey::of_bytes(b"input")];

    let outcome = store
        .store(&keys, project.path(), &outputs(), ArtifactMetadata::new("//app", keys.to_vec()))
        .await
        .unwrap();

    assert!(matches!(outcome, StoreOutcome::Direct(_)));
    assert!(transport.keys().iter().all(|name| name.starts_with("artifact/")));
    assert_eq!(transport.keys().len(), 2);
    for key in &keys {
        assert!(store.fetch(key).await.is_hit());
    }
}

#[tokio::test]
async fn test_remote_hit_through_layers_lands_locally() {
    let project = project();
    let local = Arc::new(MemoryTransport::new());
    let remote = Arc::new(MemoryTransport::new());
    let key = RuleKey::of_bytes(b"default");

    let publisher = ArtifactStore::new(remote.clone(), StoreConfig::default());
    let _ = publisher
        .store(&[key], project.path(), &outputs(), ArtifactMetadata::new("//app", vec![key]))
        .await
        .unwrap();

    let layered = LayeredTransport::new(vec![
        CacheLayer::new(local.clone(), CacheMode::ReadWrite),
        CacheLayer::new(remote.clone(), CacheMode::ReadOnly),
    ]);
    let store = ArtifactStore::new(Arc::new(layered), StoreConfig::default());

    assert!(store.fetch(&key).await.is_hit());
    assert_eq!(local.keys(), remote.keys());

    remote.set_failing(true);
    assert!(store.fetch(&key).await.is_hit());
}

#[tokio::test]
async fn test_unknown_key_is_a_miss_not_an_error() {
    let (_, store) = memory_store();
    assert!(store.fetch(&RuleKey::of_bytes(b"nothing")).await.is_miss());
    assert_eq!(store.stats().misses, 1);
    assert_eq!(store.stats().errors, 0);
}

#[tokio::test]
async fn test_corrupt_content_is_a_miss() {
    let (transport, store) = memory_store();
    let key = RuleKey::of_bytes(b"default");
    transport.insert_raw(&format!("rulekey/{key}"), b"cache/deadbeef:4".to_vec());
    transport.insert_raw("cache/deadbeef:4", b"junk".to_vec());

    assert!(store.fetch(&key).await.is_miss());
}

#[tokio::test]
async fn test_dangling_pointer_is_a_miss() {
    let (transport, store) = memory_store();
    let key = RuleKey::of_bytes(b"default");
    transport.insert_raw(&format!("rulekey/{key}"), b"cache/gone:1".to_vec());

    assert!(store.fetch(&key).await.is_miss());
}

#[tokio::test]
async fn test_transport_failure_is_an_error() {
    let (transport, store) = memory_store();
    transport.set_failing(true);

    let result = store.fetch(&RuleKey::of_bytes(b"default")).await;

    assert!(matches!(result, FetchResult::Error(CacheError::ServerError(_))));
    assert_eq!(store.stats().errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_transport_times_out() {
    let transport = Arc::new(MemoryTransport::new().with_delay(Duration::from_secs(5)));
    let config = StoreConfig {
        fetch_timeout: Duration::from_millis(100),
        ..StoreConfig::default()
    };
    let store = ArtifactStore::new(transport, config);

    let result = store.fetch(&RuleKey::of_bytes(b"default")).await;

    assert!(matches!(
        result,
        FetchResult::Error(CacheError::Timeout { operation: "fetch", .. })
    ));
}

#[tokio::test]
async fn test_dir_transport_survives_new_store_instance() {
    let project = project();
    let cache = TempDir::new().unwrap();
    let key = RuleKey::of_bytes(b"default");

    {
        let store = ArtifactStore::new(Arc::new(DirTransport::new(cache.path())), StoreConfig::default());
        let _ = store
            .store(&[key], project.path(), &outputs(), ArtifactMetadata::new("//app", vec![key]))
            .await
            .unwrap();
    }

    let store = ArtifactStore::new(Arc::new(DirTransport::new(cache.path())), StoreConfig::default());
    let FetchResult::Hit(artifact) = store.fetch(&key).await else {
        panic!("expected a hit");
    };
    let paths: Vec<_> = artifact.output_paths().collect();
    assert_eq!(paths, vec![Path::new("out/app")]);
}

#[tokio::test]
async fn test_manifests_are_replaceable() {
    let (_, store) = memory_store();
    let key = RuleKey::of_bytes(b"manifest");

    assert_eq!(store.fetch_manifest(&key).await.unwrap(), None);
    store.store_manifest(&key, b"v1".to_vec()).await.unwrap();
    store.store_manifest(&key, b"v2".to_vec()).await.unwrap();
    assert_eq!(store.fetch_manifest(&key).await.unwrap(), Some(b"v2".to_vec()));
}

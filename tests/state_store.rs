// tests/state_store.rs

mod common;
use crate::common::init_tracing;

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use cardwatch::errors::CardwatchError;
use cardwatch::fs::mock::MockFileSystem;
use cardwatch::fs::{FileSystem, RealFileSystem};
use cardwatch::state::{FileStateBackend, MemoryStateBackend, StateStore};
use cardwatch::types::{RepoKey, RepositoryTarget, SubscriberTarget};

type TestResult = Result<(), Box<dyn Error>>;

fn repo(owner: &str, name: &str) -> RepositoryTarget {
    RepositoryTarget::new(owner, name, "main")
}

#[test]
fn commit_sha_updates_only_the_named_repository() -> TestResult {
    init_tracing();
    let store = StateStore::new(MemoryStateBackend::new());
    store.sync_repositories(&[repo("A", "B"), repo("C", "D")])?;

    let key = RepoKey::new("A", "B", "main");
    store.commit_sha(&key, "abc123")?;

    assert_eq!(store.last_sha(&key).as_deref(), Some("abc123"));
    assert_eq!(
        store.last_sha(&RepoKey::new("C", "D", "")).as_deref(),
        Some("")
    );
    Ok(())
}

#[test]
fn commit_sha_for_unknown_repository_is_not_found() -> TestResult {
    let store = StateStore::new(MemoryStateBackend::new());
    store.sync_repositories(&[repo("A", "B")])?;

    let err = store
        .commit_sha(&RepoKey::new("X", "Y", "main"), "abc")
        .unwrap_err();
    assert!(matches!(err, CardwatchError::NotFound(_)));
    Ok(())
}

#[test]
fn sync_keeps_persisted_sha_and_seeds_new_ones() -> TestResult {
    let store = StateStore::new(MemoryStateBackend::new());
    store.sync_repositories(&[repo("A", "B")])?;
    store.commit_sha(&RepoKey::new("A", "B", "main"), "persisted")?;

    let merged = store.sync_repositories(&[
        repo("A", "B").with_last_sha("from-config"),
        repo("C", "D").with_last_sha("seed"),
    ])?;

    assert_eq!(merged[0].last_commit_sha, "persisted");
    assert_eq!(merged[1].last_commit_sha, "seed");
    assert_eq!(store.repositories(), merged);
    Ok(())
}

#[test]
fn sync_drops_repositories_no_longer_configured() -> TestResult {
    let store = StateStore::new(MemoryStateBackend::new());
    store.sync_repositories(&[repo("A", "B"), repo("C", "D")])?;
    store.sync_repositories(&[repo("C", "D")])?;

    let keys: Vec<String> = store
        .repositories()
        .iter()
        .map(|r| r.key().to_string())
        .collect();
    assert_eq!(keys, vec!["C/D@main".to_string()]);
    Ok(())
}

#[test]
fn subscriber_add_and_remove_are_idempotent() -> TestResult {
    let store = StateStore::new(MemoryStateBackend::new());
    let g1 = SubscriberTarget::group("g1");

    assert!(!store.add_subscriber(&g1)?);
    assert!(store.add_subscriber(&g1)?);
    assert_eq!(store.subscribers().len(), 1);

    assert!(store.remove_subscriber("g1")?);
    assert!(!store.remove_subscriber("g1")?);
    assert!(store.subscribers().is_empty());
    Ok(())
}

#[test]
fn configured_subscribers_are_seeded_only_once() -> TestResult {
    let store = StateStore::new(MemoryStateBackend::new());
    let configured = [SubscriberTarget::group("g1"), SubscriberTarget::private("p1")];

    assert_eq!(store.seed_subscribers(&configured)?, 2);
    assert!(store.remove_subscriber("g1")?);

    assert_eq!(store.seed_subscribers(&configured)?, 0);
    assert_eq!(store.subscribers(), vec![SubscriberTarget::private("p1")]);
    Ok(())
}

#[test]
fn seeded_flag_persists_in_the_state_file() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state.toml");
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    {
        let store = StateStore::new(FileStateBackend::open(&path, Arc::clone(&fs))?);
        store.seed_subscribers(&[SubscriberTarget::group("g1")])?;
        store.remove_subscriber("g1")?;
    }

    let reopened = StateStore::new(FileStateBackend::open(&path, fs)?);
    assert_eq!(reopened.seed_subscribers(&[SubscriberTarget::group("g1")])?, 0);
    assert!(reopened.subscribers().is_empty());
    Ok(())
}

#[test]
fn mock_create_dir_all_makes_an_empty_directory_visible() -> TestResult {
    let mock = MockFileSystem::new();
    let dir = Path::new("cards/out");
    assert!(!mock.is_dir(dir));

    mock.create_dir_all(dir)?;
    assert!(mock.is_dir(dir));
    assert!(mock.is_dir(Path::new("cards")));
    assert!(mock.exists(dir));
    assert!(!mock.is_file(dir));
    Ok(())
}

#[test]
fn real_create_dir_all_builds_nested_directories() -> TestResult {
    let dir = tempfile::tempdir()?;
    let nested = dir.path().join("a").join("b");
    RealFileSystem.create_dir_all(&nested)?;
    assert!(RealFileSystem.is_dir(&nested));
    // Existing directories are fine.
    RealFileSystem.create_dir_all(&nested)?;
    Ok(())
}

#[test]
fn file_backend_round_trips_through_disk() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state.toml");
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    {
        let store = StateStore::new(FileStateBackend::open(&path, Arc::clone(&fs))?);
        store.sync_repositories(&[repo("A", "B")])?;
        store.commit_sha(&RepoKey::new("A", "B", "main"), "abc123")?;
        store.add_subscriber(&SubscriberTarget::private("p1"))?;
        store.record_notifications(2, 1)?;
    }

    let reopened = StateStore::new(FileStateBackend::open(&path, fs)?);
    assert_eq!(
        reopened.last_sha(&RepoKey::new("A", "B", "main")).as_deref(),
        Some("abc123")
    );
    assert_eq!(reopened.subscribers(), vec![SubscriberTarget::private("p1")]);
    let counters = reopened.counters();
    assert_eq!(counters.notifications_sent, 2);
    assert_eq!(counters.notification_failures, 1);

    let text = std::fs::read_to_string(&path)?;
    assert!(text.contains("lastsha = \"abc123\""));
    Ok(())
}

#[test]
fn failed_save_rolls_back_in_memory_state() -> TestResult {
    let mock = MockFileSystem::new();
    let fs: Arc<dyn FileSystem> = Arc::new(mock.clone());
    let store = StateStore::new(FileStateBackend::open("state.toml", fs)?);

    store.add_subscriber(&SubscriberTarget::group("g1"))?;
    mock.set_fail_writes(true);

    assert!(store.add_subscriber(&SubscriberTarget::group("g2")).is_err());
    assert_eq!(store.subscribers(), vec![SubscriberTarget::group("g1")]);

    mock.set_fail_writes(false);
    assert!(!store.add_subscriber(&SubscriberTarget::group("g2"))?);
    assert_eq!(store.subscribers().len(), 2);
    Ok(())
}

#[test]
fn corrupted_state_file_is_rejected() {
    let mock = MockFileSystem::new();
    mock.add_file("state.toml", "this is = = not toml");
    let fs: Arc<dyn FileSystem> = Arc::new(mock);

    let result = FileStateBackend::open(Path::new("state.toml"), fs);
    assert!(matches!(result, Err(CardwatchError::ConfigError(_))));
}

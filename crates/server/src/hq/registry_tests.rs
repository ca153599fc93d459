// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

async fn register(registry: &RemoteRegistry, name: &str) -> Arc<Remote> {
    registry
        .register(
            format!("id-{name}"),
            name.to_owned(),
            format!("http://{name}:4020/"),
            "tok".to_owned(),
        )
        .await
}

#[tokio::test]
async fn register_trims_trailing_slash() {
    let registry = RemoteRegistry::new();
    let remote = register(&registry, "peer-a").await;
    assert_eq!(remote.url, "http://peer-a:4020");
}

#[tokio::test]
async fn reregistration_replaces_and_cancels_old() {
    let registry = RemoteRegistry::new();
    let old = register(&registry, "peer-a").await;
    let new = register(&registry, "peer-a").await;

    assert!(old.cancel.is_cancelled());
    assert!(!new.cancel.is_cancelled());
    assert_eq!(registry.list().await.len(), 1);
}

#[tokio::test]
async fn session_index_round_trip() {
    let registry = RemoteRegistry::new();
    let remote = register(&registry, "peer-a").await;

    registry
        .record_sessions(&remote, vec!["s1".to_owned(), "s2".to_owned()])
        .await;

    let found = registry.find_by_session("s1").await.unwrap();
    assert_eq!(found.name, "peer-a");
    assert!(registry.find_by_session("s3").await.is_none());
}

#[tokio::test]
async fn record_sessions_replaces_previous_index() {
    let registry = RemoteRegistry::new();
    let remote = register(&registry, "peer-a").await;

    registry.record_sessions(&remote, vec!["s1".to_owned()]).await;
    registry.record_sessions(&remote, vec!["s2".to_owned()]).await;

    assert!(registry.find_by_session("s1").await.is_none());
    assert!(registry.find_by_session("s2").await.is_some());
}

#[tokio::test]
async fn session_maps_to_at_most_one_remote() {
    let registry = RemoteRegistry::new();
    let a = register(&registry, "peer-a").await;
    let b = register(&registry, "peer-b").await;

    registry.record_sessions(&a, vec!["s1".to_owned()]).await;
    // The session migrated (or was re-reported) to peer-b.
    registry.record_sessions(&b, vec!["s1".to_owned()]).await;

    let owner = registry.find_by_session("s1").await.unwrap();
    assert_eq!(owner.name, "peer-b");
    assert!(!a.live_sessions.read().await.contains("s1"));
}

#[tokio::test]
async fn unregister_unindexes_sessions() {
    let registry = RemoteRegistry::new();
    let remote = register(&registry, "peer-a").await;
    registry.record_sessions(&remote, vec!["s1".to_owned()]).await;

    let removed = registry.unregister("peer-a").await.unwrap();
    assert!(removed.cancel.is_cancelled());
    assert!(registry.find_by_session("s1").await.is_none());
    assert!(registry.get("peer-a").await.is_none());
    assert!(registry.unregister("peer-a").await.is_none());
}

#[tokio::test]
async fn unindex_session_drops_only_that_session() {
    let registry = RemoteRegistry::new();
    let remote = register(&registry, "peer-a").await;
    registry
        .record_sessions(&remote, vec!["s1".to_owned(), "s2".to_owned()])
        .await;

    registry.unindex_session("s1").await;
    assert!(registry.find_by_session("s1").await.is_none());
    assert!(registry.find_by_session("s2").await.is_some());
    assert!(!remote.live_sessions.read().await.contains("s1"));
}

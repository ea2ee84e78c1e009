//! Integration tests: surfacing and resolving conflicting revisions
//!
//! Conflicts are produced the way they happen in practice: three replicas
//! edit the same document concurrently, then replicate into one store.

mod common;

use async_trait::async_trait;
use common::{engine, fields, recorder, Event};
use serde_json::{json, Value};
use shroud_core::{EncryptedRecord, ShroudError};
use shroud_store::{ChangeFeed, DocumentStore, MemoryStore, StoreError, StoreResult};
use shroud_sync::{EncryptedStore, NoopListener};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Edit `notes/n1` concurrently on `target` and two fresh replicas, returning
/// the replicas without replicating them back.
async fn diverge(target: &Arc<MemoryStore>) -> (Arc<MemoryStore>, Arc<MemoryStore>) {
    let b = Arc::new(MemoryStore::new());
    let c = Arc::new(MemoryStore::new());

    let base = engine(target.clone(), "pw", Arc::new(NoopListener));
    base.write("notes", Some("n1"), fields(json!({"v": "base"}))).await.unwrap();
    target.replicate_to(&b);
    target.replicate_to(&c);

    base.write("notes", Some("n1"), fields(json!({"v": "a"}))).await.unwrap();
    engine(b.clone(), "pw", Arc::new(NoopListener))
        .write("notes", Some("n1"), fields(json!({"v": "b"})))
        .await
        .unwrap();
    engine(c.clone(), "pw", Arc::new(NoopListener))
        .write("notes", Some("n1"), fields(json!({"v": "c"})))
        .await
        .unwrap();
    (b, c)
}

/// Build a store holding one current and two losing revisions of `notes/n1`.
async fn three_way_conflict(target: &Arc<MemoryStore>) {
    let (b, c) = diverge(target).await;
    b.replicate_to(target);
    c.replicate_to(target);
}

fn values(docs: impl IntoIterator<Item = shroud_core::LogicalDocument>) -> BTreeSet<String> {
    docs.into_iter()
        .map(|d| d.fields["v"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn inspect_reports_winner_and_all_losers() {
    let raw = Arc::new(MemoryStore::new());
    three_way_conflict(&raw).await;
    let store = engine(raw.clone(), "pw", Arc::new(NoopListener));

    let set = store
        .inspect_conflict("notes", "n1")
        .await
        .unwrap()
        .expect("document is conflicted");
    assert_eq!(set.key, "notes_n1");
    assert_eq!(set.losers.len(), 2);
    assert_eq!(set.loser_revisions.len(), 2);
    assert!(set.failures.is_empty());
    assert!(!set.loser_revisions.contains(&set.winner_revision));

    for loser in &set.losers {
        assert!(set.loser_revisions.contains(&loser.revision));
    }
    let mut all = vec![set.winner.clone()];
    all.extend(set.losers.iter().map(|l| l.document.clone()));
    assert_eq!(values(all), BTreeSet::from(["a", "b", "c"].map(String::from)));
}

#[tokio::test]
async fn undecryptable_loser_keeps_revisions_aligned() {
    let raw = Arc::new(MemoryStore::new());
    let b = Arc::new(MemoryStore::new());
    let c = Arc::new(MemoryStore::new());

    let base = engine(raw.clone(), "pw", Arc::new(NoopListener));
    base.write("notes", Some("n1"), fields(json!({"v": "base"}))).await.unwrap();
    raw.replicate_to(&b);
    raw.replicate_to(&c);

    // Two local edits put the local branch a generation ahead, so it wins.
    base.write("notes", Some("n1"), fields(json!({"v": "a1"}))).await.unwrap();
    base.write("notes", Some("n1"), fields(json!({"v": "a2"}))).await.unwrap();
    b.put("notes_n1", "zz|zz").await.unwrap();
    engine(c.clone(), "pw", Arc::new(NoopListener))
        .write("notes", Some("n1"), fields(json!({"v": "c"})))
        .await
        .unwrap();
    b.replicate_to(&raw);
    c.replicate_to(&raw);

    let set = base
        .inspect_conflict("notes", "n1")
        .await
        .unwrap()
        .expect("document is conflicted");
    assert_eq!(set.winner.fields["v"], json!("a2"));
    assert_eq!(set.loser_revisions.len(), 2);
    assert_eq!(set.losers.len(), 1);
    assert_eq!(set.failures.len(), 1);

    let loser = &set.losers[0];
    assert_eq!(loser.document.fields["v"], json!("c"));
    let stored = raw.get_revision("notes_n1", &loser.revision).await.unwrap();
    assert_ne!(stored.ciphertext.as_deref(), Some("zz|zz"));

    let broken = set.failures[0].record.revision.clone().unwrap();
    assert_ne!(broken, loser.revision);
    assert!(set.loser_revisions.contains(&broken));
    let stored = raw.get_revision("notes_n1", &broken).await.unwrap();
    assert_eq!(stored.ciphertext.as_deref(), Some("zz|zz"));
}

#[tokio::test]
async fn live_replication_surfaces_conflicts() {
    let raw = Arc::new(MemoryStore::new());
    let (listener, mut events) = recorder();
    let store = engine(raw.clone(), "pw", listener);
    store.load_and_subscribe().await.unwrap();

    let (b, c) = diverge(&raw).await;

    b.replicate_to(&raw);
    let first = events.next_conflict().await;
    assert_eq!(first[0].losers.len(), 1);

    c.replicate_to(&raw);
    let second = events.next_conflict().await;
    assert_eq!(second[0].losers.len(), 2);
    assert_eq!(second[0].winner.table, "notes");
}

#[tokio::test]
async fn resolve_clears_every_loser() {
    let raw = Arc::new(MemoryStore::new());
    three_way_conflict(&raw).await;
    let store = engine(raw.clone(), "pw", Arc::new(NoopListener));

    store
        .resolve_conflict("notes", "n1", fields(json!({"v": "merged"})))
        .await
        .unwrap();

    assert!(store.inspect_conflict("notes", "n1").await.unwrap().is_none());
    assert!(raw.conflicts("notes_n1").await.unwrap().is_empty());
    let doc = store.read("notes", "n1").await.unwrap().unwrap();
    assert_eq!(doc.fields["v"], json!("merged"));
}

#[tokio::test]
async fn resolve_emits_an_update_for_the_chosen_version() {
    let raw = Arc::new(MemoryStore::new());
    three_way_conflict(&raw).await;
    let (listener, mut events) = recorder();
    let store = engine(raw.clone(), "pw", listener);
    store.load_and_subscribe().await.unwrap();
    assert!(matches!(events.next().await, Event::Created(_)));

    store
        .resolve_conflict("notes", "n1", fields(json!({"v": "merged"})))
        .await
        .unwrap();

    match events.next().await {
        Event::Updated(groups) => {
            assert_eq!(groups[0].documents[0].fields["v"], json!("merged"));
        }
        other => panic!("expected update, got {other:?}"),
    }
}

#[tokio::test]
async fn resolve_without_conflict_is_an_error() {
    let store = engine(Arc::new(MemoryStore::new()), "pw", Arc::new(NoopListener));
    store.write("notes", Some("n2"), fields(json!({"v": 1}))).await.unwrap();

    let err = store
        .resolve_conflict("notes", "n2", fields(json!({"v": 2})))
        .await
        .unwrap_err();
    assert!(matches!(err, ShroudError::NoConflict(ref key) if key == "notes_n2"), "got {err:?}");

    // Nothing was written.
    let doc = store.read("notes", "n2").await.unwrap().unwrap();
    assert_eq!(doc.fields["v"], Value::from(1));
}

#[tokio::test]
async fn inspect_without_conflict_is_none() {
    let store = engine(Arc::new(MemoryStore::new()), "pw", Arc::new(NoopListener));
    assert!(store.inspect_conflict("notes", "absent").await.unwrap().is_none());
}

/// Delegates to a [`MemoryStore`] but refuses the first revision removal.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    removals: AtomicUsize,
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn put(&self, key: &str, ciphertext: &str) -> StoreResult<String> {
        self.inner.put(key, ciphertext).await
    }

    async fn get(&self, key: &str) -> StoreResult<EncryptedRecord> {
        self.inner.get(key).await
    }

    async fn get_revision(&self, key: &str, revision: &str) -> StoreResult<EncryptedRecord> {
        self.inner.get_revision(key, revision).await
    }

    async fn delete(&self, key: &str) -> StoreResult<String> {
        self.inner.delete(key).await
    }

    async fn remove_revision(&self, key: &str, revision: &str) -> StoreResult<()> {
        if self.removals.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StoreError::Unreachable("replica offline".into()));
        }
        self.inner.remove_revision(key, revision).await
    }

    async fn query_all(&self) -> StoreResult<Vec<EncryptedRecord>> {
        self.inner.query_all().await
    }

    async fn conflicts(&self, key: &str) -> StoreResult<Vec<String>> {
        self.inner.conflicts(key).await
    }

    fn subscribe(&self) -> ChangeFeed {
        self.inner.subscribe()
    }
}

#[tokio::test]
async fn partial_resolution_reports_failed_removals() {
    let raw = Arc::new(MemoryStore::new());
    three_way_conflict(&raw).await;
    let flaky = Arc::new(FlakyStore {
        inner: raw.clone(),
        removals: AtomicUsize::new(0),
    });
    let store = EncryptedStore::new(
        flaky,
        common::passphrase("pw"),
        common::fast_keys(),
        Arc::new(NoopListener),
    );

    let err = store
        .resolve_conflict("notes", "n1", fields(json!({"v": "merged"})))
        .await
        .unwrap_err();
    match err {
        ShroudError::ConflictResolution { key, failed } => {
            assert_eq!(key, "notes_n1");
            assert_eq!(failed.len(), 1);
        }
        other => panic!("expected partial resolution, got {other:?}"),
    }

    // The chosen version stands; exactly one loser survives.
    let doc = store.read("notes", "n1").await.unwrap().unwrap();
    assert_eq!(doc.fields["v"], json!("merged"));
    assert_eq!(raw.conflicts("notes_n1").await.unwrap().len(), 1);

    // A second attempt clears the rest.
    store
        .resolve_conflict("notes", "n1", fields(json!({"v": "merged"})))
        .await
        .unwrap();
    assert!(raw.conflicts("notes_n1").await.unwrap().is_empty());
}

//! In-memory revision-tree store, optionally persisted as one JSON file.
//!
//! Each key owns a tree of revisions `"{generation}-{token}"`. A put adds a
//! child of the current winner; a delete or a revision removal adds a
//! tombstone child. Leaves are revisions nobody points at; the winner is the
//! live leaf with the highest `(generation, revision id)`, and every other
//! live leaf is a conflict. Replication copies revisions a peer lacks, which
//! is how divergent leaves (and therefore conflicts) appear.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shroud_core::EncryptedRecord;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backend::{ChangeFeed, DocumentStore, RawChange};
use crate::error::{StoreError, StoreResult};
use crate::replication::ReplicationStats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Revision {
    generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    /// `None` marks a tombstone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ciphertext: Option<String>,
}

impl Revision {
    fn is_deleted(&self) -> bool {
        self.ciphertext.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct RevisionTree {
    revisions: BTreeMap<String, Revision>,
}

impl RevisionTree {
    fn leaves(&self) -> impl Iterator<Item = (&String, &Revision)> + '_ {
        let parents: BTreeSet<&str> = self
            .revisions
            .values()
            .filter_map(|r| r.parent.as_deref())
            .collect();
        self.revisions
            .iter()
            .filter(move |(id, _)| !parents.contains(id.as_str()))
    }

    fn winner(&self) -> Option<(&String, &Revision)> {
        self.leaves()
            .filter(|(_, r)| !r.is_deleted())
            .max_by(|a, b| (a.1.generation, a.0).cmp(&(b.1.generation, b.0)))
    }

    fn latest_leaf(&self) -> Option<(&String, &Revision)> {
        self.leaves()
            .max_by(|a, b| (a.1.generation, a.0).cmp(&(b.1.generation, b.0)))
    }

    fn conflicts(&self) -> Vec<String> {
        let winner = self.winner().map(|(id, _)| id.clone());
        self.leaves()
            .filter(|(id, r)| !r.is_deleted() && Some(*id) != winner.as_ref())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn current_record(&self, key: &str) -> Option<EncryptedRecord> {
        self.winner().map(|(id, rev)| EncryptedRecord {
            key: key.to_string(),
            revision: Some(id.clone()),
            ciphertext: rev.ciphertext.clone(),
        })
    }

    fn change_for(&self, key: &str) -> RawChange {
        match self.winner() {
            Some((id, rev)) => RawChange {
                key: key.to_string(),
                revision: Some(id.clone()),
                ciphertext: rev.ciphertext.clone(),
                is_tombstone: false,
                conflicting_revisions: self.conflicts(),
            },
            None => RawChange {
                key: key.to_string(),
                revision: self.latest_leaf().map(|(id, _)| id.clone()),
                ciphertext: None,
                is_tombstone: true,
                conflicting_revisions: Vec::new(),
            },
        }
    }
}

fn next_revision_id(generation: u64) -> String {
    format!("{generation}-{}", Uuid::new_v4().simple())
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, RevisionTree>,
    subscribers: Vec<mpsc::UnboundedSender<RawChange>>,
    dirty: bool,
}

impl Inner {
    fn broadcast(&mut self, change: RawChange) {
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    fn commit(&mut self, key: &str) {
        let change = match self.docs.get(key) {
            Some(tree) => tree.change_for(key),
            None => return,
        };
        self.dirty = true;
        tracing::trace!(key, revision = ?change.revision, tombstone = change.is_tombstone, "commit");
        self.broadcast(change);
    }
}

/// Reference [`DocumentStore`]: revision trees in memory, JSON on disk.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// A purely in-memory store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            path: None,
        }
    }

    /// Load or create a store persisted at `path`.
    /// If the file doesn't exist, starts empty.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let docs = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            inner: Mutex::new(Inner {
                docs,
                ..Inner::default()
            }),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave a tree half-written:
        // every mutation is a single map insert.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Flush pending changes using an atomic write (write then rename).
    /// No-op for in-memory stores.
    pub fn flush(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut inner = self.lock();
        if !inner.dirty {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&inner.docs)?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;

        inner.dirty = false;
        Ok(())
    }

    /// Whether `key` currently has a live (non-tombstoned) revision.
    pub fn has_live(&self, key: &str) -> bool {
        self.lock()
            .docs
            .get(key)
            .is_some_and(|tree| tree.winner().is_some())
    }

    /// Copy every revision this store has and `target` lacks into `target`.
    ///
    /// Each key that received at least one revision produces one change on
    /// `target`'s feed.
    pub fn replicate_to(&self, target: &MemoryStore) -> ReplicationStats {
        // Snapshot first so two stores replicating into each other never
        // hold both locks at once.
        let snapshot = self.lock().docs.clone();
        let mut stats = ReplicationStats {
            docs_read: snapshot.len() as u64,
            ..ReplicationStats::default()
        };

        let mut inner = target.lock();
        for (key, source) in snapshot {
            let tree = inner.docs.entry(key.clone()).or_default();
            let mut wrote = false;
            for (id, rev) in source.revisions {
                if let Entry::Vacant(slot) = tree.revisions.entry(id) {
                    slot.insert(rev);
                    wrote = true;
                }
            }
            if wrote {
                stats.docs_written += 1;
                inner.commit(&key);
            }
        }
        stats
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("failed to flush store on drop: {e}");
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn put(&self, key: &str, ciphertext: &str) -> StoreResult<String> {
        let mut inner = self.lock();
        let tree = inner.docs.entry(key.to_string()).or_default();

        let parent = tree
            .winner()
            .or_else(|| tree.latest_leaf())
            .map(|(id, rev)| (id.clone(), rev.generation));
        let generation = parent.as_ref().map_or(1, |(_, g)| g + 1);
        let id = next_revision_id(generation);
        tree.revisions.insert(
            id.clone(),
            Revision {
                generation,
                parent: parent.map(|(p, _)| p),
                ciphertext: Some(ciphertext.to_string()),
            },
        );

        inner.commit(key);
        Ok(id)
    }

    async fn get(&self, key: &str) -> StoreResult<EncryptedRecord> {
        self.lock()
            .docs
            .get(key)
            .and_then(|tree| tree.current_record(key))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn get_revision(&self, key: &str, revision: &str) -> StoreResult<EncryptedRecord> {
        let inner = self.lock();
        let rev = inner
            .docs
            .get(key)
            .and_then(|tree| tree.revisions.get(revision))
            .ok_or_else(|| StoreError::RevisionNotFound {
                key: key.to_string(),
                revision: revision.to_string(),
            })?;
        Ok(EncryptedRecord {
            key: key.to_string(),
            revision: Some(revision.to_string()),
            ciphertext: rev.ciphertext.clone(),
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<String> {
        let mut inner = self.lock();
        let tree = inner
            .docs
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let (parent, generation) = tree
            .winner()
            .map(|(id, rev)| (id.clone(), rev.generation + 1))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let id = next_revision_id(generation);
        tree.revisions.insert(
            id.clone(),
            Revision {
                generation,
                parent: Some(parent),
                ciphertext: None,
            },
        );

        inner.commit(key);
        Ok(id)
    }

    async fn remove_revision(&self, key: &str, revision: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let missing = || StoreError::RevisionNotFound {
            key: key.to_string(),
            revision: revision.to_string(),
        };
        let tree = inner.docs.get_mut(key).ok_or_else(missing)?;
        let generation = tree
            .leaves()
            .find(|(id, rev)| id.as_str() == revision && !rev.is_deleted())
            .map(|(_, rev)| rev.generation + 1)
            .ok_or_else(missing)?;

        tree.revisions.insert(
            next_revision_id(generation),
            Revision {
                generation,
                parent: Some(revision.to_string()),
                ciphertext: None,
            },
        );

        inner.commit(key);
        Ok(())
    }

    async fn query_all(&self) -> StoreResult<Vec<EncryptedRecord>> {
        Ok(self
            .lock()
            .docs
            .iter()
            .filter_map(|(key, tree)| tree.current_record(key))
            .collect())
    }

    async fn conflicts(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()
            .docs
            .get(key)
            .map(RevisionTree::conflicts)
            .unwrap_or_default())
    }

    fn subscribe(&self) -> ChangeFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }
}

//! Replication primitive: move revisions between a local store and a peer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryStore;

/// Outcome of one replication pass in one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationStats {
    pub docs_read: u64,
    pub docs_written: u64,
}

/// A live link to one remote peer.
#[async_trait]
pub trait Replicator: Send + Sync {
    /// Send local revisions the remote lacks.
    async fn push(&self) -> StoreResult<ReplicationStats>;
    /// Fetch remote revisions the local store lacks.
    async fn pull(&self) -> StoreResult<ReplicationStats>;
    /// Whether the remote still holds a live revision of `key`.
    async fn remote_has_live(&self, key: &str) -> StoreResult<bool>;
}

/// Resolves a remote address into a [`Replicator`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> StoreResult<Arc<dyn Replicator>>;
}

/// Replicates between two [`MemoryStore`]s in the same process.
pub struct MemoryReplicator {
    local: Arc<MemoryStore>,
    remote: Arc<MemoryStore>,
}

impl MemoryReplicator {
    pub fn new(local: Arc<MemoryStore>, remote: Arc<MemoryStore>) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl Replicator for MemoryReplicator {
    async fn push(&self) -> StoreResult<ReplicationStats> {
        let stats = self.local.replicate_to(&self.remote);
        self.remote.flush()?;
        Ok(stats)
    }

    async fn pull(&self) -> StoreResult<ReplicationStats> {
        let stats = self.remote.replicate_to(&self.local);
        self.local.flush()?;
        Ok(stats)
    }

    async fn remote_has_live(&self, key: &str) -> StoreResult<bool> {
        Ok(self.remote.has_live(key))
    }
}

/// Address book of in-process peers, keyed by address string.
pub struct MemoryHub {
    local: Arc<MemoryStore>,
    peers: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryHub {
    pub fn new(local: Arc<MemoryStore>) -> Self {
        Self {
            local,
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, address: impl Into<String>, peer: Arc<MemoryStore>) {
        self.peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(address.into(), peer);
    }
}

#[async_trait]
impl Connector for MemoryHub {
    async fn connect(&self, address: &str) -> StoreResult<Arc<dyn Replicator>> {
        let peer = self
            .peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(address)
            .cloned()
            .ok_or_else(|| StoreError::Unreachable(format!("no peer at '{address}'")))?;
        Ok(Arc::new(MemoryReplicator::new(Arc::clone(&self.local), peer)))
    }
}

/// Treats the address as the path of a peer's JSON store file.
pub struct FileConnector {
    local: Arc<MemoryStore>,
}

impl FileConnector {
    pub fn new(local: Arc<MemoryStore>) -> Self {
        Self { local }
    }
}

#[async_trait]
impl Connector for FileConnector {
    async fn connect(&self, address: &str) -> StoreResult<Arc<dyn Replicator>> {
        let path = Path::new(address);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(StoreError::Unreachable(format!(
                    "remote directory does not exist: {}",
                    parent.display()
                )));
            }
        }
        let remote = MemoryStore::open(path)?;
        Ok(Arc::new(MemoryReplicator::new(
            Arc::clone(&self.local),
            Arc::new(remote),
        )))
    }
}

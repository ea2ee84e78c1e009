//! Contract consumed from the underlying document store

use async_trait::async_trait;
use shroud_core::EncryptedRecord;
use tokio::sync::mpsc;

use crate::error::StoreResult;

/// One storage-level mutation as delivered by the live change feed.
///
/// Carries the post-change state of the key: the current revision and its
/// ciphertext, or a tombstone when no live revision remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub key: String,
    pub revision: Option<String>,
    pub ciphertext: Option<String>,
    pub is_tombstone: bool,
    /// Live revisions that lost to `revision`
    pub conflicting_revisions: Vec<String>,
}

impl RawChange {
    /// Whether this change carries a payload that can be decrypted.
    pub fn is_present(&self) -> bool {
        !self.is_tombstone && self.ciphertext.is_some()
    }

    pub fn record(&self) -> EncryptedRecord {
        EncryptedRecord {
            key: self.key.clone(),
            revision: self.revision.clone(),
            ciphertext: self.ciphertext.clone(),
        }
    }
}

/// Live change notifications, in store commit order.
pub type ChangeFeed = mpsc::UnboundedReceiver<RawChange>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write a new current revision for `key`; returns the revision id.
    async fn put(&self, key: &str, ciphertext: &str) -> StoreResult<String>;

    /// Current (winning) revision of `key`, or `StoreError::NotFound`.
    async fn get(&self, key: &str) -> StoreResult<EncryptedRecord>;

    /// An exact revision of `key`, live or not.
    async fn get_revision(&self, key: &str, revision: &str) -> StoreResult<EncryptedRecord>;

    /// Tombstone the current revision of `key`; returns the tombstone revision.
    async fn delete(&self, key: &str) -> StoreResult<String>;

    /// Retire one live revision of `key` (used to clear conflict losers).
    async fn remove_revision(&self, key: &str, revision: &str) -> StoreResult<()>;

    /// Every live record, once.
    async fn query_all(&self) -> StoreResult<Vec<EncryptedRecord>>;

    /// Live revisions of `key` that lost to the current one.
    async fn conflicts(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Start receiving live changes.
    fn subscribe(&self) -> ChangeFeed;
}

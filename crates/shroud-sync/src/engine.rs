//! The encrypted store: caller API, initial load, and the live change chain.
//!
//! ```text
//! caller ── write/read/remove ──► seal/open ──► DocumentStore
//!
//! DocumentStore feed ─► [FIFO] ─► decode key ─► open ─► classify ─► route ─► listener
//! ```
//!
//! Live changes are drained by a single task, one change at a time, in feed
//! order. An error on one change is reported to the listener and the task
//! moves on to the next.

use secrecy::SecretString;
use shroud_core::config::CryptoConfig;
use shroud_core::{
    ConflictSet, Fields, LogicalDocument, ShroudError, ShroudResult,
};
use shroud_crypto::{KdfParams, KeyMode, KeyProvider};
use shroud_store::{ChangeFeed, Connector, DocumentStore, RawChange};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::{ChangeClassifier, Classification, Observation};
use crate::codec;
use crate::conflict::ConflictResolver;
use crate::identity::{self, DocumentIdentity};
use crate::listener::StoreListener;
use crate::router::{ClassifiedBatch, EventRouter};
use crate::sync::{self, SyncHandle};

/// Pause between remote checks while waiting for delete confirmation.
const CONFIRM_POLL: Duration = Duration::from_millis(50);

/// How the store key is obtained from the passphrase.
#[derive(Debug, Clone, Default)]
pub struct KeyOptions {
    pub mode: KeyMode,
    pub kdf: KdfParams,
}

impl KeyOptions {
    pub fn from_config(config: &CryptoConfig) -> ShroudResult<Self> {
        let mode = config
            .key_mode
            .parse::<KeyMode>()
            .map_err(|e| ShroudError::Config(e.to_string()))?;
        Ok(Self {
            mode,
            kdf: KdfParams {
                iterations: config.pbkdf2_iterations,
            },
        })
    }
}

/// Random, collision-resistant id for documents written without one.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

struct Shared {
    store: Arc<dyn DocumentStore>,
    keys: Arc<KeyProvider>,
    classifier: Mutex<ChangeClassifier>,
    router: EventRouter,
    resolver: ConflictResolver,
    subscribed: AtomicBool,
    chain: Mutex<Option<JoinHandle<()>>>,
    sync: tokio::sync::Mutex<Option<SyncHandle>>,
}

impl Shared {
    fn classifier(&self) -> MutexGuard<'_, ChangeClassifier> {
        self.classifier
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn classify(
        &self,
        identity: &DocumentIdentity,
        key: &str,
        observation: Observation,
    ) -> Option<Classification> {
        self.classifier().observe(identity, key, observation)
    }

    /// Classify, decrypt, and route one live change.
    async fn process_change(&self, change: RawChange) -> ShroudResult<()> {
        let identity = match identity::decode(&change.key) {
            Ok(identity) => identity,
            Err(_) => {
                debug!(key = %change.key, "skipping change outside any table");
                return Ok(());
            }
        };

        let mut batch = ClassifiedBatch::default();
        let mut conflicted = false;

        if change.is_present() {
            let doc_key = codec::document_key(&self.keys).await?;
            match codec::open(&doc_key, &identity, &change.record()) {
                Ok(doc) => {
                    if let Some(classification) =
                        self.classify(&identity, &change.key, Observation::Present)
                    {
                        batch.push(classification, doc);
                    }
                    conflicted = !change.conflicting_revisions.is_empty();
                }
                Err(failure) => {
                    self.classify(&identity, &change.key, Observation::Undecryptable);
                    batch.failures.push(failure);
                }
            }
        } else if let Some(classification) =
            self.classify(&identity, &change.key, Observation::Absent)
        {
            batch.push(
                classification,
                LogicalDocument::identity_only(identity.table.clone(), identity.id.clone()),
            );
        }

        self.router.deliver(batch);

        if conflicted {
            if let Some(conflict) = self.resolver.inspect(&identity).await? {
                self.router.listener().on_conflict(&[conflict]);
            }
        }
        Ok(())
    }
}

/// Revision of every record the initial scan saw, by storage key.
type Scanned = HashMap<String, String>;

/// Take what queued on `feed` during the scan, dropping each key's changes
/// up to and including the one carrying the revision the scan already saw.
fn unseen_backlog(feed: &mut ChangeFeed, scanned: &Scanned) -> Vec<RawChange> {
    let mut backlog = Vec::new();
    while let Ok(change) = feed.try_recv() {
        backlog.push(change);
    }

    let mut seen_through: HashMap<String, usize> = HashMap::new();
    for (index, change) in backlog.iter().enumerate() {
        if let Some(revision) = &change.revision {
            if scanned.get(&change.key) == Some(revision) {
                seen_through.insert(change.key.clone(), index);
            }
        }
    }

    let queued = backlog.len();
    let unseen: Vec<RawChange> = backlog
        .into_iter()
        .enumerate()
        .filter(|(index, change)| seen_through.get(&change.key).map_or(true, |last| index > last))
        .map(|(_, change)| change)
        .collect();
    if unseen.len() < queued {
        debug!(skipped = queued - unseen.len(), "dropped changes covered by the initial load");
    }
    unseen
}

/// Drain the backlog, then the feed, strictly in order until the feed closes
/// or the store is dropped.
async fn drain_feed(shared: Weak<Shared>, backlog: Vec<RawChange>, mut feed: ChangeFeed) {
    let mut backlog = backlog.into_iter();
    loop {
        let change = match backlog.next() {
            Some(change) => change,
            None => match feed.recv().await {
                Some(change) => change,
                None => break,
            },
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let key = change.key.clone();
        if let Err(e) = shared.process_change(change).await {
            warn!(key = %key, "failed to process change: {e}");
            shared.router.listener().on_processing_error(&e);
        }
    }
    debug!("change feed closed");
}

/// Client-side encryption layer over a [`DocumentStore`].
///
/// Cheap to clone; clones share the key, the known-identity set, and the
/// change chain.
#[derive(Clone)]
pub struct EncryptedStore {
    shared: Arc<Shared>,
}

impl EncryptedStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        passphrase: SecretString,
        options: KeyOptions,
        listener: Arc<dyn StoreListener>,
    ) -> Self {
        let keys = Arc::new(KeyProvider::new(passphrase, options.mode, options.kdf));
        Self {
            shared: Arc::new(Shared {
                resolver: ConflictResolver::new(Arc::clone(&store), Arc::clone(&keys)),
                store,
                keys,
                classifier: Mutex::new(ChangeClassifier::new()),
                router: EventRouter::new(listener),
                subscribed: AtomicBool::new(false),
                chain: Mutex::new(None),
                sync: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Encrypt and store `fields` under `(table, id)`, generating an id when
    /// none is given.
    pub async fn write(
        &self,
        table: &str,
        id: Option<&str>,
        fields: Fields,
    ) -> ShroudResult<LogicalDocument> {
        let id = id.map_or_else(generate_id, str::to_string);
        let key = identity::encode(table, &id)?;
        let doc_key = codec::document_key(&self.shared.keys).await?;
        let ciphertext = codec::seal(&doc_key, &fields)?;

        let revision = self.shared.store.put(&key, &ciphertext).await?;
        debug!(key = %key, revision = %revision, "wrote document");
        Ok(LogicalDocument::new(table, id, fields))
    }

    /// Fetch and decrypt one document; `None` if it does not exist.
    pub async fn read(&self, table: &str, id: &str) -> ShroudResult<Option<LogicalDocument>> {
        let identity = DocumentIdentity::new(table, id);
        let key = identity.storage_key()?;
        let record = match self.shared.store.get(&key).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let doc_key = codec::document_key(&self.shared.keys).await?;
        codec::open(&doc_key, &identity, &record)
            .map(Some)
            .map_err(ShroudError::decryption)
    }

    /// Delete one document. Fails with `NotFound` if it does not exist.
    pub async fn remove(&self, table: &str, id: &str) -> ShroudResult<()> {
        let key = identity::encode(table, id)?;
        let revision = self.shared.store.delete(&key).await?;
        debug!(key = %key, revision = %revision, "removed document");
        Ok(())
    }

    /// One-time initialization: subscribe to the live feed, load every stored
    /// record, seed the known-identity set, emit the initial creation batch,
    /// and start draining the feed.
    ///
    /// The feed is subscribed before the scan, so changes committed during
    /// the load are queued and classified against the seeded set afterwards.
    /// A queued change whose revision the scan already reported, and any
    /// earlier change to the same key, is dropped, so a write racing the load
    /// is announced once.
    pub async fn load_and_subscribe(&self) -> ShroudResult<()> {
        if self.shared.subscribed.swap(true, Ordering::SeqCst) {
            return Err(ShroudError::AlreadySubscribed);
        }

        let mut feed = self.shared.store.subscribe();
        let (batch, scanned) = match self.initial_load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.shared.subscribed.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        info!(
            created = batch.created.len(),
            failures = batch.failures.len(),
            "initial load complete"
        );
        self.shared.router.deliver(batch);

        let backlog = unseen_backlog(&mut feed, &scanned);
        let task = tokio::spawn(drain_feed(Arc::downgrade(&self.shared), backlog, feed));
        *self
            .shared
            .chain
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
        Ok(())
    }

    async fn initial_load(&self) -> ShroudResult<(ClassifiedBatch, Scanned)> {
        let records = self.shared.store.query_all().await?;
        let doc_key = codec::document_key(&self.shared.keys).await?;

        let mut batch = ClassifiedBatch::default();
        let mut scanned = Scanned::new();
        let mut classifier = self.shared.classifier();
        classifier.reset();
        for record in records {
            if let Some(revision) = &record.revision {
                scanned.insert(record.key.clone(), revision.clone());
            }
            let Ok(identity) = identity::decode(&record.key) else {
                debug!(key = %record.key, "skipping record outside any table");
                continue;
            };
            if record.is_tombstone() {
                continue;
            }
            match codec::open(&doc_key, &identity, &record) {
                Ok(doc) => {
                    if let Some(classification) =
                        classifier.observe(&identity, &record.key, Observation::Present)
                    {
                        batch.push(classification, doc);
                    }
                }
                Err(failure) => batch.failures.push(failure),
            }
        }
        Ok((batch, scanned))
    }

    /// Number of documents currently believed to exist.
    pub fn known_count(&self) -> usize {
        self.shared.classifier().known().len()
    }

    /// Decrypted winner and losers of a conflicted document, if any.
    pub async fn inspect_conflict(&self, table: &str, id: &str) -> ShroudResult<Option<ConflictSet>> {
        self.shared
            .resolver
            .inspect(&DocumentIdentity::new(table, id))
            .await
    }

    /// Make `chosen` the current version and retire every losing revision.
    /// Errors with `NoConflict` when the document is not conflicted.
    pub async fn resolve_conflict(&self, table: &str, id: &str, chosen: Fields) -> ShroudResult<()> {
        self.shared
            .resolver
            .resolve(&DocumentIdentity::new(table, id), &chosen)
            .await
            .map(|_| ())
    }

    /// Start background replication with the peer at `address`, replacing
    /// any previous connection. A failure to reach the peer is returned.
    pub async fn connect(
        &self,
        connector: &dyn Connector,
        address: &str,
        interval: Duration,
    ) -> ShroudResult<()> {
        let replicator = connector.connect(address).await?;
        let mut slot = self.shared.sync.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }
        *slot = Some(SyncHandle::spawn(
            address,
            replicator,
            interval,
            Arc::clone(self.shared.router.listener()),
        ));
        Ok(())
    }

    /// Stop background replication. Returns whether a connection was active.
    pub async fn disconnect(&self) -> bool {
        match self.shared.sync.lock().await.take() {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.sync.lock().await.is_some()
    }

    /// Run one push+pull pass with the connected peer right now.
    pub async fn sync_now(&self) -> ShroudResult<()> {
        let replicator = self.connected_replicator().await?;
        sync::run_pass(replicator.as_ref(), self.shared.router.listener().as_ref()).await?;
        Ok(())
    }

    /// Delete every document locally and on the connected peer, waiting for
    /// the peer to confirm. Fails with `Timeout` instead of waiting forever.
    /// Returns the number of documents deleted.
    pub async fn destroy_and_sync(&self, timeout: Duration) -> ShroudResult<usize> {
        let replicator = self.connected_replicator().await?;

        let work = async {
            replicator.pull().await?;

            let keys: Vec<String> = self
                .shared
                .store
                .query_all()
                .await?
                .into_iter()
                .map(|record| record.key)
                .filter(|key| identity::decode(key).is_ok())
                .collect();

            for key in &keys {
                // Each delete tombstones the current winner; repeat until no
                // conflicting revision is left standing.
                loop {
                    match self.shared.store.delete(key).await {
                        Ok(_) => continue,
                        Err(e) if e.is_not_found() => break,
                        Err(e) => return Err(e.into()),
                    }
                }
            }

            sync::confirm_remote_absent(replicator.as_ref(), &keys, CONFIRM_POLL).await?;
            Ok::<_, ShroudError>(keys.len())
        };

        let deleted = tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| ShroudError::Timeout(timeout))??;
        info!(deleted, "destroyed local and remote documents");
        Ok(deleted)
    }

    async fn connected_replicator(&self) -> ShroudResult<Arc<dyn shroud_store::Replicator>> {
        self.shared
            .sync
            .lock()
            .await
            .as_ref()
            .map(SyncHandle::replicator)
            .ok_or_else(sync::not_connected)
    }

    /// Stop the change chain and any background replication.
    pub async fn close(&self) {
        self.disconnect().await;
        let task = self
            .shared
            .chain
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
        self.shared.subscribed.store(false, Ordering::SeqCst);
    }
}

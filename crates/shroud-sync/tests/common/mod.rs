//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use secrecy::SecretString;
use serde_json::Value;
use shroud_core::{ConflictSet, DecryptionFailure, Fields, SyncProgress};
use shroud_crypto::KeyMode;
use shroud_store::DocumentStore;
use shroud_sync::{EncryptedStore, KeyOptions, StoreListener, TableGroup};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(150);

#[derive(Debug)]
pub enum Event {
    Created(Vec<TableGroup>),
    Updated(Vec<TableGroup>),
    Deleted(Vec<TableGroup>),
    Failures(Vec<DecryptionFailure>),
    Conflict(Vec<ConflictSet>),
    Progress(SyncProgress),
    Error(String),
}

impl Event {
    /// `(table, id)` pairs of a created/updated/deleted batch.
    pub fn ids(&self) -> Vec<(String, String)> {
        let groups = match self {
            Event::Created(g) | Event::Updated(g) | Event::Deleted(g) => g,
            other => panic!("not a document batch: {other:?}"),
        };
        groups
            .iter()
            .flat_map(|g| g.documents.iter().map(|d| (d.table.clone(), d.id.clone())))
            .collect()
    }
}

/// Listener that forwards every callback into a channel.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

impl StoreListener for Recorder {
    fn on_created(&self, batch: &[TableGroup]) {
        let _ = self.tx.send(Event::Created(batch.to_vec()));
    }

    fn on_updated(&self, batch: &[TableGroup]) {
        let _ = self.tx.send(Event::Updated(batch.to_vec()));
    }

    fn on_deleted(&self, batch: &[TableGroup]) {
        let _ = self.tx.send(Event::Deleted(batch.to_vec()));
    }

    fn on_decryption_failure(&self, failures: &[DecryptionFailure]) {
        let _ = self.tx.send(Event::Failures(failures.to_vec()));
    }

    fn on_conflict(&self, conflicts: &[ConflictSet]) {
        let _ = self.tx.send(Event::Conflict(conflicts.to_vec()));
    }

    fn on_sync_progress(&self, progress: &SyncProgress) {
        let _ = self.tx.send(Event::Progress(progress.clone()));
    }

    fn on_processing_error(&self, error: &shroud_core::ShroudError) {
        let _ = self.tx.send(Event::Error(error.to_string()));
    }
}

pub struct Events {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Events {
    pub async fn next(&mut self) -> Event {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("listener dropped")
    }

    /// Next event that is not sync progress.
    pub async fn next_document_event(&mut self) -> Event {
        loop {
            match self.next().await {
                Event::Progress(_) => continue,
                event => return event,
            }
        }
    }

    pub async fn next_conflict(&mut self) -> Vec<ConflictSet> {
        loop {
            if let Event::Conflict(sets) = self.next().await {
                return sets;
            }
        }
    }

    /// Assert nothing arrives for a short while.
    pub async fn assert_quiet(&mut self) {
        if let Ok(Some(event)) = tokio::time::timeout(QUIET, self.rx.recv()).await {
            panic!("unexpected event: {event:?}");
        }
    }

    /// Wait until every listener handle is gone, skipping pending events.
    pub async fn wait_closed(&mut self) {
        let closed = async { while self.rx.recv().await.is_some() {} };
        tokio::time::timeout(WAIT, closed)
            .await
            .expect("listener still held");
    }

    /// Discard everything already queued or arriving within a short window.
    pub async fn drain(&mut self) {
        while let Ok(Some(_)) = tokio::time::timeout(QUIET, self.rx.recv()).await {}
    }
}

pub fn recorder() -> (Arc<Recorder>, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { tx }), Events { rx })
}

/// Single-hash key mode keeps tests fast.
pub fn fast_keys() -> KeyOptions {
    KeyOptions {
        mode: KeyMode::Raw,
        ..KeyOptions::default()
    }
}

pub fn passphrase(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

pub fn engine(
    store: Arc<dyn DocumentStore>,
    pass: &str,
    listener: Arc<dyn StoreListener>,
) -> EncryptedStore {
    EncryptedStore::new(store, passphrase(pass), fast_keys(), listener)
}

pub fn fields(value: Value) -> Fields {
    value.as_object().cloned().expect("fields must be a JSON object")
}

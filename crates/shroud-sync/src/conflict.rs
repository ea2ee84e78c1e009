//! Surfacing and resolving multi-writer conflicts.
//!
//! The store decides which revision currently wins; this module only
//! decrypts the winner and every losing revision so a caller-side policy can
//! compare them, then applies whatever the caller picks.

use shroud_core::{
    ConflictLoser, ConflictSet, DecryptionFailure, EncryptedRecord, Fields, ShroudError,
    ShroudResult,
};
use shroud_crypto::KeyProvider;
use shroud_store::DocumentStore;
use std::sync::Arc;
use tracing::{info, warn};

use crate::codec;
use crate::identity::DocumentIdentity;

pub struct ConflictResolver {
    store: Arc<dyn DocumentStore>,
    keys: Arc<KeyProvider>,
}

impl ConflictResolver {
    pub fn new(store: Arc<dyn DocumentStore>, keys: Arc<KeyProvider>) -> Self {
        Self { store, keys }
    }

    /// Decrypt the winner and every losing revision of a document.
    ///
    /// Returns `None` when the document has no conflicting revisions (or no
    /// longer exists). A losing revision that cannot be fetched or decrypted
    /// is reported in `failures` instead of `losers`; only an undecryptable
    /// winner fails the whole inspection.
    pub async fn inspect(&self, identity: &DocumentIdentity) -> ShroudResult<Option<ConflictSet>> {
        let key = identity.storage_key()?;
        let loser_revisions = self.store.conflicts(&key).await?;
        if loser_revisions.is_empty() {
            return Ok(None);
        }

        let current = match self.store.get(&key).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let doc_key = codec::document_key(&self.keys).await?;
        let winner = codec::open(&doc_key, identity, &current).map_err(ShroudError::decryption)?;

        let mut losers = Vec::with_capacity(loser_revisions.len());
        let mut failures = Vec::new();
        for revision in &loser_revisions {
            match self.store.get_revision(&key, revision).await {
                Ok(record) => match codec::open(&doc_key, identity, &record) {
                    Ok(document) => losers.push(ConflictLoser {
                        revision: revision.clone(),
                        document,
                    }),
                    Err(failure) => failures.push(failure),
                },
                Err(e) => failures.push(DecryptionFailure {
                    key: key.clone(),
                    cause: format!("fetching revision: {e}"),
                    record: EncryptedRecord {
                        key: key.clone(),
                        revision: Some(revision.clone()),
                        ciphertext: None,
                    },
                }),
            }
        }

        Ok(Some(ConflictSet {
            key,
            winner,
            winner_revision: current.revision.unwrap_or_default(),
            losers,
            loser_revisions,
            failures,
        }))
    }

    /// Write `chosen` forward as the new current revision, then retire every
    /// losing revision.
    ///
    /// Every removal is attempted even if an earlier one fails; any failure is
    /// then reported as `ConflictResolution`, while the written winner stands.
    /// Returns the new revision id.
    pub async fn resolve(&self, identity: &DocumentIdentity, chosen: &Fields) -> ShroudResult<String> {
        let key = identity.storage_key()?;
        let loser_revisions = self.store.conflicts(&key).await?;
        if loser_revisions.is_empty() {
            return Err(ShroudError::NoConflict(key));
        }

        let doc_key = codec::document_key(&self.keys).await?;
        let ciphertext = codec::seal(&doc_key, chosen)?;
        let revision = self.store.put(&key, &ciphertext).await?;

        let mut failed = Vec::new();
        for loser in loser_revisions {
            if let Err(e) = self.store.remove_revision(&key, &loser).await {
                warn!(key = %key, revision = %loser, "failed to retire losing revision: {e}");
                failed.push((loser, e.to_string()));
            }
        }
        if !failed.is_empty() {
            return Err(ShroudError::ConflictResolution { key, failed });
        }

        info!(key = %key, revision = %revision, "conflict resolved");
        Ok(revision)
    }
}

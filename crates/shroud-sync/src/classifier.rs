//! Change classification: creation vs update vs deletion, from set membership.
//!
//! The underlying store only ever reports "this key now has ciphertext" or
//! "this key is gone". Whether that is a creation or an update is decided by
//! the known-identity set alone:
//!
//! | known?  | observed            | classification | effect          |
//! |---------|---------------------|----------------|-----------------|
//! | no      | present             | Created        | insert          |
//! | yes     | present             | Updated        | refresh key     |
//! | yes     | absent / tombstone  | Deleted        | remove          |
//! | no      | absent / tombstone  | (ignored)      | none            |
//! | either  | undecryptable       | (reported)     | none            |
//!
//! A document that cannot be decrypted never enters the set, so fixing it
//! later surfaces as a creation; one that was already known stays known, so
//! its deletion is still reported.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identity::DocumentIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Classification::Created => "created",
            Classification::Updated => "updated",
            Classification::Deleted => "deleted",
        })
    }
}

/// What the engine saw for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Live record whose ciphertext decrypted.
    Present,
    /// Tombstone, or no record at all.
    Absent,
    /// Live record whose ciphertext failed to decrypt.
    Undecryptable,
}

/// The documents the engine currently believes exist, with their last-seen
/// storage key. Rebuilt from a full load; never persisted.
#[derive(Debug, Clone, Default)]
pub struct KnownIdentitySet {
    entries: HashMap<DocumentIdentity, String>,
}

impl KnownIdentitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, identity: &DocumentIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn storage_key(&self, identity: &DocumentIdentity) -> Option<&str> {
        self.entries.get(identity).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Storage keys of every known document, sorted.
    pub fn storage_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.values().cloned().collect();
        keys.sort();
        keys
    }

    fn insert(&mut self, identity: DocumentIdentity, key: &str) -> bool {
        self.entries.insert(identity, key.to_string()).is_none()
    }

    fn remove(&mut self, identity: &DocumentIdentity) -> bool {
        self.entries.remove(identity).is_some()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Owns the known-identity set and applies the classification table.
#[derive(Debug, Default)]
pub struct ChangeClassifier {
    known: KnownIdentitySet,
}

impl ChangeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known(&self) -> &KnownIdentitySet {
        &self.known
    }

    /// Forget everything; the next load seeds the set from scratch.
    pub fn reset(&mut self) {
        self.known.clear();
    }

    /// Classify one observation and update membership accordingly.
    ///
    /// Returns `None` when the observation produces no event.
    pub fn observe(
        &mut self,
        identity: &DocumentIdentity,
        key: &str,
        observation: Observation,
    ) -> Option<Classification> {
        let classification = match observation {
            Observation::Present => {
                if self.known.insert(identity.clone(), key) {
                    Some(Classification::Created)
                } else {
                    Some(Classification::Updated)
                }
            }
            Observation::Absent => self
                .known
                .remove(identity)
                .then_some(Classification::Deleted),
            Observation::Undecryptable => None,
        };
        tracing::debug!(%identity, ?observation, ?classification, "classified change");
        classification
    }
}

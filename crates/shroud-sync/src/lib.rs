//! shroud-sync: client-side encryption and change notification in front of a
//! revisioned document store
//!
//! [`EncryptedStore`] is the entry point. Documents are sealed with one
//! symmetric key before they reach the [`shroud_store::DocumentStore`], so the
//! store and every replication peer only ever see ciphertext. Changes coming
//! back from the store (local writes, replicated writes, deletions) are
//! decrypted, classified as created/updated/deleted, grouped by table, and
//! handed to a [`StoreListener`].

pub mod classifier;
mod codec;
pub mod conflict;
pub mod engine;
pub mod identity;
pub mod listener;
pub mod router;
pub mod sync;

pub use classifier::{ChangeClassifier, Classification, KnownIdentitySet, Observation};
pub use conflict::ConflictResolver;
pub use engine::{generate_id, EncryptedStore, KeyOptions};
pub use identity::DocumentIdentity;
pub use listener::{NoopListener, StoreListener};
pub use router::{group_by_table, ClassifiedBatch, EventRouter, TableGroup};
pub use sync::SyncHandle;

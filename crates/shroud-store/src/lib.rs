//! shroud-store: the document store shroud sits in front of
//!
//! The engine only talks to [`DocumentStore`] and [`Connector`]; it never
//! sees how revisions are kept or how replication moves them. [`MemoryStore`]
//! is the reference implementation: a per-key revision tree held in memory,
//! optionally persisted to a JSON file.

pub mod backend;
pub mod error;
pub mod memory;
pub mod replication;

pub use backend::{ChangeFeed, DocumentStore, RawChange};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use replication::{
    Connector, FileConnector, MemoryHub, MemoryReplicator, ReplicationStats, Replicator,
};

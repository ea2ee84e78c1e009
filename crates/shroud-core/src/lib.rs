//! shroud-core: types shared by the crypto, store, and sync crates

pub mod config;
pub mod error;
pub mod types;

pub use error::{ShroudError, ShroudResult};
pub use types::{
    ConflictLoser, ConflictSet, DecryptionFailure, EncryptedRecord, Fields, LogicalDocument,
    SyncDirection, SyncProgress,
};

use thiserror::Error;

use crate::types::DecryptionFailure;

pub type ShroudResult<T> = Result<T, ShroudError>;

#[derive(Debug, Error)]
pub enum ShroudError {
    /// Fatal to the operation that first awaited the key. Never retried.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("decryption failed for {}: {}", .0.key, .0.cause)]
    Decryption(Box<DecryptionFailure>),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no conflict to resolve for {0}")]
    NoConflict(String),

    /// The chosen winner was written; some losing revisions could not be removed.
    #[error("conflict on {key} only partially resolved: {} revision(s) not removed", .failed.len())]
    ConflictResolution {
        key: String,
        failed: Vec<(String, String)>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("change feed already subscribed")]
    AlreadySubscribed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ShroudError {
    pub fn decryption(failure: DecryptionFailure) -> Self {
        ShroudError::Decryption(Box::new(failure))
    }
}

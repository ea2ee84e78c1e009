use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("revision {revision} not found for {key}")]
    RevisionNotFound { key: String, revision: String },

    #[error("remote unreachable: {0}")]
    Unreachable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<StoreError> for shroud_core::ShroudError {
    fn from(err: StoreError) -> Self {
        use shroud_core::ShroudError;
        match err {
            StoreError::NotFound(key) => ShroudError::NotFound(key),
            StoreError::Unreachable(msg) => ShroudError::Transport(msg),
            other => ShroudError::Store(other.to_string()),
        }
    }
}

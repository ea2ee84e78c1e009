use serde::{Deserialize, Serialize};

/// Non-identifier document content. Insertion order is preserved.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// The caller-visible unit: plaintext fields addressed by `(table, id)`.
///
/// Serializes flat, so `{"id": "alice", "table": "users", "name": "Alice"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalDocument {
    pub id: String,
    pub table: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl LogicalDocument {
    pub fn new(table: impl Into<String>, id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            table: table.into(),
            fields,
        }
    }

    /// A document carrying identity only, used to report deletions.
    pub fn identity_only(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(table, id, Fields::new())
    }
}

/// The row actually persisted by the underlying store.
///
/// `ciphertext` is the only field holding application data; `None` means
/// the record is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
}

impl EncryptedRecord {
    pub fn is_tombstone(&self) -> bool {
        self.ciphertext.is_none()
    }
}

/// A record whose ciphertext failed parsing or authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionFailure {
    pub key: String,
    pub cause: String,
    pub record: EncryptedRecord,
}

/// One losing revision that decrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictLoser {
    pub revision: String,
    pub document: LogicalDocument,
}

/// Decrypted current and superseded revisions of one document.
///
/// `loser_revisions` lists every losing revision the store reported.
/// Those that decrypted appear in `losers` tagged with their revision; the
/// rest land in `failures`, whose records carry the revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSet {
    pub key: String,
    pub winner: LogicalDocument,
    pub winner_revision: String,
    pub losers: Vec<ConflictLoser>,
    pub loser_revisions: Vec<String>,
    #[serde(default)]
    pub failures: Vec<DecryptionFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Push,
    Pull,
}

/// Progress of one replication pass in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub direction: SyncDirection,
    pub docs_read: u64,
    pub docs_written: u64,
    pub failures: u64,
}

//! Sealing and opening whole documents with the store's key.

use shroud_core::{
    DecryptionFailure, EncryptedRecord, Fields, LogicalDocument, ShroudError, ShroudResult,
};
use shroud_crypto::{decrypt_fields, encrypt_fields, DocumentKey, KeyProvider};
use std::sync::Arc;

use crate::identity::DocumentIdentity;

/// Field names that would collide with the flattened identity.
pub const RESERVED_FIELDS: [&str; 2] = ["id", "table"];

pub(crate) async fn document_key(keys: &KeyProvider) -> ShroudResult<Arc<DocumentKey>> {
    keys.key()
        .await
        .map_err(|e| ShroudError::KeyDerivation(e.to_string()))
}

pub(crate) fn seal(key: &DocumentKey, fields: &Fields) -> ShroudResult<String> {
    if let Some(reserved) = RESERVED_FIELDS.iter().find(|name| fields.contains_key(**name)) {
        return Err(ShroudError::InvalidDocument(format!(
            "field '{reserved}' is reserved for the document identity"
        )));
    }
    encrypt_fields(key, fields).map_err(|e| ShroudError::InvalidDocument(e.to_string()))
}

/// Decrypt a record into a document. Never returns partial data.
pub(crate) fn open(
    key: &DocumentKey,
    identity: &DocumentIdentity,
    record: &EncryptedRecord,
) -> Result<LogicalDocument, DecryptionFailure> {
    let failure = |cause: String| DecryptionFailure {
        key: record.key.clone(),
        cause,
        record: record.clone(),
    };
    let ciphertext = record
        .ciphertext
        .as_deref()
        .ok_or_else(|| failure("record has no ciphertext".into()))?;
    let fields = decrypt_fields(key, ciphertext).map_err(|e| failure(e.to_string()))?;
    Ok(LogicalDocument::new(
        identity.table.clone(),
        identity.id.clone(),
        fields,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> DocumentKey {
        DocumentKey::from_bytes([5u8; 32])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let mut fields = Fields::new();
        fields.insert("name".into(), json!("Alice"));
        let ciphertext = seal(&key(), &fields).unwrap();

        let record = EncryptedRecord {
            key: "users_alice".into(),
            revision: Some("1-a".into()),
            ciphertext: Some(ciphertext),
        };
        let doc = open(&key(), &DocumentIdentity::new("users", "alice"), &record).unwrap();
        assert_eq!(doc.id, "alice");
        assert_eq!(doc.table, "users");
        assert_eq!(doc.fields, fields);
    }

    #[test]
    fn test_seal_rejects_reserved_fields() {
        let mut fields = Fields::new();
        fields.insert("id".into(), json!("sneaky"));
        assert!(matches!(seal(&key(), &fields), Err(ShroudError::InvalidDocument(_))));
    }

    #[test]
    fn test_open_tombstone_is_failure() {
        let record = EncryptedRecord {
            key: "users_alice".into(),
            revision: Some("2-b".into()),
            ciphertext: None,
        };
        let failure = open(&key(), &DocumentIdentity::new("users", "alice"), &record).unwrap_err();
        assert_eq!(failure.key, "users_alice");
        assert_eq!(failure.record, record);
    }

    #[test]
    fn test_open_wrong_key_reports_cause() {
        let ciphertext = seal(&key(), &Fields::new()).unwrap();
        let record = EncryptedRecord {
            key: "users_alice".into(),
            revision: None,
            ciphertext: Some(ciphertext),
        };
        let other = DocumentKey::from_bytes([6u8; 32]);
        let failure = open(&other, &DocumentIdentity::new("users", "alice"), &record).unwrap_err();
        assert!(failure.cause.contains("authentication"));
    }
}

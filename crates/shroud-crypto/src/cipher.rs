//! Per-document AES-256-GCM encryption/decryption
//!
//! Wire format (text):
//! ```text
//! <24 hex chars: random 12-byte nonce>|<hex: ciphertext || 16-byte GCM tag>
//! ```
//!
//! The plaintext is the JSON object of the document's non-identifier fields.
//! A fresh nonce is drawn for every call, so sealing the same fields twice
//! never yields the same ciphertext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::kdf::DocumentKey;
use crate::{NONCE_SIZE, TAG_SIZE, WIRE_SEPARATOR};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("malformed ciphertext: {0}")]
    Format(String),

    #[error("invalid hex in ciphertext: {0}")]
    Hex(String),

    #[error("authentication failed: wrong key or corrupted data")]
    Authentication,

    #[error("decrypted payload is not a JSON object: {0}")]
    Payload(String),

    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// Seal a document's fields.
pub fn encrypt_fields(key: &DocumentKey, fields: &Map<String, Value>) -> Result<String, CipherError> {
    let plaintext = serde_json::to_vec(fields)
        .map_err(|e| CipherError::Encryption(format!("serializing fields: {e}")))?;

    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|e| CipherError::Encryption(e.to_string()))?;

    Ok(format!(
        "{}{}{}",
        hex::encode(nonce_bytes),
        WIRE_SEPARATOR,
        hex::encode(sealed)
    ))
}

/// Open a ciphertext produced by [`encrypt_fields`].
///
/// Never returns partial data: any format, hex, or authentication problem is
/// an error.
pub fn decrypt_fields(key: &DocumentKey, ciphertext: &str) -> Result<Map<String, Value>, CipherError> {
    let (nonce_hex, payload_hex) = ciphertext
        .split_once(WIRE_SEPARATOR)
        .ok_or_else(|| CipherError::Format(format!("missing '{WIRE_SEPARATOR}' separator")))?;

    let nonce_bytes = hex::decode(nonce_hex).map_err(|e| CipherError::Hex(e.to_string()))?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(CipherError::Format(format!(
            "nonce is {} bytes (expected {NONCE_SIZE})",
            nonce_bytes.len()
        )));
    }

    let sealed = hex::decode(payload_hex).map_err(|e| CipherError::Hex(e.to_string()))?;
    if sealed.len() < TAG_SIZE {
        return Err(CipherError::Format(format!(
            "payload too short: {} bytes (minimum {TAG_SIZE})",
            sealed.len()
        )));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), sealed.as_ref())
        .map_err(|_| CipherError::Authentication)?;

    serde_json::from_slice::<Map<String, Value>>(&plaintext)
        .map_err(|e| CipherError::Payload(e.to_string()))
}

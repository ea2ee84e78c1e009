//! shroud-crypto: client-side document encryption for shroud
//!
//! Every non-identifier field of a document is serialized to JSON and sealed
//! as one AES-256-GCM payload:
//!
//! ```text
//! Passphrase
//!   ├── "derive": PBKDF2-HMAC-SHA256 (100k iterations, salt = passphrase) → 256-bit key
//!   └── "raw":    SHA-256(passphrase) → 256-bit key
//!
//! Ciphertext wire format: hex(12-byte nonce) | hex(ciphertext || 16-byte tag)
//! ```

pub mod cipher;
pub mod kdf;

pub use cipher::{decrypt_fields, encrypt_fields, CipherError};
pub use kdf::{derive_document_key, DocumentKey, KdfParams, KeyMode, KeyProvider};

/// Size of a document key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Separates the hex nonce from the hex payload in the wire format
pub const WIRE_SEPARATOR: char = '|';

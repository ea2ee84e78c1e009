//! Key derivation: passphrase → document key, memoized per store instance

use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use zeroize::{Zeroize, Zeroizing};

use crate::KEY_SIZE;

/// A 256-bit AES-GCM key. Zeroized on drop.
pub struct DocumentKey {
    bytes: [u8; KEY_SIZE],
}

impl DocumentKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DocumentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// How passphrase material becomes a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyMode {
    /// PBKDF2-HMAC-SHA256 with the passphrase as its own salt.
    #[default]
    Derive,
    /// One SHA-256 pass, for callers supplying high-entropy key material.
    Raw,
}

impl FromStr for KeyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "derive" => Ok(KeyMode::Derive),
            "raw" => Ok(KeyMode::Raw),
            other => anyhow::bail!("unknown key mode '{other}' (expected \"derive\" or \"raw\")"),
        }
    }
}

/// PBKDF2 parameters
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Iteration count (default: 100000)
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: 100_000,
        }
    }
}

/// Derive a document key from a passphrase.
///
/// Deterministic in both modes: the same passphrase always yields the same
/// key, so no salt needs to be stored next to the data.
pub fn derive_document_key(
    passphrase: &SecretString,
    mode: KeyMode,
    params: &KdfParams,
) -> anyhow::Result<DocumentKey> {
    derive_from_bytes(passphrase.expose_secret().as_bytes(), mode, params)
}

fn derive_from_bytes(material: &[u8], mode: KeyMode, params: &KdfParams) -> anyhow::Result<DocumentKey> {
    if material.is_empty() {
        anyhow::bail!("passphrase must not be empty");
    }

    let mut key = [0u8; KEY_SIZE];
    match mode {
        KeyMode::Derive => {
            if params.iterations == 0 {
                anyhow::bail!("PBKDF2 iteration count must be positive");
            }
            pbkdf2_hmac::<Sha256>(material, material, params.iterations, &mut key);
        }
        KeyMode::Raw => {
            let digest = Sha256::digest(material);
            key.copy_from_slice(&digest);
        }
    }
    Ok(DocumentKey::from_bytes(key))
}

/// Lazily derives the key on first use and hands the same key to every caller.
///
/// Concurrent first callers all await one derivation. The outcome is cached
/// whether it succeeded or not: a failed derivation is never retried.
pub struct KeyProvider {
    passphrase: SecretString,
    mode: KeyMode,
    params: KdfParams,
    cell: OnceCell<Result<Arc<DocumentKey>, String>>,
}

impl KeyProvider {
    pub fn new(passphrase: SecretString, mode: KeyMode, params: KdfParams) -> Self {
        Self {
            passphrase,
            mode,
            params,
            cell: OnceCell::new(),
        }
    }

    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    pub async fn key(&self) -> anyhow::Result<Arc<DocumentKey>> {
        let outcome = self
            .cell
            .get_or_init(|| async {
                let material = Zeroizing::new(self.passphrase.expose_secret().as_bytes().to_vec());
                let mode = self.mode;
                let params = self.params.clone();
                tracing::debug!(?mode, iterations = params.iterations, "deriving document key");

                match tokio::task::spawn_blocking(move || derive_from_bytes(&material, mode, &params))
                    .await
                {
                    Ok(Ok(key)) => Ok(Arc::new(key)),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(e) => Err(format!("key derivation task failed: {e}")),
                }
            })
            .await;

        match outcome {
            Ok(key) => Ok(Arc::clone(key)),
            Err(msg) => Err(anyhow::anyhow!("{msg}")),
        }
    }
}

impl std::fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyProvider")
            .field("mode", &self.mode)
            .field("initialized", &self.cell.initialized())
            .finish()
    }
}

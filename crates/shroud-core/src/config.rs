use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration (loaded from shroud.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShroudConfig {
    pub store: StoreConfig,
    pub crypto: CryptoConfig,
    pub sync: SyncConfig,
    pub log: LogConfig,
}

impl ShroudConfig {
    /// Load from a TOML file, falling back to defaults when the file is missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file backing the local document store
    pub path: PathBuf,
}

/// Document encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// "derive" (PBKDF2-SHA256) or "raw" (single SHA-256 of high-entropy material)
    pub key_mode: String,
    /// PBKDF2 iteration count for "derive" mode (default: 100000)
    pub pbkdf2_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Replication peer (path of a remote store file)
    pub remote: Option<String>,
    /// Background replication period in milliseconds
    pub interval_ms: u64,
    /// Upper bound on waiting for remote delete confirmation
    pub destroy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/shroud/store.json"),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_mode: "derive".into(),
            pbkdf2_iterations: 100_000,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: None,
            interval_ms: 1000,
            destroy_timeout_ms: 10_000,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[store]
path = "/var/lib/shroud/store.json"

[crypto]
key_mode = "raw"
pbkdf2_iterations = 5000

[sync]
remote = "/mnt/shared/remote.json"
interval_ms = 250
destroy_timeout_ms = 3000

[log]
level = "debug"
format = "json"
"#;
        let config: ShroudConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.store.path, PathBuf::from("/var/lib/shroud/store.json"));
        assert_eq!(config.crypto.key_mode, "raw");
        assert_eq!(config.crypto.pbkdf2_iterations, 5000);
        assert_eq!(config.sync.remote.as_deref(), Some("/mnt/shared/remote.json"));
        assert_eq!(config.sync.interval_ms, 250);
        assert_eq!(config.sync.destroy_timeout_ms, 3000);
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config: ShroudConfig = toml::from_str("").unwrap();

        assert_eq!(config.crypto.key_mode, "derive");
        assert_eq!(config.crypto.pbkdf2_iterations, 100_000);
        assert!(config.sync.remote.is_none());
        assert_eq!(config.sync.destroy_timeout_ms, 10_000);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[crypto]
key_mode = "raw"
"#;
        let config: ShroudConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.crypto.key_mode, "raw");
        // Defaults
        assert_eq!(config.crypto.pbkdf2_iterations, 100_000);
        assert_eq!(config.sync.interval_ms, 1000);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = ShroudConfig::load_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.crypto.key_mode, "derive");
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("shroud.toml");
        std::fs::write(&path, "[log]\nlevel = \"trace\"\n").unwrap();

        let config = ShroudConfig::load_or_default(&path).unwrap();
        assert_eq!(config.log.level, "trace");
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("shroud.toml");
        std::fs::write(&path, "[crypto\nkey_mode = ").unwrap();

        assert!(ShroudConfig::load_or_default(&path).is_err());
    }
}

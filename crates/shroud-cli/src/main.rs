//! shroud: encrypted document store CLI
//!
//! Commands:
//!   put <table> <json> [--id ID]   - encrypt and store a document
//!   get <table> <id>               - decrypt and print a document
//!   rm <table> <id>                - delete a document
//!   list [--table T]               - decrypt and print every document
//!   conflicts <table> <id>         - show the winner and losers of a conflict
//!   resolve <table> <id> <json>    - pick the surviving version of a conflict
//!   sync [--remote P] [--watch]    - replicate with a peer store file
//!   destroy --yes                  - delete everything here and on the peer
//!   config show                    - display current configuration
//!
//! The passphrase comes from SHROUD_PASSPHRASE or an interactive prompt.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use serde_json::Value;
use shroud_core::config::ShroudConfig;
use shroud_core::{ConflictSet, DecryptionFailure, Fields, LogicalDocument, SyncProgress};
use shroud_store::{FileConnector, MemoryStore};
use shroud_sync::{EncryptedStore, KeyOptions, NoopListener, StoreListener, TableGroup};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "shroud",
    version,
    about = "Client-side encrypted document store",
    long_about = "shroud: store, read, and replicate documents that are encrypted before they touch disk"
)]
struct Cli {
    /// Path to shroud.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SHROUD_CONFIG",
        default_value = "~/.config/shroud/config.toml"
    )]
    config: PathBuf,

    /// Store file (overrides config store.path)
    #[arg(long, env = "SHROUD_STORE")]
    store: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides config log.level
    #[arg(long, env = "SHROUD_LOG")]
    log: Option<String>,

    /// Log format; overrides config log.format
    #[arg(long, env = "SHROUD_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt and store a document
    Put {
        table: String,
        /// Document fields as a JSON object
        fields: String,
        /// Document id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Decrypt and print one document
    Get { table: String, id: String },

    /// Delete one document
    Rm { table: String, id: String },

    /// Decrypt and print every document
    List {
        /// Only documents of this table
        #[arg(long, short = 't')]
        table: Option<String>,
    },

    /// Show the current version and the losing versions of a conflicted document
    Conflicts { table: String, id: String },

    /// Keep the given fields as the current version and drop every losing one
    Resolve {
        table: String,
        id: String,
        /// Surviving fields as a JSON object
        fields: String,
    },

    /// Replicate with a peer store file
    Sync {
        /// Peer store file (overrides config sync.remote)
        #[arg(long, short = 'r')]
        remote: Option<String>,
        /// Keep replicating and print changes until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Delete every document locally and on the peer, waiting for the peer to confirm
    Destroy {
        /// Peer store file (overrides config sync.remote)
        #[arg(long, short = 'r')]
        remote: Option<String>,
        /// Required: confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = ShroudConfig::load_or_default(&config_path)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match &cli.log_format {
        Some(format) => format.clone(),
        None => LogFormat::from_str(&config.log.format, true)
            .map_err(|e| anyhow::anyhow!("invalid log.format in config: {e}"))?,
    };
    init_logging(&level, &format);
    debug!(config = %config_path.display(), "configuration loaded");

    let store_path = expand_tilde(cli.store.as_deref().unwrap_or(config.store.path.as_path()));

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
        Commands::Put { table, fields, id } => {
            let session = Session::open(&config, &store_path, Arc::new(NoopListener))?;
            let doc = session
                .store
                .write(&table, id.as_deref(), parse_fields(&fields)?)
                .await?;
            session.finish()?;
            println!("{}/{}", doc.table, doc.id);
            Ok(())
        }
        Commands::Get { table, id } => {
            let session = Session::open(&config, &store_path, Arc::new(NoopListener))?;
            match session.store.read(&table, &id).await? {
                Some(doc) => print_json(&doc),
                None => anyhow::bail!("{table}/{id}: not found"),
            }
        }
        Commands::Rm { table, id } => {
            let session = Session::open(&config, &store_path, Arc::new(NoopListener))?;
            session.store.remove(&table, &id).await?;
            session.finish()?;
            println!("removed {table}/{id}");
            Ok(())
        }
        Commands::List { table } => cmd_list(&config, &store_path, table.as_deref()).await,
        Commands::Conflicts { table, id } => {
            let session = Session::open(&config, &store_path, Arc::new(NoopListener))?;
            match session.store.inspect_conflict(&table, &id).await? {
                Some(conflict) => print_conflict(&conflict),
                None => {
                    println!("{table}/{id}: no conflicts");
                    Ok(())
                }
            }
        }
        Commands::Resolve { table, id, fields } => {
            let session = Session::open(&config, &store_path, Arc::new(NoopListener))?;
            session
                .store
                .resolve_conflict(&table, &id, parse_fields(&fields)?)
                .await?;
            session.finish()?;
            println!("resolved {table}/{id}");
            Ok(())
        }
        Commands::Sync { remote, watch } => {
            let remote = resolve_remote(&config, remote)?;
            cmd_sync(&config, &store_path, &remote, watch).await
        }
        Commands::Destroy { remote, yes } => {
            if !yes {
                anyhow::bail!("refusing to destroy without --yes");
            }
            let remote = resolve_remote(&config, remote)?;
            cmd_destroy(&config, &store_path, &remote).await
        }
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Session: file-backed store + engine ───────────────────────────────────────

struct Session {
    raw: Arc<MemoryStore>,
    store: EncryptedStore,
}

impl Session {
    fn open(config: &ShroudConfig, path: &Path, listener: Arc<dyn StoreListener>) -> Result<Self> {
        let raw = Arc::new(
            MemoryStore::open(path).with_context(|| format!("opening store {}", path.display()))?,
        );
        let options = KeyOptions::from_config(&config.crypto)?;
        let store = EncryptedStore::new(raw.clone(), read_passphrase()?, options, listener);
        Ok(Self { raw, store })
    }

    fn finish(&self) -> Result<()> {
        self.raw.flush().context("writing store file")
    }
}

fn read_passphrase() -> Result<SecretString> {
    if let Ok(passphrase) = std::env::var("SHROUD_PASSPHRASE") {
        return Ok(SecretString::from(passphrase));
    }
    let passphrase =
        rpassword::prompt_password("shroud passphrase: ").context("reading passphrase")?;
    Ok(SecretString::from(passphrase))
}

fn resolve_remote(config: &ShroudConfig, flag: Option<String>) -> Result<String> {
    flag.or_else(|| config.sync.remote.clone())
        .map(|remote| expand_tilde(Path::new(&remote)).display().to_string())
        .context("no peer configured; use --remote or set sync.remote in config")
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    match path.to_string_lossy().strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

fn parse_fields(json: &str) -> Result<Fields> {
    match serde_json::from_str::<Value>(json).context("fields must be valid JSON")? {
        Value::Object(fields) => Ok(fields),
        other => anyhow::bail!("fields must be a JSON object, got {other}"),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serializing output")?);
    Ok(())
}

// ── `shroud list` ─────────────────────────────────────────────────────────────

/// Collects the initial-load batch.
#[derive(Default)]
struct Collector {
    documents: Mutex<Vec<LogicalDocument>>,
    failures: Mutex<Vec<DecryptionFailure>>,
}

impl StoreListener for Collector {
    fn on_created(&self, batch: &[TableGroup]) {
        let mut documents = self.documents.lock().unwrap_or_else(|p| p.into_inner());
        documents.extend(batch.iter().flat_map(|g| g.documents.iter().cloned()));
    }

    fn on_decryption_failure(&self, failures: &[DecryptionFailure]) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(failures);
    }
}

async fn cmd_list(config: &ShroudConfig, path: &Path, table: Option<&str>) -> Result<()> {
    let collector = Arc::new(Collector::default());
    let session = Session::open(config, path, collector.clone())?;
    session.store.load_and_subscribe().await?;
    session.store.close().await;

    let documents: Vec<LogicalDocument> = collector
        .documents
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .drain(..)
        .filter(|doc| table.map_or(true, |t| doc.table == t))
        .collect();
    print_json(&documents)?;

    let failures = collector.failures.lock().unwrap_or_else(|p| p.into_inner());
    if !failures.is_empty() {
        eprintln!("{} document(s) could not be decrypted:", failures.len());
        for failure in failures.iter() {
            eprintln!("  {}: {}", failure.key, failure.cause);
        }
    }
    Ok(())
}

// ── `shroud conflicts` ────────────────────────────────────────────────────────

fn print_conflict(conflict: &ConflictSet) -> Result<()> {
    println!("# current revision {}", conflict.winner_revision);
    print_json(&conflict.winner.fields)?;
    for loser in &conflict.losers {
        println!("# losing revision {}", loser.revision);
        print_json(&loser.document.fields)?;
    }
    for failure in &conflict.failures {
        let revision = failure.record.revision.as_deref().unwrap_or("?");
        println!("# losing revision {revision} (unreadable: {})", failure.cause);
    }
    Ok(())
}

// ── `shroud sync` ─────────────────────────────────────────────────────────────

/// Prints live changes while watching.
struct Printer;

impl Printer {
    fn print(label: &str, batch: &[TableGroup]) {
        for group in batch {
            for doc in &group.documents {
                println!("{label} {}/{}", group.table, doc.id);
            }
        }
    }
}

impl StoreListener for Printer {
    fn on_created(&self, batch: &[TableGroup]) {
        Self::print("created", batch);
    }

    fn on_updated(&self, batch: &[TableGroup]) {
        Self::print("updated", batch);
    }

    fn on_deleted(&self, batch: &[TableGroup]) {
        Self::print("deleted", batch);
    }

    fn on_decryption_failure(&self, failures: &[DecryptionFailure]) {
        for failure in failures {
            eprintln!("unreadable {}: {}", failure.key, failure.cause);
        }
    }

    fn on_conflict(&self, conflicts: &[ConflictSet]) {
        for conflict in conflicts {
            println!(
                "conflict {}/{} ({} losing revision(s))",
                conflict.winner.table,
                conflict.winner.id,
                conflict.loser_revisions.len()
            );
        }
    }

    fn on_sync_progress(&self, progress: &SyncProgress) {
        debug!(
            direction = ?progress.direction,
            read = progress.docs_read,
            written = progress.docs_written,
            failures = progress.failures,
            "sync progress"
        );
    }

    fn on_processing_error(&self, error: &shroud_core::ShroudError) {
        eprintln!("error: {error}");
    }
}

async fn cmd_sync(config: &ShroudConfig, path: &Path, remote: &str, watch: bool) -> Result<()> {
    let listener: Arc<dyn StoreListener> = if watch {
        Arc::new(Printer)
    } else {
        Arc::new(NoopListener)
    };
    let session = Session::open(config, path, listener)?;
    let connector = FileConnector::new(session.raw.clone());
    let interval = Duration::from_millis(config.sync.interval_ms);

    if watch {
        session.store.load_and_subscribe().await?;
    }
    session.store.connect(&connector, remote, interval).await?;

    if watch {
        info!(remote, "watching; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    } else {
        session.store.sync_now().await?;
    }

    session.store.close().await;
    session.finish()?;
    println!("synced with {remote}");
    Ok(())
}

// ── `shroud destroy` ──────────────────────────────────────────────────────────

async fn cmd_destroy(config: &ShroudConfig, path: &Path, remote: &str) -> Result<()> {
    let session = Session::open(config, path, Arc::new(NoopListener))?;
    let connector = FileConnector::new(session.raw.clone());
    let interval = Duration::from_millis(config.sync.interval_ms);
    let timeout = Duration::from_millis(config.sync.destroy_timeout_ms);

    session.store.connect(&connector, remote, interval).await?;
    let result = session.store.destroy_and_sync(timeout).await;
    session.store.close().await;
    session.finish()?;

    let deleted = result?;
    println!("destroyed {deleted} document(s) here and on {remote}");
    Ok(())
}

// ── `shroud config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &ShroudConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

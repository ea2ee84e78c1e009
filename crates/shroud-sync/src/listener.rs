//! Caller-facing notification surface.

use shroud_core::{ConflictSet, DecryptionFailure, ShroudError, SyncProgress};

use crate::router::TableGroup;

/// Receives engine events. Every method defaults to a no-op.
///
/// Calls are made synchronously from the single processing chain, one batch
/// at a time; implementations must not block for long.
pub trait StoreListener: Send + Sync {
    fn on_created(&self, _batch: &[TableGroup]) {}

    fn on_updated(&self, _batch: &[TableGroup]) {}

    /// Deleted documents carry identity only; their fields are empty.
    fn on_deleted(&self, _batch: &[TableGroup]) {}

    fn on_decryption_failure(&self, _failures: &[DecryptionFailure]) {}

    fn on_conflict(&self, _conflicts: &[ConflictSet]) {}

    fn on_sync_progress(&self, _progress: &SyncProgress) {}

    /// An error caught while draining the change chain; the chain continues.
    fn on_processing_error(&self, _error: &ShroudError) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl StoreListener for NoopListener {}

//! Background replication with a remote peer.
//!
//! A connected store runs one loop that pushes then pulls on a fixed period,
//! reporting each direction through `on_sync_progress`. Transport failures
//! are reported and retried on the next tick; they never touch local state.

use shroud_core::{ShroudError, ShroudResult, SyncDirection, SyncProgress};
use shroud_store::{ReplicationStats, Replicator};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::listener::StoreListener;

fn progress(direction: SyncDirection, stats: ReplicationStats) -> SyncProgress {
    SyncProgress {
        direction,
        docs_read: stats.docs_read,
        docs_written: stats.docs_written,
        failures: 0,
    }
}

fn failed(direction: SyncDirection) -> SyncProgress {
    SyncProgress {
        direction,
        docs_read: 0,
        docs_written: 0,
        failures: 1,
    }
}

/// One push followed by one pull.
pub async fn run_pass(
    replicator: &dyn Replicator,
    listener: &dyn StoreListener,
) -> ShroudResult<(SyncProgress, SyncProgress)> {
    let pushed = match replicator.push().await {
        Ok(stats) => progress(SyncDirection::Push, stats),
        Err(e) => {
            listener.on_sync_progress(&failed(SyncDirection::Push));
            return Err(e.into());
        }
    };
    listener.on_sync_progress(&pushed);

    let pulled = match replicator.pull().await {
        Ok(stats) => progress(SyncDirection::Pull, stats),
        Err(e) => {
            listener.on_sync_progress(&failed(SyncDirection::Pull));
            return Err(e.into());
        }
    };
    listener.on_sync_progress(&pulled);

    debug!(
        pushed = pushed.docs_written,
        pulled = pulled.docs_written,
        "sync pass complete"
    );
    Ok((pushed, pulled))
}

/// A running replication loop. Dropping the handle cancels the loop without
/// waiting for it; [`SyncHandle::stop`] also waits for it to exit.
pub struct SyncHandle {
    address: String,
    replicator: Arc<dyn Replicator>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn spawn(
        address: &str,
        replicator: Arc<dyn Replicator>,
        interval: Duration,
        listener: Arc<dyn StoreListener>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let link = Arc::clone(&replicator);
        let peer = address.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            result = run_pass(link.as_ref(), listener.as_ref()) => {
                                if let Err(e) = result {
                                    warn!(address = %peer, "sync pass failed: {e}");
                                }
                            }
                        }
                    }
                }
            }
            debug!(address = %peer, "sync loop stopped");
        });

        info!(address, ?interval, "sync started");
        Self {
            address: address.to_string(),
            replicator,
            cancel,
            task: Some(task),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn replicator(&self) -> Arc<dyn Replicator> {
        Arc::clone(&self.replicator)
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(address = %self.address, "sync task ended abnormally: {e}");
            }
        }
        info!(address = %self.address, "sync stopped");
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Wait until none of `keys` is live on the remote, pushing between checks.
pub(crate) async fn confirm_remote_absent(
    replicator: &dyn Replicator,
    keys: &[String],
    poll: Duration,
) -> ShroudResult<()> {
    loop {
        replicator.push().await?;
        let mut pending = None;
        for key in keys {
            if replicator.remote_has_live(key).await? {
                pending = Some(key);
                break;
            }
        }
        match pending {
            None => return Ok(()),
            Some(key) => {
                debug!(key = %key, "remote still holds a live revision");
                tokio::time::sleep(poll).await;
            }
        }
    }
}

pub(crate) fn not_connected() -> ShroudError {
    ShroudError::Transport("sync is not connected".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shroud_store::{StoreError, StoreResult};
    use std::sync::Mutex;

    struct Down;

    #[async_trait]
    impl Replicator for Down {
        async fn push(&self) -> StoreResult<ReplicationStats> {
            Err(StoreError::Unreachable("link down".into()))
        }

        async fn pull(&self) -> StoreResult<ReplicationStats> {
            Ok(ReplicationStats::default())
        }

        async fn remote_has_live(&self, _key: &str) -> StoreResult<bool> {
            Ok(false)
        }
    }

    #[derive(Default)]
    struct Progress(Mutex<Vec<SyncProgress>>);

    impl StoreListener for Progress {
        fn on_sync_progress(&self, progress: &SyncProgress) {
            self.0.lock().unwrap().push(progress.clone());
        }
    }

    #[tokio::test]
    async fn test_failed_push_reports_and_skips_pull() {
        let listener = Progress::default();
        let err = run_pass(&Down, &listener).await.unwrap_err();
        assert!(matches!(err, ShroudError::Transport(_)));

        let seen = listener.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].direction, SyncDirection::Push);
        assert_eq!(seen[0].failures, 1);
    }

    #[tokio::test]
    async fn test_confirm_returns_once_remote_is_clear() {
        let keys = vec!["users_a".to_string()];
        confirm_remote_absent(&Down, &keys, Duration::from_millis(1))
            .await
            .unwrap_err();

        struct Clear;
        #[async_trait]
        impl Replicator for Clear {
            async fn push(&self) -> StoreResult<ReplicationStats> {
                Ok(ReplicationStats::default())
            }
            async fn pull(&self) -> StoreResult<ReplicationStats> {
                Ok(ReplicationStats::default())
            }
            async fn remote_has_live(&self, _key: &str) -> StoreResult<bool> {
                Ok(false)
            }
        }
        confirm_remote_absent(&Clear, &keys, Duration::from_millis(1))
            .await
            .unwrap();
    }
}

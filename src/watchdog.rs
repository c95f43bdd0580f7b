//! Lease-expiry recovery.
//!
//! The watchdog is an independent periodic task, possibly in a separate
//! process, that talks to the workers only through the state store. It gives
//! an abandoned running item the same transition a transient failure takes:
//! back to pending with the retry count incremented, or on an exhausted
//! budget, promoted to failed. Every write is predicated on the lease it
//! observed, so a legitimately late-finishing worker that already settled the
//! item is never disturbed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::batch::BatchCounter;
use crate::completion;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::item::{ItemError, RetryOutcome};
use crate::store::StateStore;

pub struct Watchdog<S: StateStore> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S: StateStore + 'static> Watchdog<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Sweep forever on `watchdog_interval_ms`.
    #[tracing::instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            lease_seconds = self.config.lease_seconds,
            interval_ms = self.config.watchdog_interval_ms,
            "watchdog starting"
        );
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.watchdog_interval_ms));
        loop {
            ticker.tick().await;
            self.sweep().await?;
        }
    }

    /// One pass over every batch: requeue or fail each running item whose
    /// lease has expired. Returns how many items were acted on; replaying the
    /// sweep on a steady state acts on none.
    pub async fn sweep(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.config.lease();
        let expired = self.store.running_older_than(cutoff).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut acted = 0;
        for item in expired {
            let batch_id = item.data.batch_id;
            let item_id = item.data.id;
            tracing::warn!(
                item_id = %item_id,
                batch_id = %batch_id,
                worker_id = %item.state.worker_id,
                started_at = %item.state.started_at,
                retry_count = item.state.retry_count,
                "lease expired, reclaiming item"
            );

            match item
                .retry_or_fail(ItemError::timeout(), self.store.as_ref())
                .await?
            {
                Some(RetryOutcome::Requeued(pending)) => {
                    acted += 1;
                    tracing::info!(
                        item_id = %item_id,
                        retry_count = pending.state.retry_count,
                        "item requeued after lease expiry"
                    );
                }
                Some(RetryOutcome::Exhausted(_)) => {
                    acted += 1;
                    self.store
                        .bump_counter(batch_id, BatchCounter::Failed)
                        .await?;
                    completion::settle_if_complete(self.store.as_ref(), batch_id).await?;
                }
                None => {
                    // The worker settled the item between our read and our
                    // conditional write; its outcome stands.
                    tracing::debug!(item_id = %item_id, "item settled before the sweep write");
                }
            }
        }
        Ok(acted)
    }
}

//! State transitions for items.
//!
//! Every transition out of `Running` goes through the store's lease-predicated
//! write, so a worker whose lease was reclaimed gets its outcome discarded
//! (`Ok(None)`) instead of overwriting a fresh attempt.

use chrono::Utc;

use crate::error::Result;
use crate::store::StateStore;

use super::types::{Cancelled, Complete, Failed, Item, ItemData, ItemError, Pending, Running};

impl Item<Pending> {
    /// A brand-new item entering the queue at batch creation.
    pub fn queued(data: ItemData) -> Self {
        Item {
            state: Pending {
                retry_count: 0,
                error: None,
            },
            data,
        }
    }
}

impl Item<Cancelled> {
    /// A pending item swept by batch cancellation. Only the store's cancel
    /// sweep constructs these, inside its transaction.
    pub fn swept(pending: Item<Pending>) -> Self {
        Item {
            state: Cancelled {
                cancelled_at: Utc::now(),
                retry_count: pending.state.retry_count,
            },
            data: pending.data,
        }
    }
}

/// What became of a transiently failed running item.
#[derive(Debug)]
pub enum RetryOutcome {
    /// Retries remained; the item is pending again at the queue tail.
    Requeued(Item<Pending>),
    /// The retry budget is spent; the item is failed for good.
    Exhausted(Item<Failed>),
}

impl Item<Running> {
    /// Analyzer succeeded: store the result verbatim and settle the slot.
    ///
    /// Returns `Ok(None)` when the lease no longer matched and the write was
    /// discarded.
    pub async fn complete<S: StateStore + ?Sized>(
        self,
        result: serde_json::Value,
        store: &S,
    ) -> Result<Option<Item<Complete>>> {
        let lease = self.lease();
        let item = Item {
            state: Complete {
                result,
                completed_at: Utc::now(),
                retry_count: self.state.retry_count,
            },
            data: self.data,
        };
        if store.persist_outcome(&item, &lease).await? {
            Ok(Some(item))
        } else {
            Ok(None)
        }
    }

    /// Permanent failure: record the error and settle the slot.
    pub async fn fail<S: StateStore + ?Sized>(
        self,
        error: ItemError,
        store: &S,
    ) -> Result<Option<Item<Failed>>> {
        let lease = self.lease();
        let item = Item {
            state: Failed {
                error,
                failed_at: Utc::now(),
                retry_count: self.state.retry_count,
            },
            data: self.data,
        };
        if store.persist_outcome(&item, &lease).await? {
            Ok(Some(item))
        } else {
            Ok(None)
        }
    }

    /// Transient failure with retries remaining: release the lease and
    /// re-enter the queue at the tail with the error recorded.
    pub async fn release<S: StateStore + ?Sized>(
        self,
        error: ItemError,
        store: &S,
    ) -> Result<Option<Item<Pending>>> {
        let lease = self.lease();
        let item = Item {
            state: Pending {
                retry_count: self.state.retry_count + 1,
                error: Some(error),
            },
            data: self.data,
        };
        if store.persist_outcome(&item, &lease).await? {
            Ok(Some(item))
        } else {
            Ok(None)
        }
    }

    /// Transient failure: requeue if attempts remain, otherwise promote to
    /// failed. The watchdog takes the same path with a timeout error.
    pub async fn retry_or_fail<S: StateStore + ?Sized>(
        self,
        error: ItemError,
        store: &S,
    ) -> Result<Option<RetryOutcome>> {
        if self.state.retry_count < self.data.max_retries {
            Ok(self
                .release(error, store)
                .await?
                .map(RetryOutcome::Requeued))
        } else {
            tracing::debug!(
                item_id = %self.data.id,
                retry_count = self.state.retry_count,
                max_retries = self.data.max_retries,
                "no retries remaining, promoting to failed"
            );
            Ok(self.fail(error, store).await?.map(RetryOutcome::Exhausted))
        }
    }
}

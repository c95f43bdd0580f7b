//! State store gateway: the single source of truth and the only place
//! cross-task synchronization happens.
//!
//! The trait names capabilities, not a product: atomic conditional writes,
//! concurrent-safe counter increments, the oldest-pending queue query, and
//! the cross-batch lease-expiry query. `memory::InMemoryStateStore` is the
//! reference implementation; a durable backend is a port of the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::batch::{Batch, BatchCounter, BatchId, BatchStatus, ItemId, WorkerId};
use crate::error::Result;
use crate::item::{AnyItem, Item, ItemSnapshot, ItemState, ItemStatusKind, Lease, Pending, Running};

pub mod memory;

/// Persistence operations the engine requires.
///
/// The type system ensures transitions are well-formed; the store enforces
/// the runtime predicates (claim races, lease checks, status CAS), so every
/// conditional method reports whether its predicate held instead of erroring.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Atomically create the batch record and all of its pending items. No
    /// partial batch is ever visible.
    ///
    /// # Errors
    /// - If a batch with the same ID already exists
    async fn insert_batch(&self, batch: Batch, items: Vec<Item<Pending>>) -> Result<()>;

    /// Read the current batch record.
    async fn get_batch(&self, batch_id: BatchId) -> Result<Batch>;

    /// The oldest pending item of the batch, FIFO by `last_updated_at`
    /// (ties broken by insertion order). Read-only; claiming goes through
    /// [`StateStore::try_claim`].
    async fn next_pending(&self, batch_id: BatchId) -> Result<Option<Item<Pending>>>;

    /// Conditionally move an item from pending to running under `worker_id`'s
    /// lease, refreshing `last_updated_at`. Returns `None` when the item is
    /// no longer pending (another claimant won, or it was swept).
    async fn try_claim(&self, item_id: ItemId, worker_id: WorkerId) -> Result<Option<Item<Running>>>;

    /// Persist a transition out of `Running`, predicated on the stored lease
    /// still matching. Returns `false` (write discarded) when the predicate
    /// failed; the item was already settled or reclaimed by someone else.
    async fn persist_outcome<T>(&self, item: &Item<T>, lease: &Lease) -> Result<bool>
    where
        T: ItemState + Clone,
        AnyItem: From<Item<T>>;

    /// Concurrent-writer-safe increment of one batch counter. Advances the
    /// batch's `updated_at`.
    async fn bump_counter(&self, batch_id: BatchId, counter: BatchCounter) -> Result<()>;

    /// Compare-and-set on the batch status. Returns `false` when the batch
    /// was not in `from`; the caller's transition already happened or became
    /// illegal.
    async fn set_status_if(
        &self,
        batch_id: BatchId,
        from: BatchStatus,
        to: BatchStatus,
    ) -> Result<bool>;

    /// Flip the batch to cancelled and sweep every pending item to cancelled,
    /// incrementing `cancelled_count` per item, in a single transaction.
    /// Returns `Some(swept)` on success, `None` when the batch was not
    /// running or paused.
    async fn cancel_batch(&self, batch_id: BatchId) -> Result<Option<u64>>;

    /// Running items across all batches whose lease started before `cutoff`.
    /// The watchdog's query.
    async fn running_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Item<Running>>>;

    /// Item snapshots for a batch in queue order, optionally filtered by
    /// status.
    async fn list_items(
        &self,
        batch_id: BatchId,
        filter: Option<ItemStatusKind>,
    ) -> Result<Vec<ItemSnapshot>>;

    /// Remove the batch's items, then the batch record. Idempotent; a missing
    /// batch is not an error.
    async fn delete_batch(&self, batch_id: BatchId) -> Result<()>;
}

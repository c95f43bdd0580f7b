//! In-memory state store.
//!
//! Batches and items live in maps behind one writer lock, so every compound
//! operation (batch insert, cancel sweep, conditional claim) is atomic.
//! Suitable for tests and single-process deployments; records are lost on
//! restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::batch::{Batch, BatchCounter, BatchId, BatchStatus, ItemId, WorkerId};
use crate::error::{Result, SieveletError};
use crate::item::{AnyItem, Item, ItemSnapshot, ItemState, ItemStatusKind, Lease, Pending, Running};

use super::StateStore;

/// Stored item with its queue-ordering metadata.
struct StoredItem {
    item: AnyItem,
    last_updated_at: DateTime<Utc>,
    /// Monotonic write sequence; breaks `last_updated_at` ties so FIFO order
    /// is stable even when writes land on the same timestamp.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    batches: HashMap<BatchId, Batch>,
    items: HashMap<ItemId, StoredItem>,
    next_seq: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// In-memory implementation of the [`StateStore`] trait.
#[derive(Clone)]
pub struct InMemoryStateStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStateStore {
    /// Create a new, empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn insert_batch(&self, batch: Batch, items: Vec<Item<Pending>>) -> Result<()> {
        let mut inner = self.inner.write();

        if inner.batches.contains_key(&batch.id) {
            return Err(SieveletError::Validation(format!(
                "batch {} already exists",
                batch.id
            )));
        }

        let now = batch.created_at;
        for item in items {
            let seq = inner.next_seq();
            inner.items.insert(
                item.data.id,
                StoredItem {
                    item: item.into(),
                    last_updated_at: now,
                    seq,
                },
            );
        }
        inner.batches.insert(batch.id, batch);
        Ok(())
    }

    async fn get_batch(&self, batch_id: BatchId) -> Result<Batch> {
        self.inner
            .read()
            .batches
            .get(&batch_id)
            .cloned()
            .ok_or(SieveletError::BatchNotFound(batch_id))
    }

    async fn next_pending(&self, batch_id: BatchId) -> Result<Option<Item<Pending>>> {
        let inner = self.inner.read();

        let oldest = inner
            .items
            .values()
            .filter(|stored| stored.item.batch_id() == batch_id)
            .filter(|stored| stored.item.is_pending())
            .min_by_key(|stored| (stored.last_updated_at, stored.seq));

        Ok(oldest.and_then(|stored| stored.item.as_pending().cloned()))
    }

    async fn try_claim(&self, item_id: ItemId, worker_id: WorkerId) -> Result<Option<Item<Running>>> {
        let mut inner = self.inner.write();
        let seq = inner.next_seq();

        let stored = inner
            .items
            .get_mut(&item_id)
            .ok_or(SieveletError::ItemNotFound(item_id))?;

        let Some(pending) = stored.item.as_pending() else {
            // Another claimant won, or the item was swept.
            return Ok(None);
        };

        let now = Utc::now();
        let running = Item {
            state: Running {
                worker_id,
                started_at: now,
                retry_count: pending.state.retry_count,
            },
            data: pending.data.clone(),
        };
        stored.item = running.clone().into();
        stored.last_updated_at = now;
        stored.seq = seq;
        Ok(Some(running))
    }

    async fn persist_outcome<T>(&self, item: &Item<T>, lease: &Lease) -> Result<bool>
    where
        T: ItemState + Clone,
        AnyItem: From<Item<T>>,
    {
        let mut inner = self.inner.write();
        let seq = inner.next_seq();

        let stored = inner
            .items
            .get_mut(&item.data.id)
            .ok_or(SieveletError::ItemNotFound(item.data.id))?;

        let lease_held = match stored.item.as_running() {
            Some(running) => {
                running.state.worker_id == lease.worker_id
                    && running.state.started_at == lease.started_at
            }
            None => false,
        };
        if !lease_held {
            // Lease mismatch or not running at all: the write is discarded.
            return Ok(false);
        }

        stored.item = item.clone().into();
        stored.last_updated_at = Utc::now();
        stored.seq = seq;
        Ok(true)
    }

    async fn bump_counter(&self, batch_id: BatchId, counter: BatchCounter) -> Result<()> {
        let mut inner = self.inner.write();
        let batch = inner
            .batches
            .get_mut(&batch_id)
            .ok_or(SieveletError::BatchNotFound(batch_id))?;

        match counter {
            BatchCounter::Completed => batch.completed += 1,
            BatchCounter::Failed => batch.failed += 1,
            BatchCounter::CancelledCount => batch.cancelled_count += 1,
        }
        batch.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status_if(
        &self,
        batch_id: BatchId,
        from: BatchStatus,
        to: BatchStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.write();
        let batch = inner
            .batches
            .get_mut(&batch_id)
            .ok_or(SieveletError::BatchNotFound(batch_id))?;

        if batch.status != from {
            return Ok(false);
        }
        batch.status = to;
        batch.updated_at = Utc::now();
        Ok(true)
    }

    async fn cancel_batch(&self, batch_id: BatchId) -> Result<Option<u64>> {
        let mut inner = self.inner.write();
        let seq_base = inner.next_seq;

        let batch = inner
            .batches
            .get(&batch_id)
            .ok_or(SieveletError::BatchNotFound(batch_id))?;
        if !matches!(batch.status, BatchStatus::Running | BatchStatus::Paused) {
            return Ok(None);
        }

        let now = Utc::now();
        let mut swept = 0u64;
        for stored in inner.items.values_mut() {
            if stored.item.batch_id() != batch_id {
                continue;
            }
            if let Some(pending) = stored.item.as_pending() {
                stored.item = Item::swept(pending.clone()).into();
                stored.last_updated_at = now;
                stored.seq = seq_base + swept;
                swept += 1;
            }
        }
        inner.next_seq = seq_base + swept;

        let batch = inner
            .batches
            .get_mut(&batch_id)
            .ok_or(SieveletError::BatchNotFound(batch_id))?;
        batch.status = BatchStatus::Cancelled;
        batch.updated_at = now;
        batch.cancelled_count += swept;
        Ok(Some(swept))
    }

    async fn running_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Item<Running>>> {
        let inner = self.inner.read();

        Ok(inner
            .items
            .values()
            .filter_map(|stored| stored.item.as_running())
            .filter(|running| running.state.started_at < cutoff)
            .cloned()
            .collect())
    }

    async fn list_items(
        &self,
        batch_id: BatchId,
        filter: Option<ItemStatusKind>,
    ) -> Result<Vec<ItemSnapshot>> {
        let inner = self.inner.read();

        let mut stored: Vec<&StoredItem> = inner
            .items
            .values()
            .filter(|stored| stored.item.batch_id() == batch_id)
            .filter(|stored| filter.map_or(true, |kind| stored.item.status() == kind))
            .collect();
        stored.sort_by_key(|s| (s.last_updated_at, s.seq));

        Ok(stored
            .into_iter()
            .map(|s| ItemSnapshot::new(&s.item, s.last_updated_at))
            .collect())
    }

    async fn delete_batch(&self, batch_id: BatchId) -> Result<()> {
        let mut inner = self.inner.write();
        inner.items.retain(|_, stored| stored.item.batch_id() != batch_id);
        inner.batches.remove(&batch_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::batch::{FileRef, OwnerId};
    use crate::item::ItemData;

    fn sample_item(batch_id: BatchId, name: &str) -> Item<Pending> {
        Item::queued(ItemData {
            id: ItemId::new(),
            batch_id,
            filename: name.to_string(),
            file_ref: FileRef(format!("{}/{}", batch_id, name)),
            file_hash: format!("hash-{name}"),
            max_retries: 3,
        })
    }

    fn sample_batch(batch_id: BatchId, total: u64) -> Batch {
        Batch::open(
            batch_id,
            OwnerId::from("owner"),
            "Staff engineer, payments".to_string(),
            total,
            0,
        )
    }

    async fn seed(store: &InMemoryStateStore, names: &[&str]) -> (BatchId, Vec<ItemId>) {
        let batch_id = BatchId::new();
        let items: Vec<Item<Pending>> = names
            .iter()
            .map(|name| sample_item(batch_id, name))
            .collect();
        let ids = items.iter().map(|i| i.data.id).collect();
        store
            .insert_batch(sample_batch(batch_id, names.len() as u64), items)
            .await
            .unwrap();
        (batch_id, ids)
    }

    #[fixture]
    fn store() -> InMemoryStateStore {
        InMemoryStateStore::new()
    }

    #[rstest]
    #[tokio::test]
    async fn test_insert_batch_rejects_duplicate_id(store: InMemoryStateStore) {
        let (batch_id, _) = seed(&store, &["a.pdf"]).await;
        let result = store
            .insert_batch(sample_batch(batch_id, 0), vec![])
            .await;
        assert!(matches!(result, Err(SieveletError::Validation(_))));
    }

    #[rstest]
    #[tokio::test]
    async fn test_next_pending_is_fifo_by_insertion(store: InMemoryStateStore) {
        let (batch_id, ids) = seed(&store, &["a.pdf", "b.pdf", "c.pdf"]).await;

        let first = store.next_pending(batch_id).await.unwrap().unwrap();
        assert_eq!(first.data.id, ids[0]);

        store.try_claim(ids[0], WorkerId::new()).await.unwrap().unwrap();
        let second = store.next_pending(batch_id).await.unwrap().unwrap();
        assert_eq!(second.data.id, ids[1]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_claim_is_exclusive(store: InMemoryStateStore) {
        let (_, ids) = seed(&store, &["a.pdf"]).await;

        let first = store.try_claim(ids[0], WorkerId::new()).await.unwrap();
        assert!(first.is_some());

        // The losing claimant observes the item already gone from pending.
        let second = store.try_claim(ids[0], WorkerId::new()).await.unwrap();
        assert!(second.is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn test_persist_outcome_requires_matching_lease(store: InMemoryStateStore) {
        let (_, ids) = seed(&store, &["a.pdf"]).await;
        let running = store
            .try_claim(ids[0], WorkerId::new())
            .await
            .unwrap()
            .unwrap();

        let wrong_lease = Lease {
            worker_id: WorkerId::new(),
            started_at: running.state.started_at,
        };
        let completed = Item {
            state: crate::item::Complete {
                result: serde_json::json!({}),
                completed_at: Utc::now(),
                retry_count: 0,
            },
            data: running.data.clone(),
        };
        assert!(!store.persist_outcome(&completed, &wrong_lease).await.unwrap());
        assert!(store
            .persist_outcome(&completed, &running.lease())
            .await
            .unwrap());

        // Terminal states are absorbing: even the right lease is refused now.
        assert!(!store
            .persist_outcome(&completed, &running.lease())
            .await
            .unwrap());
    }

    #[rstest]
    #[tokio::test]
    async fn test_released_item_goes_to_the_tail(store: InMemoryStateStore) {
        let (batch_id, ids) = seed(&store, &["a.pdf", "b.pdf"]).await;

        let running = store
            .try_claim(ids[0], WorkerId::new())
            .await
            .unwrap()
            .unwrap();
        running
            .release(crate::item::ItemError::new("rate_limited", "429"), &store)
            .await
            .unwrap()
            .unwrap();

        // b.pdf is now older than the requeued a.pdf.
        let next = store.next_pending(batch_id).await.unwrap().unwrap();
        assert_eq!(next.data.id, ids[1]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_bump_counter_and_status_cas(store: InMemoryStateStore) {
        let (batch_id, _) = seed(&store, &["a.pdf"]).await;

        store
            .bump_counter(batch_id, BatchCounter::Completed)
            .await
            .unwrap();
        let batch = store.get_batch(batch_id).await.unwrap();
        assert_eq!(batch.completed, 1);
        assert!(batch.updated_at >= batch.created_at);

        assert!(store
            .set_status_if(batch_id, BatchStatus::Running, BatchStatus::Complete)
            .await
            .unwrap());
        // Exactly-once: the second flip observes the wrong precondition.
        assert!(!store
            .set_status_if(batch_id, BatchStatus::Running, BatchStatus::Complete)
            .await
            .unwrap());
    }

    #[rstest]
    #[tokio::test]
    async fn test_cancel_batch_sweeps_only_pending(store: InMemoryStateStore) {
        let (batch_id, ids) = seed(&store, &["a.pdf", "b.pdf", "c.pdf"]).await;
        store.try_claim(ids[0], WorkerId::new()).await.unwrap().unwrap();

        let swept = store.cancel_batch(batch_id).await.unwrap();
        assert_eq!(swept, Some(2));

        let batch = store.get_batch(batch_id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Cancelled);
        assert_eq!(batch.cancelled_count, 2);

        // The running item is untouched.
        let running = store
            .list_items(batch_id, Some(ItemStatusKind::Running))
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].item_id, ids[0]);

        // A second cancel is not applicable and changes nothing.
        assert_eq!(store.cancel_batch(batch_id).await.unwrap(), None);
        let batch = store.get_batch(batch_id).await.unwrap();
        assert_eq!(batch.cancelled_count, 2);
    }

    #[rstest]
    #[tokio::test]
    async fn test_running_older_than_uses_cutoff(store: InMemoryStateStore) {
        let (_, ids) = seed(&store, &["a.pdf"]).await;
        let running = store
            .try_claim(ids[0], WorkerId::new())
            .await
            .unwrap()
            .unwrap();

        let before_start = running.state.started_at - chrono::Duration::seconds(1);
        assert!(store.running_older_than(before_start).await.unwrap().is_empty());

        let after_start = running.state.started_at + chrono::Duration::seconds(1);
        let expired = store.running_older_than(after_start).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].data.id, ids[0]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_list_items_filters_by_status(store: InMemoryStateStore) {
        let (batch_id, ids) = seed(&store, &["a.pdf", "b.pdf"]).await;
        store.try_claim(ids[0], WorkerId::new()).await.unwrap().unwrap();

        let all = store.list_items(batch_id, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let pending = store
            .list_items(batch_id, Some(ItemStatusKind::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].item_id, ids[1]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_delete_batch_is_idempotent(store: InMemoryStateStore) {
        let (batch_id, _) = seed(&store, &["a.pdf"]).await;

        store.delete_batch(batch_id).await.unwrap();
        assert!(matches!(
            store.get_batch(batch_id).await,
            Err(SieveletError::BatchNotFound(_))
        ));
        assert!(store.list_items(batch_id, None).await.unwrap().is_empty());

        // Deleting again is a no-op.
        store.delete_batch(batch_id).await.unwrap();
    }
}

//! Atomic claim of the next work item.
//!
//! The claim is the only way an item enters `Running`: query the oldest
//! pending item, then a conditional pending-to-running update. When the
//! conditional write loses to another claimant, the query is re-run a
//! bounded number of times before giving up, so a claimant never spins.

use crate::batch::{BatchId, BatchStatus, WorkerId};
use crate::error::Result;
use crate::item::{Item, Running};
use crate::store::StateStore;

/// How many times a claimant re-runs the oldest-pending query after losing
/// the conditional update to another claimant.
const CLAIM_ATTEMPTS: usize = 3;

/// Claim the oldest pending item of `batch_id` under `worker_id`'s lease.
///
/// Returns `None` when the batch is not running, the queue is empty, or
/// every attempt lost the race. At any instant, at most one worker observes
/// a given item as its own running claim.
#[tracing::instrument(skip(store), fields(batch_id = %batch_id, worker_id = %worker_id))]
pub async fn claim<S: StateStore + ?Sized>(
    store: &S,
    batch_id: BatchId,
    worker_id: WorkerId,
) -> Result<Option<Item<Running>>> {
    let batch = store.get_batch(batch_id).await?;
    if batch.status != BatchStatus::Running {
        tracing::trace!(status = %batch.status, "batch is not running, nothing to claim");
        return Ok(None);
    }

    for attempt in 0..CLAIM_ATTEMPTS {
        let Some(pending) = store.next_pending(batch_id).await? else {
            return Ok(None);
        };

        match store.try_claim(pending.data.id, worker_id).await? {
            Some(running) => {
                tracing::debug!(
                    item_id = %running.data.id,
                    retry_count = running.state.retry_count,
                    "claimed item"
                );
                return Ok(Some(running));
            }
            None => {
                tracing::trace!(
                    item_id = %pending.data.id,
                    attempt,
                    "lost the claim race, re-querying"
                );
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Batch, FileRef, ItemId, OwnerId};
    use crate::item::{ItemData, Pending};
    use crate::store::memory::InMemoryStateStore;

    async fn seed(names: &[&str]) -> (InMemoryStateStore, BatchId, Vec<ItemId>) {
        let store = InMemoryStateStore::new();
        let batch_id = BatchId::new();
        let items: Vec<Item<Pending>> = names
            .iter()
            .map(|name| {
                Item::queued(ItemData {
                    id: ItemId::new(),
                    batch_id,
                    filename: name.to_string(),
                    file_ref: FileRef(format!("{}/{}", batch_id, name)),
                    file_hash: format!("hash-{name}"),
                    max_retries: 3,
                })
            })
            .collect();
        let ids = items.iter().map(|i| i.data.id).collect();
        let batch = Batch::open(
            batch_id,
            OwnerId::from("owner"),
            "Job description".to_string(),
            names.len() as u64,
            0,
        );
        store.insert_batch(batch, items).await.unwrap();
        (store, batch_id, ids)
    }

    #[tokio::test]
    async fn test_claim_returns_items_in_fifo_order() {
        let (store, batch_id, ids) = seed(&["a.pdf", "b.pdf"]).await;
        let worker = WorkerId::new();

        let first = claim(&store, batch_id, worker).await.unwrap().unwrap();
        assert_eq!(first.data.id, ids[0]);
        assert_eq!(first.state.worker_id, worker);

        let second = claim(&store, batch_id, worker).await.unwrap().unwrap();
        assert_eq!(second.data.id, ids[1]);

        assert!(claim(&store, batch_id, worker).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_refuses_non_running_batch() {
        let (store, batch_id, _) = seed(&["a.pdf"]).await;
        store
            .set_status_if(batch_id, BatchStatus::Running, BatchStatus::Paused)
            .await
            .unwrap();

        let claimed = claim(&store, batch_id, WorkerId::new()).await.unwrap();
        assert!(claimed.is_none());

        // The item is still pending for a later resume.
        assert!(store.next_pending(batch_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_two_claimants_get_disjoint_items() {
        let (store, batch_id, ids) = seed(&["a.pdf", "b.pdf"]).await;

        let w1 = WorkerId::new();
        let w2 = WorkerId::new();
        let (first, second) = tokio::join!(
            claim(&store, batch_id, w1),
            claim(&store, batch_id, w2)
        );
        let first = first.unwrap().unwrap();
        let second = second.unwrap().unwrap();

        assert_ne!(first.data.id, second.data.id);
        assert!(ids.contains(&first.data.id));
        assert!(ids.contains(&second.data.id));
    }
}

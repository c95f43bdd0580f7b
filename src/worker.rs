//! The per-batch worker loop: claim, analyze, commit, re-trigger.
//!
//! One worker per batch is the default deployment, which keeps analyzer
//! traffic sequential per batch. Running more workers against the same batch
//! stays correct because the claim and every outcome write are conditional;
//! the loop never takes an in-process lock.

use std::sync::Arc;

use crate::batch::{BatchCounter, BatchId, WorkerId};
use crate::claim;
use crate::completion;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::item::{Item, RetryOutcome, Running};
use crate::store::StateStore;
use crate::Analyzer;
use crate::Verdict;

/// A worker loop bound to one batch.
pub struct Worker<S, A>
where
    S: StateStore,
    A: Analyzer,
{
    worker_id: WorkerId,
    batch_id: BatchId,
    store: Arc<S>,
    analyzer: Arc<A>,
    config: EngineConfig,
}

impl<S, A> Worker<S, A>
where
    S: StateStore + 'static,
    A: Analyzer + 'static,
{
    /// Create a worker with a fresh identity.
    pub fn new(batch_id: BatchId, store: Arc<S>, analyzer: Arc<A>, config: EngineConfig) -> Self {
        Self {
            worker_id: WorkerId::new(),
            batch_id,
            store,
            analyzer,
            config,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Run until the batch has no claimable work.
    ///
    /// When the claim comes back empty the loop performs the completion
    /// recomputation and exits; a later `resume` schedules a new loop. An
    /// accounting violation propagates out after the batch has been frozen.
    #[tracing::instrument(skip(self), fields(batch_id = %self.batch_id, worker_id = %self.worker_id))]
    pub async fn run(self) -> Result<()> {
        tracing::info!("worker starting");

        // The job description is immutable after creation, so one read
        // serves every item this loop processes.
        let job_description = self.store.get_batch(self.batch_id).await?.job_description;

        loop {
            let Some(item) =
                claim::claim(self.store.as_ref(), self.batch_id, self.worker_id).await?
            else {
                completion::settle_if_complete(self.store.as_ref(), self.batch_id).await?;
                tracing::info!("no claimable work, worker exiting");
                return Ok(());
            };

            if let Some(backoff) = self.process(item, &job_description).await? {
                tracing::debug!(backoff_ms = backoff.as_millis() as u64, "backing off before next claim");
                tokio::time::sleep(backoff).await;
            }

            // Stay cooperative between items even when the analyzer and the
            // store return without suspending.
            tokio::task::yield_now().await;
        }
    }

    /// Execute one claimed item and commit its outcome.
    ///
    /// Returns the backoff to observe before the next claim when the item
    /// was requeued after a transient failure.
    async fn process(
        &self,
        item: Item<Running>,
        job_description: &str,
    ) -> Result<Option<std::time::Duration>> {
        let item_id = item.data.id;
        let retry_count = item.state.retry_count;
        tracing::info!(
            item_id = %item_id,
            filename = %item.data.filename,
            retry_count,
            "analyzing item"
        );

        let verdict = self
            .analyzer
            .analyze(&item.data.file_ref, job_description)
            .await;

        match verdict {
            Verdict::Ok(result) => {
                match item.complete(result, self.store.as_ref()).await? {
                    Some(_) => {
                        tracing::info!(item_id = %item_id, "item complete");
                        self.store
                            .bump_counter(self.batch_id, BatchCounter::Completed)
                            .await?;
                        completion::settle_if_complete(self.store.as_ref(), self.batch_id).await?;
                    }
                    None => self.log_lost_lease(item_id),
                }
                Ok(None)
            }
            Verdict::Permanent(error) => {
                tracing::warn!(item_id = %item_id, code = %error.code, "permanent analyzer failure");
                match item.fail(error, self.store.as_ref()).await? {
                    Some(_) => {
                        self.store
                            .bump_counter(self.batch_id, BatchCounter::Failed)
                            .await?;
                        completion::settle_if_complete(self.store.as_ref(), self.batch_id).await?;
                    }
                    None => self.log_lost_lease(item_id),
                }
                Ok(None)
            }
            Verdict::Transient(error) => {
                tracing::warn!(
                    item_id = %item_id,
                    code = %error.code,
                    retry_count,
                    "transient analyzer failure"
                );
                match item.retry_or_fail(error, self.store.as_ref()).await? {
                    Some(RetryOutcome::Requeued(pending)) => {
                        Ok(Some(self.config.backoff_for(pending.state.retry_count)))
                    }
                    Some(RetryOutcome::Exhausted(_)) => {
                        self.store
                            .bump_counter(self.batch_id, BatchCounter::Failed)
                            .await?;
                        completion::settle_if_complete(self.store.as_ref(), self.batch_id).await?;
                        Ok(None)
                    }
                    None => {
                        self.log_lost_lease(item_id);
                        Ok(None)
                    }
                }
            }
        }
    }

    fn log_lost_lease(&self, item_id: crate::batch::ItemId) {
        // The watchdog reclaimed the lease mid-call; the fresher attempt owns
        // the slot and its counters, so this outcome is simply dropped.
        tracing::warn!(item_id = %item_id, "lease no longer held, outcome discarded");
    }
}

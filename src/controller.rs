//! Batch lifecycle control: create, pause/resume/cancel, teardown, and
//! snapshots.
//!
//! Gateways are injected as values, so tests substitute in-memory fakes for
//! the state store, the object store, and the analyzer. Every operation is
//! authorized against the batch's owner.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::batch::{
    Batch, BatchId, BatchStatus, CandidateFile, ControlAction, ControlOutcome, ItemId, OwnerId,
};
use crate::config::EngineConfig;
use crate::error::{Result, SieveletError};
use crate::hash::content_hash;
use crate::item::{Item, ItemData, ItemSnapshot, ItemStatusKind};
use crate::object_store::ObjectStore;
use crate::store::StateStore;
use crate::watchdog::Watchdog;
use crate::worker::Worker;
use crate::Analyzer;

/// Front door for batch operations.
pub struct BatchController<S, O, A>
where
    S: StateStore,
    O: ObjectStore,
    A: Analyzer,
{
    store: Arc<S>,
    objects: Arc<O>,
    analyzer: Arc<A>,
    config: EngineConfig,
}

impl<S, O, A> BatchController<S, O, A>
where
    S: StateStore + 'static,
    O: ObjectStore + 'static,
    A: Analyzer + 'static,
{
    pub fn new(store: Arc<S>, objects: Arc<O>, analyzer: Arc<A>, config: EngineConfig) -> Self {
        Self {
            store,
            objects,
            analyzer,
            config,
        }
    }

    /// Create a batch: hash and deduplicate the files, upload the accepted
    /// bytes, write the batch and item records atomically, and schedule one
    /// worker loop.
    ///
    /// On any failure no batch record becomes visible and uploaded bytes are
    /// released.
    #[tracing::instrument(skip(self, job_description, files), fields(owner = %owner, submitted = files.len()))]
    pub async fn create_batch(
        &self,
        owner: &OwnerId,
        job_description: &str,
        files: Vec<CandidateFile>,
    ) -> Result<BatchId> {
        if job_description.trim().is_empty() {
            return Err(SieveletError::Validation(
                "job description must not be empty".to_string(),
            ));
        }
        if files.is_empty() {
            return Err(SieveletError::Validation(
                "a batch needs at least one file".to_string(),
            ));
        }

        let batch_id = BatchId::new();

        let mut seen = HashSet::new();
        let mut skipped = 0u64;
        let mut accepted = Vec::with_capacity(files.len());
        for file in files {
            if file.bytes.is_empty() {
                return Err(SieveletError::Validation(format!(
                    "file {} has an empty byte stream",
                    file.filename
                )));
            }
            let digest = content_hash(&file.bytes);
            if !seen.insert(digest.clone()) {
                tracing::debug!(filename = %file.filename, "duplicate content, skipping");
                skipped += 1;
                continue;
            }
            accepted.push((file, digest));
        }

        let mut items = Vec::with_capacity(accepted.len());
        for (file, digest) in accepted {
            let item_id = ItemId::new();
            let file_ref = match self
                .objects
                .put(batch_id, item_id, &file.filename, &file.bytes)
                .await
            {
                Ok(file_ref) => file_ref,
                Err(e) => {
                    tracing::error!(
                        batch_id = %batch_id,
                        filename = %file.filename,
                        error = %e,
                        "upload failed, aborting batch creation"
                    );
                    self.release_uploads(batch_id).await;
                    return Err(e);
                }
            };
            items.push(Item::queued(ItemData {
                id: item_id,
                batch_id,
                filename: file.filename,
                file_ref,
                file_hash: digest,
                max_retries: self.config.max_retries,
            }));
        }

        let total = items.len() as u64;
        let batch = Batch::open(
            batch_id,
            owner.clone(),
            job_description.to_string(),
            total,
            skipped,
        );
        if let Err(e) = self.store.insert_batch(batch, items).await {
            self.release_uploads(batch_id).await;
            return Err(e);
        }

        if total == 0 {
            // Nothing to run; the batch closes on the spot.
            self.store
                .set_status_if(batch_id, BatchStatus::Running, BatchStatus::Complete)
                .await?;
        } else {
            self.spawn_worker(batch_id);
        }

        tracing::info!(
            batch_id = %batch_id,
            total,
            skipped_duplicates = skipped,
            "batch created"
        );
        Ok(batch_id)
    }

    /// Apply a pause, resume, or cancel. Transitions outside the legal table
    /// are no-ops reported as `NotApplicable`.
    #[tracing::instrument(skip(self), fields(owner = %owner, batch_id = %batch_id))]
    pub async fn control_batch(
        &self,
        owner: &OwnerId,
        batch_id: BatchId,
        action: ControlAction,
    ) -> Result<ControlOutcome> {
        self.authorized(owner, batch_id).await?;

        let outcome = match action {
            ControlAction::Pause => {
                if self
                    .store
                    .set_status_if(batch_id, BatchStatus::Running, BatchStatus::Paused)
                    .await?
                {
                    tracing::info!("batch paused");
                    ControlOutcome::Applied
                } else {
                    ControlOutcome::NotApplicable
                }
            }
            ControlAction::Resume => {
                if self
                    .store
                    .set_status_if(batch_id, BatchStatus::Paused, BatchStatus::Running)
                    .await?
                {
                    tracing::info!("batch resumed");
                    self.spawn_worker(batch_id);
                    ControlOutcome::Applied
                } else {
                    ControlOutcome::NotApplicable
                }
            }
            ControlAction::Cancel => match self.store.cancel_batch(batch_id).await? {
                Some(swept) => {
                    tracing::info!(swept, "batch cancelled, pending items swept");
                    ControlOutcome::Applied
                }
                None => ControlOutcome::NotApplicable,
            },
        };
        Ok(outcome)
    }

    /// Snapshot of the batch record.
    pub async fn get_batch(&self, owner: &OwnerId, batch_id: BatchId) -> Result<Batch> {
        self.authorized(owner, batch_id).await
    }

    /// Item snapshots in queue order, optionally filtered by status.
    pub async fn list_items(
        &self,
        owner: &OwnerId,
        batch_id: BatchId,
        filter: Option<ItemStatusKind>,
    ) -> Result<Vec<ItemSnapshot>> {
        self.authorized(owner, batch_id).await?;
        self.store.list_items(batch_id, filter).await
    }

    /// Delete the items, the batch record, and finally the object-store
    /// prefix. Refused for running batches; otherwise idempotent, including
    /// after a partially completed earlier teardown.
    #[tracing::instrument(skip(self), fields(owner = %owner, batch_id = %batch_id))]
    pub async fn teardown_batch(&self, owner: &OwnerId, batch_id: BatchId) -> Result<()> {
        match self.store.get_batch(batch_id).await {
            Ok(batch) => {
                if batch.owner_id != *owner {
                    return Err(SieveletError::PermissionDenied(batch_id));
                }
                if batch.status == BatchStatus::Running {
                    return Err(SieveletError::IllegalTransition {
                        batch: batch_id,
                        status: batch.status,
                    });
                }
                self.store.delete_batch(batch_id).await?;
            }
            // A retried teardown may find the records already gone; finish
            // the object cleanup anyway.
            Err(SieveletError::BatchNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.objects.delete_all(batch_id).await?;
        tracing::info!("batch torn down");
        Ok(())
    }

    /// Schedule one worker loop for the batch. The default deployment runs a
    /// single loop per batch; extra loops stay correct because the claim is
    /// atomic.
    pub fn spawn_worker(&self, batch_id: BatchId) -> JoinHandle<Result<()>> {
        let worker = Worker::new(
            batch_id,
            self.store.clone(),
            self.analyzer.clone(),
            self.config.clone(),
        );
        tokio::spawn(async move {
            let result = worker.run().await;
            if let Err(e) = &result {
                tracing::error!(batch_id = %batch_id, error = %e, "worker loop halted");
            }
            result
        })
    }

    /// Schedule the periodic lease-expiry sweep.
    pub fn spawn_watchdog(&self) -> JoinHandle<Result<()>> {
        let watchdog = Watchdog::new(self.store.clone(), self.config.clone());
        tokio::spawn(async move {
            let result = watchdog.run().await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "watchdog halted");
            }
            result
        })
    }

    async fn authorized(&self, owner: &OwnerId, batch_id: BatchId) -> Result<Batch> {
        let batch = self.store.get_batch(batch_id).await?;
        if batch.owner_id != *owner {
            return Err(SieveletError::PermissionDenied(batch_id));
        }
        Ok(batch)
    }

    async fn release_uploads(&self, batch_id: BatchId) {
        if let Err(e) = self.objects.delete_all(batch_id).await {
            tracing::error!(
                batch_id = %batch_id,
                error = %e,
                "cleanup after failed batch creation also failed"
            );
        }
    }
}

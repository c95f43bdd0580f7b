//! Monotonic batch-completion accounting.
//!
//! Every terminal item transition is followed by this recomputation. The
//! running-to-complete flip is a conditional write, so it is recorded exactly
//! once no matter how many workers or watchdog ticks re-evaluate it, and a
//! cancelled batch is never overwritten back to complete.

use crate::batch::{BatchId, BatchStatus};
use crate::error::{Result, SieveletError};
use crate::store::StateStore;

/// Re-evaluate whether `batch_id` has settled every accepted slot and close
/// it if so. Returns `true` when this call performed the flip to complete.
///
/// Counters past `total` mean a slot was accounted twice. That violation is
/// not recoverable by the engine: the batch is frozen to `paused` for an
/// operator and an error is returned, which halts the calling worker loop.
pub async fn settle_if_complete<S: StateStore + ?Sized>(
    store: &S,
    batch_id: BatchId,
) -> Result<bool> {
    let batch = store.get_batch(batch_id).await?;

    if batch.counters_overflowed() {
        let detail = format!(
            "completed {} + failed {} + cancelled {} > total {}",
            batch.completed, batch.failed, batch.cancelled_count, batch.total
        );
        tracing::error!(batch_id = %batch_id, %detail, "completion counters overflowed, freezing batch");
        store
            .set_status_if(batch_id, BatchStatus::Running, BatchStatus::Paused)
            .await?;
        return Err(SieveletError::InvariantViolation {
            batch: batch_id,
            detail,
        });
    }

    if !batch.is_settled() {
        return Ok(false);
    }

    let flipped = store
        .set_status_if(batch_id, BatchStatus::Running, BatchStatus::Complete)
        .await?;
    if flipped {
        tracing::info!(
            batch_id = %batch_id,
            completed = batch.completed,
            failed = batch.failed,
            cancelled = batch.cancelled_count,
            skipped_duplicates = batch.skipped_duplicates,
            "batch complete"
        );
    }
    Ok(flipped)
}

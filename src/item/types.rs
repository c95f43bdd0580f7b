//! Core types for the per-item lifecycle.
//!
//! This module defines the type-safe item lifecycle using the typestate
//! pattern. Each item progresses through distinct states, enforced at compile
//! time; the store enforces the runtime half (lease predicates) when a
//! transition is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::{BatchId, FileRef, ItemId, WorkerId};

/// Marker trait for valid item states.
///
/// This trait enables the typestate pattern, ensuring that operations are
/// only performed on items in valid states.
pub trait ItemState: Send + Sync {}

/// One candidate document inside a batch; the unit of work.
///
/// Uses the typestate pattern to ensure type-safe state transitions. The
/// generic parameter `T` represents the current state of the item.
#[derive(Debug, Clone)]
pub struct Item<T: ItemState> {
    /// The current state of the item.
    pub state: T,
    /// The immutable facts about the item, fixed at batch creation.
    pub data: ItemData,
}

/// Immutable item facts, fixed when the batch is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemData {
    pub id: ItemId,
    pub batch_id: BatchId,

    /// Original filename, kept for snapshots and the object-store key.
    pub filename: String,

    /// Opaque reference handed to the analyzer.
    pub file_ref: FileRef,

    /// Content digest used for intra-batch duplicate suppression.
    pub file_hash: String,

    /// Retry ceiling for this item. `retry_count` counts failed attempts, so
    /// an item gets up to `max_retries + 1` attempts in total.
    pub max_retries: u32,
}

/// Structured error recorded on a failed item, or on a pending item awaiting
/// its next attempt after a transient failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub code: String,
    pub message: String,
}

impl ItemError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ItemError {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The error the watchdog records when a lease expires.
    pub fn timeout() -> Self {
        ItemError::new(
            "timeout",
            "lease expired before the worker reported an outcome",
        )
    }
}

// ============================================================================
// Item States
// ============================================================================

/// Item is waiting to be claimed.
///
/// This is the initial state for all items, and the state a transiently
/// failed item returns to while it still has retries left.
#[derive(Debug, Clone)]
pub struct Pending {
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Error from the most recent transient failure, if any.
    pub error: Option<ItemError>,
}

impl ItemState for Pending {}

/// Item is claimed by a worker and the analyzer call is (or is about to be)
/// in flight. `worker_id` and `started_at` together form the lease.
#[derive(Debug, Clone)]
pub struct Running {
    pub worker_id: WorkerId,
    pub started_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl ItemState for Running {}

/// Analyzer returned a result; the slot is settled.
#[derive(Debug, Clone)]
pub struct Complete {
    /// Structured analyzer output, stored verbatim and never interpreted.
    pub result: serde_json::Value,
    pub completed_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl ItemState for Complete {}

/// Item failed permanently, or exhausted its transient retries.
#[derive(Debug, Clone)]
pub struct Failed {
    pub error: ItemError,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl ItemState for Failed {}

/// Item was swept when its batch was cancelled while it was still pending.
#[derive(Debug, Clone)]
pub struct Cancelled {
    pub cancelled_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl ItemState for Cancelled {}

/// The lease a running item holds. Every write that moves an item out of
/// `Running` is predicated on the stored lease still matching, so a stale
/// worker whose claim the watchdog already reclaimed can never overwrite a
/// fresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub worker_id: WorkerId,
    pub started_at: DateTime<Utc>,
}

impl Item<Running> {
    /// The lease this running item holds.
    pub fn lease(&self) -> Lease {
        Lease {
            worker_id: self.state.worker_id,
            started_at: self.state.started_at,
        }
    }
}

// ============================================================================
// Unified Item Representation
// ============================================================================

/// Enum that can hold an item in any state.
///
/// This is used for storage and snapshots where items must be handled
/// uniformly regardless of their current state.
#[derive(Debug, Clone)]
pub enum AnyItem {
    Pending(Item<Pending>),
    Running(Item<Running>),
    Complete(Item<Complete>),
    Failed(Item<Failed>),
    Cancelled(Item<Cancelled>),
}

impl AnyItem {
    /// Get the item ID regardless of state.
    pub fn id(&self) -> ItemId {
        self.data().id
    }

    /// Get the owning batch regardless of state.
    pub fn batch_id(&self) -> BatchId {
        self.data().batch_id
    }

    pub fn data(&self) -> &ItemData {
        match self {
            AnyItem::Pending(i) => &i.data,
            AnyItem::Running(i) => &i.data,
            AnyItem::Complete(i) => &i.data,
            AnyItem::Failed(i) => &i.data,
            AnyItem::Cancelled(i) => &i.data,
        }
    }

    /// Failed attempts recorded so far.
    pub fn retry_count(&self) -> u32 {
        match self {
            AnyItem::Pending(i) => i.state.retry_count,
            AnyItem::Running(i) => i.state.retry_count,
            AnyItem::Complete(i) => i.state.retry_count,
            AnyItem::Failed(i) => i.state.retry_count,
            AnyItem::Cancelled(i) => i.state.retry_count,
        }
    }

    pub fn status(&self) -> ItemStatusKind {
        match self {
            AnyItem::Pending(_) => ItemStatusKind::Pending,
            AnyItem::Running(_) => ItemStatusKind::Running,
            AnyItem::Complete(_) => ItemStatusKind::Complete,
            AnyItem::Failed(_) => ItemStatusKind::Failed,
            AnyItem::Cancelled(_) => ItemStatusKind::Cancelled,
        }
    }

    /// Check if this item is in the Pending state.
    pub fn is_pending(&self) -> bool {
        matches!(self, AnyItem::Pending(_))
    }

    /// Check if this item is in a terminal state (complete, failed, or
    /// cancelled). Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnyItem::Complete(_) | AnyItem::Failed(_) | AnyItem::Cancelled(_)
        )
    }

    /// Try to extract as a pending item.
    pub fn as_pending(&self) -> Option<&Item<Pending>> {
        match self {
            AnyItem::Pending(i) => Some(i),
            _ => None,
        }
    }

    /// Try to extract as a running item.
    pub fn as_running(&self) -> Option<&Item<Running>> {
        match self {
            AnyItem::Running(i) => Some(i),
            _ => None,
        }
    }
}

impl From<Item<Pending>> for AnyItem {
    fn from(i: Item<Pending>) -> Self {
        AnyItem::Pending(i)
    }
}

impl From<Item<Running>> for AnyItem {
    fn from(i: Item<Running>) -> Self {
        AnyItem::Running(i)
    }
}

impl From<Item<Complete>> for AnyItem {
    fn from(i: Item<Complete>) -> Self {
        AnyItem::Complete(i)
    }
}

impl From<Item<Failed>> for AnyItem {
    fn from(i: Item<Failed>) -> Self {
        AnyItem::Failed(i)
    }
}

impl From<Item<Cancelled>> for AnyItem {
    fn from(i: Item<Cancelled>) -> Self {
        AnyItem::Cancelled(i)
    }
}

/// Status discriminant, used for snapshots and list filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatusKind {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ItemStatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatusKind::Pending => "pending",
            ItemStatusKind::Running => "running",
            ItemStatusKind::Complete => "complete",
            ItemStatusKind::Failed => "failed",
            ItemStatusKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Flat read-model of an item, matching the logical store schema. This is
/// what `list_items` returns and what observers poll.
#[derive(Debug, Clone, Serialize)]
pub struct ItemSnapshot {
    pub item_id: ItemId,
    pub batch_id: BatchId,
    pub filename: String,
    pub file_ref: FileRef,
    pub file_hash: String,
    pub status: ItemStatusKind,
    pub worker_id: Option<WorkerId>,
    pub start_time: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<ItemError>,
}

impl ItemSnapshot {
    pub fn new(item: &AnyItem, last_updated_at: DateTime<Utc>) -> Self {
        let data = item.data();
        let mut snapshot = ItemSnapshot {
            item_id: data.id,
            batch_id: data.batch_id,
            filename: data.filename.clone(),
            file_ref: data.file_ref.clone(),
            file_hash: data.file_hash.clone(),
            status: item.status(),
            worker_id: None,
            start_time: None,
            last_updated_at,
            retry_count: item.retry_count(),
            max_retries: data.max_retries,
            result: None,
            error: None,
        };
        match item {
            AnyItem::Pending(i) => {
                snapshot.error = i.state.error.clone();
            }
            AnyItem::Running(i) => {
                snapshot.worker_id = Some(i.state.worker_id);
                snapshot.start_time = Some(i.state.started_at);
            }
            AnyItem::Complete(i) => {
                snapshot.result = Some(i.state.result.clone());
            }
            AnyItem::Failed(i) => {
                snapshot.error = Some(i.state.error.clone());
            }
            AnyItem::Cancelled(_) => {}
        }
        snapshot
    }
}

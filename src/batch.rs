//! Batch-level types: identifiers, the batch record, and the control surface.
//!
//! A batch groups the candidate files submitted together against one job
//! description. Items carry the per-file lifecycle (see `item/`); the batch
//! record carries ownership, control status, and the monotonic completion
//! counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    /// Create a new random batch ID.
    pub fn new() -> Self {
        BatchId(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for BatchId {
    fn from(uuid: Uuid) -> Self {
        BatchId(uuid)
    }
}

impl std::ops::Deref for BatchId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Unique identifier for an item within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub Uuid);

impl ItemId {
    /// Create a new random item ID.
    pub fn new() -> Self {
        ItemId(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ItemId {
    fn from(uuid: Uuid) -> Self {
        ItemId(uuid)
    }
}

impl std::ops::Deref for ItemId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Identifier for one incarnation of a worker loop. A fresh one is generated
/// every time a loop starts, so a revived item can never be written to by the
/// worker that previously abandoned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    /// Create a new random worker ID.
    pub fn new() -> Self {
        WorkerId(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for WorkerId {
    fn from(uuid: Uuid) -> Self {
        WorkerId(uuid)
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Opaque owner identity. Scopes batch visibility and control authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        OwnerId(s.to_string())
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to uploaded file bytes, produced by the object store and
/// handed verbatim to the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileRef(pub String);

impl FileRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The control status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Paused,
    Cancelled,
    Complete,
}

impl BatchStatus {
    /// Check if this status is terminal (cancelled or complete).
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Cancelled | BatchStatus::Complete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Running => "running",
            BatchStatus::Paused => "paused",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Complete => "complete",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch counters a worker or watchdog may increment after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchCounter {
    Completed,
    Failed,
    CancelledCount,
}

/// The authoritative batch record.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: BatchId,
    pub owner_id: OwnerId,
    pub status: BatchStatus,
    pub job_description: String,

    /// Item slots accepted into the batch. Excludes intra-batch duplicates
    /// skipped at creation time.
    pub total: u64,

    pub completed: u64,
    pub failed: u64,
    pub cancelled_count: u64,
    pub skipped_duplicates: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// A freshly created batch, open for claiming.
    pub fn open(
        id: BatchId,
        owner_id: OwnerId,
        job_description: String,
        total: u64,
        skipped_duplicates: u64,
    ) -> Self {
        let now = Utc::now();
        Batch {
            id,
            owner_id,
            status: BatchStatus::Running,
            job_description,
            total,
            completed: 0,
            failed: 0,
            cancelled_count: 0,
            skipped_duplicates,
            created_at: now,
            updated_at: now,
        }
    }

    /// Item slots accounted as settled so far.
    pub fn settled_count(&self) -> u64 {
        self.completed + self.failed + self.cancelled_count
    }

    /// Check if every accepted slot has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.settled_count() == self.total
    }

    /// Counters past `total` mean an item was accounted twice.
    pub fn counters_overflowed(&self) -> bool {
        self.settled_count() > self.total
    }
}

/// Control actions a batch owner may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Pause,
    Resume,
    Cancel,
}

/// Outcome of a control action. Transitions outside the legal table are
/// no-ops reported as `NotApplicable`, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlOutcome {
    Applied,
    NotApplicable,
}

/// One uploaded candidate file, as submitted to `create_batch`.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

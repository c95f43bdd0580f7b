//! Durable batch execution engine for resume screening.
//!
//! This crate turns an uploaded set of candidate files into a pool of work
//! items, claims them one at a time from a persistent queue, runs a single
//! expensive analysis call per item with bounded retries, recovers items
//! abandoned by dead workers, and exposes pause/resume/cancel control over
//! an entire batch:
//! - Items move through a type-safe lifecycle; every write out of `running`
//!   is predicated on the worker's lease
//! - A worker loop per batch claims, analyzes, commits, and re-triggers
//!   itself until the batch settles
//! - A watchdog sweep revives items whose lease expired
//! - Observers poll persisted batch and item snapshots
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use sievelet::{
//!     BatchController, CandidateFile, EngineConfig, HttpAnalyzer, InMemoryStateStore,
//!     LocalObjectStore, OwnerId,
//! };
//!
//! let config = EngineConfig::from_env()?;
//! let controller = BatchController::new(
//!     Arc::new(InMemoryStateStore::new()),
//!     Arc::new(LocalObjectStore::new(&config.storage_bucket)),
//!     Arc::new(HttpAnalyzer::new(endpoint, api_key, config.analyzer_timeout_ms)),
//!     config,
//! );
//!
//! // Ingest a batch; a worker loop is scheduled automatically.
//! let batch_id = controller.create_batch(&owner, &job_description, files).await?;
//!
//! // Observe progress by polling persisted state.
//! let batch = controller.get_batch(&owner, batch_id).await?;
//! let items = controller.list_items(&owner, batch_id, None).await?;
//! ```

pub mod analyzer;
pub mod batch;
pub mod claim;
pub mod completion;
pub mod config;
pub mod controller;
pub mod error;
pub mod hash;
pub mod item;
pub mod object_store;
pub mod store;
pub mod watchdog;
pub mod worker;

// Re-export commonly used types
pub use analyzer::{Analyzer, HttpAnalyzer, MockAnalyzer, Verdict};
pub use batch::{
    Batch, BatchCounter, BatchId, BatchStatus, CandidateFile, ControlAction, ControlOutcome,
    FileRef, ItemId, OwnerId, WorkerId,
};
pub use config::EngineConfig;
pub use controller::BatchController;
pub use error::{Result, SieveletError};
pub use hash::content_hash;
pub use item::*;
pub use object_store::{InMemoryObjectStore, LocalObjectStore, ObjectStore};
pub use store::memory::InMemoryStateStore;
pub use store::StateStore;
pub use watchdog::Watchdog;
pub use worker::Worker;

//! Storage traits and error types
//!
//! This module defines the trait interface for frontier backends and the
//! associated error types.

use crate::config::StrategyKind;
use crate::state::EntryState;
use crate::storage::{FrontierCounts, FrontierEntry, RunRecord, RunStatus, RunTotals};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid state transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: EntryState,
        to: EntryState,
    },

    #[error("Frontier entry not found: {0}")]
    EntryNotFound(i64),

    #[error("Frontier lock poisoned")]
    Poisoned,

    #[error("Task is held by invocation {0}")]
    Locked(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for frontier backend implementations
///
/// Every method is one transaction: a caller never observes an entry half
/// way between two states.
pub trait FrontierStore {
    // ===== Frontier =====

    /// Queues a URL unless its normalized key is already known
    ///
    /// Returns false for duplicates, which are not an error.
    fn enqueue(&mut self, url: &str) -> StorageResult<bool>;

    /// Moves the oldest Pending entry to Claimed
    ///
    /// Returns None when nothing is Pending; that does not imply drained,
    /// other entries may still be Claimed.
    fn claim_next(&mut self, claimed_by: &str) -> StorageResult<Option<FrontierEntry>>;

    /// Moves a claimed entry to Done and records it as visited
    ///
    /// When `accepted` is true and the accepted counter is below the accept
    /// limit, the counter is incremented. Returns whether it was.
    fn mark_done(&mut self, entry: &FrontierEntry, accepted: bool) -> StorageResult<bool>;

    /// Returns the caller's own claim to Pending without processing it
    ///
    /// Returns false if the claim is no longer current.
    fn release_claim(&mut self, entry: &FrontierEntry) -> StorageResult<bool>;

    /// Returns a claim older than `threshold` to Pending
    fn requeue_stuck(&mut self, entry: &FrontierEntry, threshold: Duration)
        -> StorageResult<bool>;

    /// Entries claimed longer than `threshold`
    fn stuck_entries(&self, threshold: Duration) -> StorageResult<Vec<FrontierEntry>>;

    /// Returns true once no entry is Pending or Claimed
    fn is_drained(&self) -> StorageResult<bool>;

    /// Returns true if a normalized key has been processed
    fn is_visited(&self, normalized_key: &str) -> StorageResult<bool>;

    // ===== Counters =====

    fn accepted_count(&self) -> StorageResult<u64>;

    /// Hands out the next output sequence number (starting at 1)
    fn next_sequence(&mut self) -> StorageResult<u64>;

    fn counts(&self) -> StorageResult<FrontierCounts>;

    /// Cheap query touching every table the crawl depends on
    fn health_check(&self) -> StorageResult<()>;

    // ===== Run Management =====

    fn create_run(&mut self, strategy: StrategyKind, config_hash: &str) -> StorageResult<i64>;

    fn finish_run(&mut self, run_id: i64, status: RunStatus, totals: RunTotals)
        -> StorageResult<()>;

    /// Most recent runs first
    fn latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    // ===== Invocation Lock =====

    /// Takes the task for `run_key`
    ///
    /// Fails with `Locked` while another key's heartbeat is younger than
    /// `stale_after`. On success, claims left behind by other invocations are
    /// returned to Pending; the number released is returned.
    fn acquire_lock(&mut self, run_key: &str, stale_after: Duration) -> StorageResult<usize>;

    /// Refreshes the lock; false if `run_key` no longer holds it
    fn heartbeat(&mut self, run_key: &str) -> StorageResult<bool>;

    fn release_lock(&mut self, run_key: &str) -> StorageResult<()>;
}

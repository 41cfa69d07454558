//! Storage module for the crawl frontier
//!
//! This module handles all database operations for a task, including:
//! - SQLite database initialization and schema management
//! - The URL frontier and its Pending / Claimed / Done lifecycle
//! - The visited set and the capped accepted counter
//! - Output sequence numbers
//! - Run tracking and the per-task invocation lock

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteFrontier;
pub use traits::{FrontierStore, StorageError, StorageResult};

use crate::config::StrategyKind;
use crate::state::EntryState;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Represents one URL in the frontier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub id: i64,
    pub url: String,
    pub normalized_key: String,
    pub state: EntryState,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    /// Number of times the entry has been claimed; identifies the current claim
    pub attempts: u32,
}

/// Snapshot of the frontier's size by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierCounts {
    pub pending: u64,
    pub claimed: u64,
    pub done: u64,
    pub visited: u64,
    pub accepted: u64,
}

/// Counters a crawl run accumulates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    /// Accepted pages produced during the run
    pub strategy_yield: u64,
    /// Entries claimed and processed
    pub dispatched: u64,
    /// Entries whose fetch failed permanently
    pub failed: u64,
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub strategy: StrategyKind,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: RunStatus,
    pub totals: RunTotals,
    pub config_hash: String,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    /// Nothing Pending or Claimed remained
    Drained,
    /// The accepted counter reached the task's cap
    CapReached,
    Cancelled,
    Failed,
}

impl RunStatus {
    /// Returns true for a run that ended on its own (not cancelled or failed)
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Drained | Self::CapReached)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Drained => "drained",
            Self::CapReached => "cap_reached",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "drained" => Some(Self::Drained),
            "cap_reached" => Some(Self::CapReached),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Where a frontier database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontierLocation {
    Path(PathBuf),
    /// Private in-memory database; a reopen starts from an empty frontier
    Memory,
}

/// Shared, thread-safe handle to a task's frontier
///
/// Each call holds the lock for exactly one transaction, so claims and
/// completions from concurrent workers are linearizable. The handle is
/// shared as `Arc<Frontier>` between the dispatch loop, its workers and the
/// watchdog; the lock is never held across an `.await`.
pub struct Frontier {
    store: Mutex<SqliteFrontier>,
    location: FrontierLocation,
    accept_limit: u64,
}

impl Frontier {
    /// Opens the frontier at `location`, creating it if needed
    pub fn open(location: FrontierLocation, accept_limit: u64) -> StorageResult<Self> {
        let store = Self::connect(&location, accept_limit)?;
        Ok(Self {
            store: Mutex::new(store),
            location,
            accept_limit,
        })
    }

    /// Opens a file-backed frontier
    pub fn open_path(path: &Path, accept_limit: u64) -> StorageResult<Self> {
        Self::open(FrontierLocation::Path(path.to_path_buf()), accept_limit)
    }

    /// Opens a private in-memory frontier
    pub fn in_memory(accept_limit: u64) -> StorageResult<Self> {
        Self::open(FrontierLocation::Memory, accept_limit)
    }

    pub fn location(&self) -> &FrontierLocation {
        &self.location
    }

    pub fn accept_limit(&self) -> u64 {
        self.accept_limit
    }

    /// Replaces the connection with a fresh one at the same location
    ///
    /// Used to recover from storage faults. A poisoned lock is recovered
    /// too, since its contents are thrown away.
    pub fn reopen(&self) -> StorageResult<()> {
        let fresh = Self::connect(&self.location, self.accept_limit)?;
        let mut store = self
            .store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *store = fresh;
        Ok(())
    }

    fn connect(location: &FrontierLocation, accept_limit: u64) -> StorageResult<SqliteFrontier> {
        match location {
            FrontierLocation::Path(path) => SqliteFrontier::open(path, accept_limit),
            FrontierLocation::Memory => SqliteFrontier::open_in_memory(accept_limit),
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, SqliteFrontier>> {
        self.store.lock().map_err(|_| StorageError::Poisoned)
    }

    pub fn enqueue(&self, url: &str) -> StorageResult<bool> {
        self.lock()?.enqueue(url)
    }

    pub fn claim_next(&self, claimed_by: &str) -> StorageResult<Option<FrontierEntry>> {
        self.lock()?.claim_next(claimed_by)
    }

    pub fn mark_done(&self, entry: &FrontierEntry, accepted: bool) -> StorageResult<bool> {
        self.lock()?.mark_done(entry, accepted)
    }

    pub fn release_claim(&self, entry: &FrontierEntry) -> StorageResult<bool> {
        self.lock()?.release_claim(entry)
    }

    pub fn requeue_stuck(&self, entry: &FrontierEntry, threshold: Duration) -> StorageResult<bool> {
        self.lock()?.requeue_stuck(entry, threshold)
    }

    pub fn stuck_entries(&self, threshold: Duration) -> StorageResult<Vec<FrontierEntry>> {
        self.lock()?.stuck_entries(threshold)
    }

    pub fn is_drained(&self) -> StorageResult<bool> {
        self.lock()?.is_drained()
    }

    pub fn is_visited(&self, normalized_key: &str) -> StorageResult<bool> {
        self.lock()?.is_visited(normalized_key)
    }

    pub fn accepted_count(&self) -> StorageResult<u64> {
        self.lock()?.accepted_count()
    }

    /// Returns true once the accepted counter has reached the cap
    pub fn cap_reached(&self) -> StorageResult<bool> {
        Ok(self.accepted_count()? >= self.accept_limit)
    }

    pub fn next_sequence(&self) -> StorageResult<u64> {
        self.lock()?.next_sequence()
    }

    pub fn counts(&self) -> StorageResult<FrontierCounts> {
        self.lock()?.counts()
    }

    pub fn health_check(&self) -> StorageResult<()> {
        self.lock()?.health_check()
    }

    pub fn create_run(&self, strategy: StrategyKind, config_hash: &str) -> StorageResult<i64> {
        self.lock()?.create_run(strategy, config_hash)
    }

    pub fn finish_run(&self, run_id: i64, status: RunStatus, totals: RunTotals) -> StorageResult<()> {
        self.lock()?.finish_run(run_id, status, totals)
    }

    pub fn latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        self.lock()?.latest_runs(limit)
    }

    pub fn acquire_lock(&self, run_key: &str, stale_after: Duration) -> StorageResult<usize> {
        self.lock()?.acquire_lock(run_key, stale_after)
    }

    pub fn heartbeat(&self, run_key: &str) -> StorageResult<bool> {
        self.lock()?.heartbeat(run_key)
    }

    pub fn release_lock(&self, run_key: &str) -> StorageResult<()> {
        self.lock()?.release_lock(run_key)
    }

    /// Runs raw SQL; used to simulate storage faults
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> StorageResult<()> {
        self.lock()?.execute_raw(sql)
    }

    /// Direct backend access for tests that need an explicit clock
    #[cfg(test)]
    pub(crate) fn with_store<T>(
        &self,
        op: impl FnOnce(&mut SqliteFrontier) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut store = self.lock()?;
        op(&mut store)
    }
}

impl fmt::Debug for Frontier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frontier")
            .field("location", &self.location)
            .field("accept_limit", &self.accept_limit)
            .finish()
    }
}

//! Stuck-claim watchdog and frontier recovery
//!
//! The watchdog runs beside the dispatch loop for the whole life of a task.
//! Each tick it refreshes the invocation lock heartbeat and returns claims
//! older than the stuck threshold to Pending. Storage faults seen by either
//! the watchdog or the dispatch loop go through [`StorageRecovery`].

use crate::storage::{Frontier, StorageError};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bounded reopen-and-verify recovery of a task's frontier
pub struct StorageRecovery {
    frontier: Arc<Frontier>,
    start_url: String,
    run_key: String,
    stale_after: Duration,
    max_attempts: u32,
    retry_delay: Duration,
    /// Serializes recoveries started by the watchdog and the dispatch loop
    guard: AsyncMutex<()>,
    fatal: OnceLock<String>,
}

impl StorageRecovery {
    pub fn new(
        frontier: Arc<Frontier>,
        start_url: impl Into<String>,
        run_key: impl Into<String>,
        stale_after: Duration,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            frontier,
            start_url: start_url.into(),
            run_key: run_key.into(),
            stale_after,
            max_attempts,
            retry_delay,
            guard: AsyncMutex::new(()),
            fatal: OnceLock::new(),
        }
    }

    /// Returns true once recovery has given up
    pub fn is_fatal(&self) -> bool {
        self.fatal.get().is_some()
    }

    /// The fault that made recovery give up
    pub fn fatal_cause(&self) -> Option<&str> {
        self.fatal.get().map(String::as_str)
    }

    /// Reopens the frontier until it passes a health check
    ///
    /// After a successful reopen of a frontier that has nothing left to
    /// process while the cap is unmet, the start URL is enqueued again so
    /// the crawl can continue. Returns false once `max_attempts` reopens
    /// have failed; the fault is then fatal for the task.
    pub async fn recover(&self, cause: &StorageError) -> bool {
        let _guard = self.guard.lock().await;

        if self.is_fatal() {
            return false;
        }

        // Another caller may have recovered while this one waited
        if self.frontier.health_check().is_ok() {
            debug!("Frontier healthy again, skipping recovery");
            return true;
        }

        warn!("Frontier storage fault: {}; attempting recovery", cause);

        let mut last_error = cause.to_string();
        for attempt in 1..=self.max_attempts {
            match self.reopen() {
                Ok(()) => {
                    info!("Frontier recovered after {} attempt(s)", attempt);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Recovery attempt {}/{} failed: {}",
                        attempt, self.max_attempts, e
                    );
                    last_error = e.to_string();
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
            }
        }

        error!(
            "Giving up on frontier after {} recovery attempts: {}",
            self.max_attempts, last_error
        );
        let _ = self.fatal.set(last_error);
        false
    }

    fn reopen(&self) -> Result<(), StorageError> {
        self.frontier.reopen()?;
        self.frontier.health_check()?;

        match self.frontier.acquire_lock(&self.run_key, self.stale_after) {
            Ok(_) => {}
            Err(StorageError::Locked(holder)) => {
                warn!("Invocation lock now held by {}", holder);
            }
            Err(e) => return Err(e),
        }

        if self.frontier.is_drained()? && !self.frontier.cap_reached()? {
            info!("Frontier lost its work, re-seeding {}", self.start_url);
            self.frontier.enqueue(&self.start_url)?;
        }
        Ok(())
    }
}

/// What one watchdog tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub requeued: usize,
    pub recovered: bool,
}

/// Periodic heartbeat and stuck-claim requeue
pub struct Watchdog {
    frontier: Arc<Frontier>,
    recovery: Arc<StorageRecovery>,
    run_key: String,
    interval: Duration,
    stuck_threshold: Duration,
}

impl Watchdog {
    pub fn new(
        frontier: Arc<Frontier>,
        recovery: Arc<StorageRecovery>,
        run_key: impl Into<String>,
        interval: Duration,
        stuck_threshold: Duration,
    ) -> Self {
        Self {
            frontier,
            recovery,
            run_key: run_key.into(),
            interval,
            stuck_threshold,
        }
    }

    /// Runs one watchdog pass
    pub async fn tick(&self) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        match self.frontier.heartbeat(&self.run_key) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Invocation lock for {} is gone, re-acquiring", self.run_key);
                if let Err(e) = self.frontier.acquire_lock(&self.run_key, self.stuck_threshold) {
                    warn!("Failed to re-acquire invocation lock: {}", e);
                }
            }
            Err(e) => {
                outcome.recovered = self.recovery.recover(&e).await;
                return outcome;
            }
        }

        match self.requeue_stuck() {
            Ok(requeued) => {
                if requeued > 0 {
                    info!("Requeued {} stuck frontier entries", requeued);
                }
                outcome.requeued = requeued;
            }
            Err(e) => {
                outcome.recovered = self.recovery.recover(&e).await;
            }
        }

        outcome
    }

    fn requeue_stuck(&self) -> Result<usize, StorageError> {
        let mut requeued = 0;
        for entry in self.frontier.stuck_entries(self.stuck_threshold)? {
            if self.frontier.requeue_stuck(&entry, self.stuck_threshold)? {
                debug!("Requeued {} (claimed by {:?})", entry.url, entry.claimed_by);
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    /// Starts ticking in the background until the handle is stopped
    pub fn spawn(self) -> WatchdogHandle {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                self.tick().await;
                if self.recovery.is_fatal() {
                    break;
                }
            }
        });
        WatchdogHandle { handle }
    }
}

/// Stops the background watchdog when asked or dropped
pub struct WatchdogHandle {
    handle: JoinHandle<()>,
}

impl WatchdogHandle {
    pub async fn stop(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

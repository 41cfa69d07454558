//! Dispatch loop
//!
//! Claims frontier entries and runs them through the pipeline with at most
//! `concurrency` entries in flight. A run ends when the frontier drains, the
//! accepted cap is reached, the cancel flag is raised, or storage recovery
//! gives up.

use crate::crawler::pipeline::{process_entry, EntryOutcome, RunContext};
use crate::crawler::watchdog::StorageRecovery;
use crate::storage::{RunStatus, RunTotals, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Cooperative stop signal shared by every task of an invocation
///
/// Raising it stops new claims; in-flight entries finish, and entries not
/// yet started go back to Pending.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a single run ended, with its totals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub status: RunStatus,
    pub totals: RunTotals,
}

/// Runs one crawl run over a task's frontier
pub struct Scheduler {
    ctx: Arc<RunContext>,
    recovery: Arc<StorageRecovery>,
    concurrency: usize,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        ctx: Arc<RunContext>,
        recovery: Arc<StorageRecovery>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            ctx,
            recovery,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Dispatches entries until the run reaches a terminal status
    pub async fn run(&self) -> RunSummary {
        let mut in_flight: JoinSet<StorageResult<EntryOutcome>> = JoinSet::new();

        let status = loop {
            if self.recovery.is_fatal() {
                break RunStatus::Failed;
            }
            if self.ctx.cancel.is_cancelled() {
                info!("[{}] Cancellation requested, stopping dispatch", self.ctx.task_id);
                break RunStatus::Cancelled;
            }

            match self.ctx.frontier.cap_reached() {
                Ok(true) => {
                    info!("[{}] Accepted-page cap reached", self.ctx.task_id);
                    break RunStatus::CapReached;
                }
                Ok(false) => {}
                Err(e) => {
                    self.handle_fault(e).await;
                    continue;
                }
            }

            if let Err(e) = self.fill(&mut in_flight) {
                self.handle_fault(e).await;
                continue;
            }

            if in_flight.is_empty() {
                match self.ctx.frontier.is_drained() {
                    Ok(true) => {
                        info!("[{}] Frontier drained", self.ctx.task_id);
                        break RunStatus::Drained;
                    }
                    // Claims held by a dead worker; wait for the watchdog
                    Ok(false) => tokio::time::sleep(self.poll_interval).await,
                    Err(e) => self.handle_fault(e).await,
                }
                continue;
            }

            tokio::select! {
                joined = in_flight.join_next() => {
                    if let Some(joined) = joined {
                        self.handle_joined(joined).await;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        };

        // In-flight entries are never aborted
        while let Some(joined) = in_flight.join_next().await {
            self.handle_joined(joined).await;
        }

        let status = if self.recovery.is_fatal() {
            RunStatus::Failed
        } else {
            status
        };

        RunSummary {
            status,
            totals: self.ctx.counters.snapshot(),
        }
    }

    /// Claims entries until every slot is busy or nothing is pending
    fn fill(&self, in_flight: &mut JoinSet<StorageResult<EntryOutcome>>) -> StorageResult<()> {
        while in_flight.len() < self.concurrency && !self.ctx.cancel.is_cancelled() {
            match self.ctx.frontier.claim_next(&self.ctx.run_key)? {
                Some(entry) => {
                    debug!("[{}] Dispatching {}", self.ctx.task_id, entry.url);
                    in_flight.spawn(process_entry(self.ctx.clone(), entry));
                }
                None => break,
            }
        }
        Ok(())
    }

    async fn handle_joined(&self, joined: Result<StorageResult<EntryOutcome>, JoinError>) {
        match joined {
            Ok(Ok(outcome)) => debug!("[{}] Entry finished: {:?}", self.ctx.task_id, outcome),
            Ok(Err(e)) => self.handle_fault(e).await,
            Err(e) => error!("[{}] Worker panicked: {}", self.ctx.task_id, e),
        }
    }

    async fn handle_fault(&self, e: StorageError) {
        warn!("[{}] Frontier error during dispatch: {}", self.ctx.task_id, e);
        if !self.recovery.recover(&e).await {
            error!("[{}] Frontier could not be recovered", self.ctx.task_id);
            return;
        }
        tokio::time::sleep(self.poll_interval).await;
    }
}

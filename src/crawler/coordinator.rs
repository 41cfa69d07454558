//! Task coordinator - runs one task from lock acquisition to its report
//!
//! This module drives the task state machine, including:
//! - Acquiring the invocation lock and releasing claims of dead invocations
//! - Seeding the frontier with the start URL
//! - Running the static strategy and, when it under-performs, the rendered one
//! - Keeping the watchdog alive for the whole task
//! - Recording every run in the frontier database

use crate::config::{Settings, StrategyKind, Task, TaskStore};
use crate::crawler::classifier::SelectorRules;
use crate::crawler::fetcher::StrategyProvider;
use crate::crawler::pipeline::{RunContext, RunCounters};
use crate::crawler::scheduler::{CancelFlag, RunSummary, Scheduler};
use crate::crawler::watchdog::{StorageRecovery, Watchdog};
use crate::output::{OutputWriter, TaskReport};
use crate::state::TaskState;
use crate::storage::{Frontier, RunStatus, RunTotals, StorageError};
use crate::ScoutError;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Keys built by this process so far
static RUN_KEY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Builds the key identifying one invocation's hold on a task
///
/// The nonce combines wall-clock milliseconds, the process id and a
/// process-wide sequence number, so keys built in the same millisecond
/// still differ.
pub fn run_key(task_id: &str) -> String {
    format!(
        "{}-{}-{}-{}",
        task_id,
        Utc::now().timestamp_millis(),
        std::process::id(),
        RUN_KEY_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

/// Main task coordinator structure
pub struct Coordinator {
    task: Task,
    settings: Arc<Settings>,
    store: Arc<dyn TaskStore>,
    strategies: Arc<dyn StrategyProvider>,
    frontier: Arc<Frontier>,
    cancel: CancelFlag,
    run_key: String,
}

impl Coordinator {
    /// Creates a coordinator for one task
    ///
    /// # Arguments
    ///
    /// * `task` - The task as loaded from its store
    /// * `settings` - Application settings
    /// * `store` - Where an escalated strategy is saved
    /// * `strategies` - Builds the fetch strategy for every run
    /// * `frontier` - The task's frontier database
    /// * `cancel` - Invocation-wide cancel flag
    pub fn new(
        task: Task,
        settings: Arc<Settings>,
        store: Arc<dyn TaskStore>,
        strategies: Arc<dyn StrategyProvider>,
        frontier: Arc<Frontier>,
        cancel: CancelFlag,
    ) -> Self {
        let run_key = run_key(&task.id);
        Self {
            task,
            settings,
            store,
            strategies,
            frontier,
            cancel,
            run_key,
        }
    }

    pub fn run_key(&self) -> &str {
        &self.run_key
    }

    /// The strategy the task will start with
    pub fn strategy(&self) -> StrategyKind {
        self.task.strategy
    }

    /// Runs the task until it completes, is cancelled, or fails
    ///
    /// Returns `TaskBusy` when another live invocation holds the task and
    /// `StorageFault` when the frontier could not be recovered. Every other
    /// outcome is described by the returned report.
    pub async fn run(mut self) -> Result<TaskReport, ScoutError> {
        let rules = SelectorRules::compile(&self.task.selectors)?;
        let crawler = &self.settings.crawler;

        let released = match self
            .frontier
            .acquire_lock(&self.run_key, crawler.stuck_threshold())
        {
            Ok(released) => released,
            Err(StorageError::Locked(holder)) => {
                warn!("[{}] Task is held by {}", self.task.id, holder);
                return Err(ScoutError::TaskBusy(self.task.id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        if released > 0 {
            info!(
                "[{}] Released {} claims left by an earlier invocation",
                self.task.id, released
            );
        }

        match self.frontier.enqueue(&self.task.start_url) {
            Ok(true) => {
                info!("[{}] Seeded frontier with {}", self.task.id, self.task.start_url)
            }
            Ok(false) => {}
            Err(e) => {
                if let Err(release) = self.frontier.release_lock(&self.run_key) {
                    warn!(
                        "[{}] Failed to release invocation lock: {}",
                        self.task.id, release
                    );
                }
                return Err(e.into());
            }
        }

        let recovery = Arc::new(StorageRecovery::new(
            self.frontier.clone(),
            self.task.start_url.clone(),
            self.run_key.clone(),
            crawler.stuck_threshold(),
            crawler.max_recovery_attempts,
            crawler.retry_delay(),
        ));
        let watchdog = Watchdog::new(
            self.frontier.clone(),
            recovery.clone(),
            self.run_key.clone(),
            crawler.watchdog_interval(),
            crawler.stuck_threshold(),
        )
        .spawn();

        let mut state = TaskState::Idle;
        let mut next = TaskState::Running(self.task.strategy);
        let mut totals = RunTotals::default();
        let mut escalated = false;

        while !state.is_terminal() {
            if !state.can_transition_to(&next) {
                error!("[{}] Invalid transition {} -> {}", self.task.id, state, next);
                next = TaskState::Failed(format!("invalid transition from {}", state));
            }
            state = next;

            next = match &state {
                TaskState::Running(kind) => {
                    let kind = *kind;
                    info!("[{}] Starting {} run", self.task.id, kind);
                    match self.run_once(kind, &rules, &recovery).await {
                        Ok(summary) => {
                            totals.strategy_yield += summary.totals.strategy_yield;
                            totals.dispatched += summary.totals.dispatched;
                            totals.failed += summary.totals.failed;
                            self.after_run(kind, summary, escalated)
                        }
                        Err(cause) => TaskState::Failed(cause),
                    }
                }
                TaskState::Escalating => {
                    escalated = true;
                    self.task.strategy = StrategyKind::Rendered;
                    if let Err(e) = self.store.save(&self.task) {
                        warn!("[{}] Failed to save escalated strategy: {}", self.task.id, e);
                    }
                    if let Ok(true) = self.frontier.is_drained() {
                        warn!(
                            "[{}] Nothing left pending; the rendered run will find no work \
                             until new URLs are enqueued",
                            self.task.id
                        );
                    }
                    TaskState::Running(StrategyKind::Rendered)
                }
                _ => break,
            };
        }

        watchdog.stop().await;
        if let Err(e) = self.frontier.release_lock(&self.run_key) {
            warn!("[{}] Failed to release invocation lock: {}", self.task.id, e);
        }

        if let Some(cause) = recovery.fatal_cause() {
            return Err(ScoutError::StorageFault {
                task_id: self.task.id.clone(),
                message: cause.to_string(),
            });
        }

        let accepted = self.frontier.accepted_count().unwrap_or(totals.strategy_yield);
        info!("[{}] Task {}", self.task.id, state);

        Ok(TaskReport {
            task_id: self.task.id.clone(),
            status: state,
            accepted,
            failed: totals.failed,
            dispatched: totals.dispatched,
            strategy: self.task.strategy,
            escalated,
        })
    }

    /// Performs one run with the given strategy and records it
    async fn run_once(
        &self,
        kind: StrategyKind,
        rules: &SelectorRules,
        recovery: &Arc<StorageRecovery>,
    ) -> Result<RunSummary, String> {
        let strategy = self
            .strategies
            .strategy_for(kind, &self.task)
            .map_err(|e| format!("could not build {} strategy: {}", kind, e))?;

        let config_hash = self.store.config_hash(&self.task.id).unwrap_or_else(|e| {
            warn!("[{}] Failed to hash task config: {}", self.task.id, e);
            String::new()
        });
        let run_id = match self.frontier.create_run(kind, &config_hash) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("[{}] Failed to record run start: {}", self.task.id, e);
                None
            }
        };

        let crawler = &self.settings.crawler;
        let ctx = Arc::new(RunContext {
            task_id: self.task.id.clone(),
            run_key: self.run_key.clone(),
            frontier: self.frontier.clone(),
            strategy: strategy.clone(),
            rules: rules.clone(),
            writer: OutputWriter::new(crawler.min_content_bytes),
            output_dir: self.task.output_path(&self.settings.paths),
            max_retries: crawler.max_retries,
            retry_delay: crawler.retry_delay(),
            cancel: self.cancel.clone(),
            counters: RunCounters::default(),
        });

        let summary = Scheduler::new(
            ctx,
            recovery.clone(),
            self.task.concurrency as usize,
            crawler.poll_interval(),
        )
        .run()
        .await;

        strategy.shutdown().await;

        if let Some(run_id) = run_id {
            if let Err(e) = self.frontier.finish_run(run_id, summary.status, summary.totals) {
                warn!("[{}] Failed to record run end: {}", self.task.id, e);
            }
        }

        info!(
            "[{}] {} run ended ({}): {} accepted, {} processed, {} failed",
            self.task.id,
            kind,
            summary.status,
            summary.totals.strategy_yield,
            summary.totals.dispatched,
            summary.totals.failed
        );

        Ok(summary)
    }

    /// Chooses the state that follows a finished run
    ///
    /// A completed static run escalates at most once, and only when it
    /// produced fewer pages than the escalation threshold while the cap is
    /// still unmet.
    fn after_run(&self, kind: StrategyKind, summary: RunSummary, escalated: bool) -> TaskState {
        match summary.status {
            RunStatus::Cancelled => TaskState::Cancelled,
            RunStatus::Failed | RunStatus::Running => TaskState::Failed("frontier storage fault".to_string()),
            RunStatus::Drained | RunStatus::CapReached => {
                let accepted = self.frontier.accepted_count().unwrap_or(0);
                let under_performed =
                    summary.totals.strategy_yield < self.settings.crawler.escalation_threshold;

                if kind == StrategyKind::Static
                    && !escalated
                    && under_performed
                    && accepted < self.task.max_accepted
                    && !self.cancel.is_cancelled()
                {
                    info!(
                        "[{}] Static run yielded {} pages (threshold {}), escalating",
                        self.task.id,
                        summary.totals.strategy_yield,
                        self.settings.crawler.escalation_threshold
                    );
                    TaskState::Escalating
                } else {
                    TaskState::Completed
                }
            }
        }
    }
}

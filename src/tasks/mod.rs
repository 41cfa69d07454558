//! Task management
//!
//! `TaskController` is what the CLI talks to: it creates tasks, starts them
//! concurrently with isolated failures, stops them through the shared cancel
//! flag, and reports their status.

use crate::config::{DirTaskStore, Settings, StrategyKind, Task, TaskStore};
use crate::crawler::{CancelFlag, Coordinator, HttpStrategies, StrategyProvider};
use crate::output::{generate_all_sitemaps, generate_site_sitemap, SitemapOutcome, TaskReport, TaskSnapshot};
use crate::storage::Frontier;
use crate::{Result, ScoutError};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Runs recorded per task in `status` output
const STATUS_RUN_LIMIT: usize = 5;

/// Entry point for every task operation of one invocation
pub struct TaskController {
    settings: Arc<Settings>,
    store: Arc<DirTaskStore>,
    strategies: Arc<dyn StrategyProvider>,
    cancel: CancelFlag,
}

impl TaskController {
    /// Creates a controller using the real network strategies
    pub fn new(settings: Settings) -> Self {
        let strategies = Arc::new(HttpStrategies::new(settings.clone()));
        Self::with_strategies(settings, strategies)
    }

    /// Creates a controller with a custom strategy provider
    pub fn with_strategies(settings: Settings, strategies: Arc<dyn StrategyProvider>) -> Self {
        let store = Arc::new(DirTaskStore::new(settings.paths.tasks_dir.clone()));
        Self {
            settings: Arc::new(settings),
            store,
            strategies,
            cancel: CancelFlag::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &DirTaskStore {
        &self.store
    }

    /// The flag every running task watches; raise it to stop them all
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Stops every running task after its in-flight pages finish
    pub fn stop(&self) {
        info!("Stopping all running tasks");
        self.cancel.cancel();
    }

    /// Creates a task for a start URL and seeds its frontier
    ///
    /// The task id is the URL's host; a second task for the same host is
    /// refused with `TaskExists`.
    pub fn create_task(&self, start_url: &str) -> Result<Task> {
        let task = Task::from_start_url(start_url)?;
        if self.store.exists(&task.id) {
            return Err(ScoutError::TaskExists(task.id));
        }

        self.store.save(&task)?;
        let frontier = self.open_frontier(&task)?;
        frontier.enqueue(&task.start_url)?;

        info!("Created task {} for {}", task.id, task.start_url);
        Ok(task)
    }

    /// Starts tasks concurrently and waits for all of them
    ///
    /// One task failing does not affect the others; its report carries the
    /// cause. Reports come back in the order the ids were given.
    pub async fn start_tasks(&self, ids: &[String]) -> Vec<TaskReport> {
        let mut reports: Vec<Option<TaskReport>> = vec![None; ids.len()];
        let mut running = JoinSet::new();

        for (index, id) in ids.iter().enumerate() {
            let coordinator = match self.load(id).and_then(|task| self.coordinator(task)) {
                Ok(coordinator) => coordinator,
                Err(e) => {
                    error!("Cannot start task {}: {}", id, e);
                    reports[index] = Some(TaskReport::failed(id, StrategyKind::Static, e.to_string()));
                    continue;
                }
            };

            let id = id.clone();
            running.spawn(async move {
                let strategy = coordinator.strategy();
                let report = match coordinator.run().await {
                    Ok(report) => report,
                    Err(e) => {
                        error!("Task {} failed: {}", id, e);
                        TaskReport::failed(&id, strategy, e.to_string())
                    }
                };
                (index, report)
            });
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((index, report)) => reports[index] = Some(report),
                Err(e) => error!("Task worker panicked: {}", e),
            }
        }

        reports
            .into_iter()
            .zip(ids)
            .map(|(report, id)| {
                report.unwrap_or_else(|| TaskReport::failed(id, StrategyKind::Static, "task panicked"))
            })
            .collect()
    }

    /// Starts a single task and waits for it
    pub async fn start_task(&self, id: &str) -> Result<TaskReport> {
        let task = self.load(id)?;
        self.coordinator(task)?.run().await
    }

    /// Lists every task with its accepted count, if its frontier exists
    pub fn list(&self) -> Result<Vec<(Task, Option<u64>)>> {
        let tasks = self.store.load_all()?;
        Ok(tasks
            .into_iter()
            .map(|task| {
                let accepted = self.existing_frontier(&task).and_then(|frontier| {
                    frontier
                        .accepted_count()
                        .map_err(|e| warn!("Cannot read frontier of {}: {}", task.id, e))
                        .ok()
                });
                (task, accepted)
            })
            .collect())
    }

    /// Frontier counts and recent runs of one task
    pub fn status(&self, id: &str) -> Result<TaskSnapshot> {
        let task = self.load(id)?;
        let frontier = self.open_frontier(&task)?;
        Ok(TaskSnapshot {
            counts: frontier.counts()?,
            runs: frontier.latest_runs(STATUS_RUN_LIMIT)?,
            task,
        })
    }

    /// Regenerates sitemaps for one site or for every site under the output root
    pub fn generate_sitemaps(
        &self,
        site: Option<&str>,
    ) -> Result<Vec<(String, Result<SitemapOutcome>)>> {
        let root = &self.settings.paths.output_dir;
        match site {
            Some(site) => Ok(vec![(site.to_string(), generate_site_sitemap(root, site))]),
            None => generate_all_sitemaps(root),
        }
    }

    fn load(&self, id: &str) -> Result<Task> {
        if !self.store.exists(id) {
            return Err(ScoutError::TaskNotFound(id.to_string()));
        }
        Ok(self.store.load(id)?)
    }

    fn coordinator(&self, task: Task) -> Result<Coordinator> {
        let frontier = Arc::new(self.open_frontier(&task)?);
        Ok(Coordinator::new(
            task,
            self.settings.clone(),
            self.store.clone(),
            self.strategies.clone(),
            frontier,
            self.cancel.clone(),
        ))
    }

    fn open_frontier(&self, task: &Task) -> Result<Frontier> {
        let path = self.store.frontier_path(&task.id);
        Ok(Frontier::open_path(&path, task.max_accepted)?)
    }

    fn existing_frontier(&self, task: &Task) -> Option<Frontier> {
        let path = self.store.frontier_path(&task.id);
        if !path.exists() {
            return None;
        }
        Frontier::open_path(&path, task.max_accepted)
            .map_err(|e| warn!("Cannot open frontier of {}: {}", task.id, e))
            .ok()
    }
}

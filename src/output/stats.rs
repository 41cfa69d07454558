//! Task reports and status output
//!
//! This module turns finished tasks and frontier snapshots into the
//! plain-text summaries the CLI prints.

use crate::config::{StrategyKind, Task};
use crate::state::TaskState;
use crate::storage::{FrontierCounts, RunRecord};

/// Outcome of one task within an invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub task_id: String,
    pub status: TaskState,
    /// Accepted counter after the last run (all invocations)
    pub accepted: u64,
    /// URLs that failed permanently in this invocation
    pub failed: u64,
    /// URLs processed in this invocation
    pub dispatched: u64,
    /// Strategy the task ended with
    pub strategy: StrategyKind,
    /// Whether this invocation escalated to the rendered strategy
    pub escalated: bool,
}

impl TaskReport {
    /// Report for a task that failed before or during its runs
    pub fn failed(task_id: &str, strategy: StrategyKind, cause: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskState::Failed(cause.into()),
            accepted: 0,
            failed: 0,
            dispatched: 0,
            strategy,
            escalated: false,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, TaskState::Failed(_))
    }

    /// One line per task: id, status, then counts for tasks that ran
    pub fn summary_line(&self) -> String {
        match &self.status {
            TaskState::Failed(cause) => format!("{}: failed: {}", self.task_id, cause),
            status => {
                let mut line = format!(
                    "{}: {} - {} accepted, {} processed, {} failed ({} strategy",
                    self.task_id, status, self.accepted, self.dispatched, self.failed, self.strategy
                );
                if self.escalated {
                    line.push_str(", escalated");
                }
                line.push(')');
                line
            }
        }
    }
}

/// Prints one summary line per task, then the totals
pub fn print_reports(reports: &[TaskReport]) {
    println!("=== Task Results ===\n");

    for report in reports {
        println!("  {}", report.summary_line());
    }
    println!();

    let failed = reports.iter().filter(|r| r.is_failure()).count();
    let accepted: u64 = reports.iter().map(|r| r.accepted).sum();
    println!(
        "{} task(s), {} failed, {} product page(s) captured",
        reports.len(),
        failed,
        accepted
    );
}

/// Everything `status <ID>` shows about a task
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub task: Task,
    pub counts: FrontierCounts,
    pub runs: Vec<RunRecord>,
}

/// Prints the one-line-per-task listing of `list-tasks`
pub fn print_task_list(tasks: &[(Task, Option<u64>)]) {
    if tasks.is_empty() {
        println!("No tasks found. Create one with `create-task <URL>`.");
        return;
    }

    println!("=== Tasks ===\n");
    for (task, accepted) in tasks {
        let accepted = accepted
            .map(|count| count.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} - {} [{}] {}/{} accepted",
            task.id, task.start_url, task.strategy, accepted, task.max_accepted
        );
    }
}

/// Prints a task's frontier counts and recent runs
pub fn print_task_status(snapshot: &TaskSnapshot) {
    let task = &snapshot.task;
    let counts = &snapshot.counts;

    println!("=== Task {} ===\n", task.id);

    println!("Configuration:");
    println!("  Start URL: {}", task.start_url);
    println!("  Strategy: {}", task.strategy);
    println!("  Concurrency: {}", task.concurrency);
    println!("  Selectors: {}", task.selectors.join(", "));
    println!();

    println!("Frontier:");
    println!("  Pending: {}", counts.pending);
    println!("  Claimed: {}", counts.claimed);
    println!("  Done: {}", counts.done);
    println!("  Visited: {}", counts.visited);
    println!("  Accepted: {} / {}", counts.accepted, task.max_accepted);
    println!();

    if snapshot.runs.is_empty() {
        println!("No runs recorded yet.");
        return;
    }

    println!("Recent Runs:");
    for run in &snapshot.runs {
        println!(
            "  #{} {} {} started {}{} - yield {}, processed {}, failed {}",
            run.id,
            run.strategy,
            run.status,
            run.started_at,
            run.finished_at
                .as_ref()
                .map(|f| format!(", finished {}", f))
                .unwrap_or_default(),
            run.totals.strategy_yield,
            run.totals.dispatched,
            run.totals.failed
        );
    }
}

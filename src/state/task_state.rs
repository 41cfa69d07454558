//! Task lifecycle state machine
//!
//! ```text
//! Idle -> Running(static) -> Escalating -> Running(rendered) -> Completed
//!              |                                  |
//!              +--> Completed | Cancelled | Failed <--+
//! ```

use crate::config::StrategyKind;
use std::fmt;

/// Lifecycle state of one task within an invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Loaded but not started
    Idle,

    /// A crawl run is in progress under the given strategy
    Running(StrategyKind),

    /// The static run under-performed; switching to the rendered strategy
    Escalating,

    /// The frontier drained or the accepted cap was reached
    Completed,

    /// Stopped by the cancel flag; pending work is kept for the next start
    Cancelled,

    /// The task could not continue (storage fault, bad config)
    Failed(String),
}

impl TaskState {
    /// Returns true once the task will not change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed(_))
    }

    /// Returns true while a crawl run is active
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_) | Self::Escalating)
    }

    /// Returns true if the task may move from `self` to `next`
    pub fn can_transition_to(&self, next: &TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Idle, Running(_)) | (Idle, Failed(_)) => true,
            (Running(StrategyKind::Static), Escalating) => true,
            (Escalating, Running(StrategyKind::Rendered)) | (Escalating, Failed(_)) => true,
            (Running(_), Completed) | (Running(_), Cancelled) | (Running(_), Failed(_)) => true,
            _ => false,
        }
    }

    /// Human readable status line for reports
    pub fn describe(&self) -> String {
        match self {
            Self::Idle => "idle".to_string(),
            Self::Running(strategy) => format!("running ({})", strategy),
            Self::Escalating => "escalating to rendered strategy".to_string(),
            Self::Completed => "completed".to_string(),
            Self::Cancelled => "stopped, resumable".to_string(),
            Self::Failed(cause) => format!("failed: {}", cause),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

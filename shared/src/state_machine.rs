//! Task Lifecycle State Machine
//!
//! Defines the task statuses, the valid transitions between them, and the
//! phases the dispatch engine moves through while driving a task.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Admitted to the registry, waiting for the engine
    Pending,
    /// A sub-command is dispatched or about to be
    Running,
    /// Every sub-command produced a result
    Completed,
    /// Timed out, rejected by the interpreter, or otherwise aborted
    Failed,
}

impl TaskStatus {
    /// Terminal tasks are purged once their final notification is out
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Check if a status transition is valid
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    match (from, to) {
        (Pending, Running) => true,
        // Each sub-command dispatch re-enters Running
        (Running, Running) => true,
        (Running, Completed) | (Running, Failed) => true,
        // A group made only of skipped commands never runs
        (Pending, Completed) | (Pending, Failed) => true,

        // Terminal states are final
        _ => false,
    }
}

/// Phase of the dispatch engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnginePhase {
    /// No active task
    #[default]
    Idle,
    /// Task selected, next sub-command not yet dispatched
    Admitted,
    /// Sub-command handed to the interpreter, awaiting its result
    Executing,
    /// Result received, deciding whether to continue or finish
    Advancing,
}

impl EnginePhase {
    /// Whether a task currently holds the engine
    pub fn is_busy(self) -> bool {
        self != EnginePhase::Idle
    }
}

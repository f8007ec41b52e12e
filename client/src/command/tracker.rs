//! Client-side tracking of submitted command groups

use std::collections::HashMap;
use webtask_shared::{ResponseStatus, TaskResponse};

/// Tracks a submitted task awaiting its terminal response
#[derive(Debug, Clone)]
pub struct PendingTask {
    pub task_id: String,
    pub commands: usize,
    pub sent_at: u64,
    pub deadline: u64,
}

/// What a device response means for a tracked task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskUpdate {
    Progress {
        task_id: String,
        index: Option<usize>,
    },
    Completed {
        task_id: String,
        results: Vec<String>,
        elapsed_ms: u64,
    },
    Failed {
        task_id: String,
        error: String,
    },
}

/// Pending tasks keyed by id, each with its own deadline
pub struct TaskTracker {
    timeout_ms: u64,
    pending: HashMap<String, PendingTask>,
}

impl TaskTracker {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            pending: HashMap::new(),
        }
    }

    /// Start tracking a task that was just sent
    pub fn track(&mut self, task_id: &str, commands: usize, now: u64) {
        self.pending.insert(
            task_id.to_string(),
            PendingTask {
                task_id: task_id.to_string(),
                commands,
                sent_at: now,
                deadline: now + self.timeout_ms,
            },
        );
    }

    /// Apply a response; terminal responses stop tracking the task
    ///
    /// Responses for ids this client never submitted yield `None`.
    pub fn handle(&mut self, response: &TaskResponse, now: u64) -> Option<TaskUpdate> {
        let task_id = response.task_id.clone();

        match response.status {
            ResponseStatus::Running => {
                self.pending.get(&task_id)?;
                Some(TaskUpdate::Progress {
                    task_id,
                    index: response.index,
                })
            }
            ResponseStatus::Completed => {
                let task = self.pending.remove(&task_id)?;
                Some(TaskUpdate::Completed {
                    task_id,
                    results: response.results.clone().unwrap_or_default(),
                    elapsed_ms: now.saturating_sub(task.sent_at),
                })
            }
            ResponseStatus::Error => {
                self.pending.remove(&task_id)?;
                Some(TaskUpdate::Failed {
                    task_id,
                    error: response
                        .error
                        .clone()
                        .unwrap_or_else(|| "Task failed".to_string()),
                })
            }
        }
    }

    /// Remove and return tasks whose deadline has passed
    pub fn expire(&mut self, now: u64) -> Vec<PendingTask> {
        let expired: Vec<String> = self
            .pending
            .values()
            .filter(|t| now > t.deadline)
            .map(|t| t.task_id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

//! Task registry - owns every task record and the pending FIFO

use super::task::Task;
use crate::transport::ConnectionId;
use std::collections::{HashMap, VecDeque};
use webtask_shared::{state_machine::is_valid_transition, TaskError, TaskStatus};

/// Maps task id to task state and remembers pending admission order
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Task>,
    /// Pending task ids in submission order
    pending: VecDeque<String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, rejecting ids already in use
    pub fn insert(&mut self, task: Task) -> Result<(), TaskError> {
        if self.tasks.contains_key(&task.id) {
            return Err(TaskError::DuplicateTask(task.id));
        }

        if task.status == TaskStatus::Pending {
            self.pending.push_back(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// Move a task to a new status, enforcing the lifecycle
    pub fn transition(&mut self, id: &str, to: TaskStatus) -> Result<(), TaskError> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::UnknownTask(id.to_string()))?;

        if !is_valid_transition(task.status, to) {
            return Err(TaskError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status,
                to,
            });
        }

        if task.status == TaskStatus::Pending {
            self.pending.retain(|p| p != id);
        }
        task.status = to;
        Ok(())
    }

    /// Purge a task record
    pub fn remove(&mut self, id: &str) -> Option<Task> {
        self.pending.retain(|p| p != id);
        self.tasks.remove(id)
    }

    /// Oldest pending task id, removed from the FIFO
    pub fn next_pending(&mut self) -> Option<String> {
        while let Some(id) = self.pending.pop_front() {
            if self
                .tasks
                .get(&id)
                .is_some_and(|t| t.status == TaskStatus::Pending)
            {
                return Some(id);
            }
        }
        None
    }

    /// Number of tasks waiting for the engine
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Ids of running tasks whose current sub-command exceeded `timeout_ms`
    pub fn timed_out(&self, now: u64, timeout_ms: u64) -> Vec<String> {
        self.tasks
            .values()
            .filter(|t| t.is_timed_out(now, timeout_ms))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Purge queued tasks owned by a connection that went away
    pub fn drop_pending_for(&mut self, owner: ConnectionId) -> Vec<String> {
        let dropped: Vec<String> = self
            .tasks
            .values()
            .filter(|t| t.owner == owner && t.status == TaskStatus::Pending)
            .map(|t| t.id.clone())
            .collect();

        for id in &dropped {
            self.remove(id);
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

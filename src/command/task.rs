//! Task records owned by the registry

use crate::transport::ConnectionId;
use rand::Rng;
use webtask_shared::TaskStatus;

/// One client-submitted command group, tracked to completion
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    /// Every message about this task goes back to this connection only
    pub owner: ConnectionId,
    pub commands: Vec<String>,
    /// Index of the next command to execute
    pub cursor: usize,
    pub results: Vec<String>,
    /// Commands skipped without execution
    pub skipped: usize,
    pub submitted_at: u64,
    /// Dispatch time of the current sub-command
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

impl Task {
    pub fn new(id: String, owner: ConnectionId, commands: Vec<String>, now: u64) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            owner,
            commands,
            cursor: 0,
            results: Vec::new(),
            skipped: 0,
            submitted_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// The command under the cursor, if any remain
    pub fn current_command(&self) -> Option<&str> {
        self.commands.get(self.cursor).map(String::as_str)
    }

    /// Whether the cursor has moved past the last command
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.commands.len()
    }

    /// Whether the current sub-command has waited longer than `timeout_ms`
    pub fn is_timed_out(&self, now: u64, timeout_ms: u64) -> bool {
        match (self.status, self.started_at) {
            (TaskStatus::Running, Some(started)) => now.saturating_sub(started) > timeout_ms,
            _ => false,
        }
    }
}

/// Generate a task id from the clock plus a random disambiguator
pub fn generate_task_id(now: u64) -> String {
    let salt: u16 = rand::thread_rng().gen_range(0..1000);
    format!("{}_{}", now, salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new("T1".into(), 3, vec!["d".into()], 100);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.cursor, 0);
        assert!(task.results.is_empty());
        assert_eq!(task.current_command(), Some("d"));
        assert!(!task.is_exhausted());
    }

    #[test]
    fn test_timeout_only_applies_while_running() {
        let mut task = Task::new("T1".into(), 1, vec!["d".into()], 0);
        assert!(!task.is_timed_out(100_000, 30_000));

        task.status = TaskStatus::Running;
        task.started_at = Some(1_000);
        assert!(!task.is_timed_out(31_000, 30_000));
        assert!(task.is_timed_out(31_001, 30_000));
    }

    #[test]
    fn test_generated_ids() {
        let id = generate_task_id(12345);
        let (time, salt) = id.split_once('_').expect("id should contain a separator");
        assert_eq!(time, "12345");
        assert!(salt.parse::<u16>().unwrap() < 1000);
    }
}

//! Webtask Shared Types
//!
//! This crate provides the wire protocol, the encoded-command codec, the
//! command group parser and the task lifecycle shared by the device and its
//! clients.

pub mod codec;
pub mod instruction;
pub mod protocol;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

// Re-export commonly used types at crate root
pub use instruction::{Instruction, ParsedCommand, SkipReason};
pub use protocol::{CommandRequest, Inbound, Outbound, ProtocolError, ResponseStatus, TaskResponse};
pub use state_machine::{EnginePhase, TaskStatus};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing parameters, in milliseconds of the device clock
pub mod timing {
    /// A sub-command without a result for this long fails its task
    pub const TASK_TIMEOUT_MS: u64 = 30_000;

    /// Interval at which clients are expected to send heartbeats
    pub const HEARTBEAT_INTERVAL_MS: u64 = 10_000;

    /// A connection silent for longer than this is considered stale
    pub const HEARTBEAT_TIMEOUT_MS: u64 = 15_000;

    /// Scheduler tick driving the timeout scan
    pub const SCHEDULER_TICK_MS: u64 = 50;

    /// Client-side deadline for a whole task response
    pub const CLIENT_TASK_TIMEOUT_MS: u64 = 35_000;

    /// First client reconnect delay; doubles on every further attempt
    pub const RECONNECT_DELAY_MS: u64 = 500;

    /// Client reconnect attempts before giving up
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
}

/// Task-level failures reported back to the submitting connection
///
/// The `Display` text is what clients see in the `error` field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Previous web task is still running")]
    Busy,

    #[error("Task queue is full")]
    QueueFull,

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task timeout")]
    Timeout,

    #[error("{0}")]
    Execution(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_epoch_millis() {
        // Anything after 2020-01-01
        assert!(now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_client_visible_error_text() {
        assert_eq!(TaskError::Busy.to_string(), "Previous web task is still running");
        assert_eq!(TaskError::Timeout.to_string(), "Task timeout");
        assert_eq!(TaskError::Execution("Unknown token".into()).to_string(), "Unknown token");
    }

    #[test]
    fn test_timing_relationships() {
        assert!(timing::HEARTBEAT_TIMEOUT_MS > timing::HEARTBEAT_INTERVAL_MS);
        assert!(timing::CLIENT_TASK_TIMEOUT_MS > timing::TASK_TIMEOUT_MS);
        assert!(timing::SCHEDULER_TICK_MS < timing::TASK_TIMEOUT_MS);
    }
}

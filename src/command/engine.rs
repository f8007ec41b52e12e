//! Dispatch engine - drives one task's sub-commands at a time
//!
//! The engine never performs I/O. Each entry point takes the current device
//! time and returns the [`EngineAction`]s the scheduler must carry out:
//! dispatch an instruction to the interpreter, or notify the task's owner.
//!
//! ```text
//! Idle --submit--> Admitted --dispatch--> Executing --result--> Advancing
//!                     ^   \--skip--/          |                    |
//!                     |                       +--timeout/error-->  Failed --> Idle
//!                     +----------------- more commands ------------+
//!                                             no more commands --> Completed --> Idle
//! ```

use super::registry::TaskRegistry;
use super::task::{generate_task_id, Task};
use crate::transport::ConnectionId;
use tracing::{debug, error, info, warn};
use webtask_shared::{
    instruction::parse_command, timing, CommandRequest, EnginePhase, Instruction, ParsedCommand,
    TaskError, TaskStatus,
};

/// What to do when a command group arrives while another task holds the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusyPolicy {
    /// Reply with an error and discard the submission
    #[default]
    Reject,
    /// Keep up to `capacity` tasks waiting, FIFO
    Queue { capacity: usize },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub task_timeout_ms: u64,
    pub busy_policy: BusyPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_timeout_ms: timing::TASK_TIMEOUT_MS,
            busy_policy: BusyPolicy::Reject,
        }
    }
}

/// Identifies one dispatch; results must present the matching ticket
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DispatchTicket {
    pub task_id: String,
    pub index: usize,
}

/// Side effects requested by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Hand an instruction to the device interpreter
    Dispatch {
        ticket: DispatchTicket,
        instruction: Instruction,
    },
    /// Sub-command `index` entered execution
    Running {
        owner: ConnectionId,
        task_id: String,
        index: usize,
    },
    Completed {
        owner: ConnectionId,
        task_id: String,
        results: Vec<String>,
    },
    Failed {
        owner: ConnectionId,
        task_id: String,
        error: String,
    },
    /// Submission refused; nothing entered the registry
    Rejected {
        owner: ConnectionId,
        task_id: String,
        error: String,
    },
}

enum Outcome {
    Completed,
    Failed(String),
}

/// Serial executor for submitted command groups
pub struct DispatchEngine {
    config: EngineConfig,
    registry: TaskRegistry,
    /// Id of the task holding the engine; always present in the registry
    active: Option<String>,
    phase: EnginePhase,
}

impl DispatchEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: TaskRegistry::new(),
            active: None,
            phase: EnginePhase::Idle,
        }
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn active_task_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_task(&self) -> Option<&Task> {
        self.active.as_deref().and_then(|id| self.registry.get(id))
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Admit a command group from `owner`
    pub fn submit(
        &mut self,
        owner: ConnectionId,
        request: CommandRequest,
        now: u64,
    ) -> Vec<EngineAction> {
        let task_id = request
            .task_id
            .unwrap_or_else(|| generate_task_id(now));
        let mut actions = Vec::new();

        if self.phase.is_busy() {
            let refusal = match self.config.busy_policy {
                BusyPolicy::Reject => Some(TaskError::Busy),
                BusyPolicy::Queue { capacity } if self.registry.pending_count() >= capacity => {
                    Some(TaskError::QueueFull)
                }
                BusyPolicy::Queue { .. } => None,
            };

            if let Some(err) = refusal {
                warn!("Rejected task {} from connection {}: {}", task_id, owner, err);
                actions.push(EngineAction::Rejected {
                    owner,
                    task_id,
                    error: err.to_string(),
                });
                return actions;
            }
        }

        let command_count = request.commands.len();
        let task = Task::new(task_id.clone(), owner, request.commands, now);

        if let Err(err) = self.registry.insert(task) {
            warn!("Rejected task {} from connection {}: {}", task_id, owner, err);
            actions.push(EngineAction::Rejected {
                owner,
                task_id,
                error: err.to_string(),
            });
            return actions;
        }

        if self.phase.is_busy() {
            info!(
                "Queued task {} ({} commands), {} waiting",
                task_id,
                command_count,
                self.registry.pending_count()
            );
        } else {
            info!("Accepted task {} ({} commands)", task_id, command_count);
        }

        self.admit_next(now, &mut actions);
        actions
    }

    /// Apply the interpreter's result for a dispatched sub-command
    pub fn on_result(
        &mut self,
        ticket: &DispatchTicket,
        result: String,
        now: u64,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        if !self.is_current(ticket) {
            warn!(
                "Ignoring stale result for task {} command {}",
                ticket.task_id, ticket.index
            );
            return actions;
        }

        self.phase = EnginePhase::Advancing;

        let finished = match self.registry.get_mut(&ticket.task_id) {
            Some(task) => {
                task.results.push(result);
                task.cursor += 1;
                task.is_exhausted()
            }
            None => {
                error!("Active task {} missing from registry", ticket.task_id);
                self.release();
                self.admit_next(now, &mut actions);
                return actions;
            }
        };

        if finished {
            self.finalize(&ticket.task_id, Outcome::Completed, now, &mut actions);
        } else {
            self.phase = EnginePhase::Admitted;
            self.drive(now, &mut actions);
        }

        self.admit_next(now, &mut actions);
        actions
    }

    /// Apply an interpreter-signalled failure for a dispatched sub-command
    pub fn on_error(
        &mut self,
        ticket: &DispatchTicket,
        message: String,
        now: u64,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        if !self.is_current(ticket) {
            warn!(
                "Ignoring stale error for task {} command {}: {}",
                ticket.task_id, ticket.index, message
            );
            return actions;
        }

        self.finalize(
            &ticket.task_id,
            Outcome::Failed(TaskError::Execution(message).to_string()),
            now,
            &mut actions,
        );
        self.admit_next(now, &mut actions);
        actions
    }

    /// Fail whatever task holds the engine
    pub fn fail_active(&mut self, message: impl Into<String>, now: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        if let Some(id) = self.active.clone() {
            self.finalize(&id, Outcome::Failed(message.into()), now, &mut actions);
            self.admit_next(now, &mut actions);
        }
        actions
    }

    /// Fail running tasks whose current sub-command exceeded the timeout
    ///
    /// Called on every scheduler tick.
    pub fn check_timeouts(&mut self, now: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        for id in self.registry.timed_out(now, self.config.task_timeout_ms) {
            warn!("Task {} timed out", id);
            self.finalize(
                &id,
                Outcome::Failed(TaskError::Timeout.to_string()),
                now,
                &mut actions,
            );
        }

        self.admit_next(now, &mut actions);
        actions
    }

    /// Forget queued tasks of a closed connection; the active task keeps running
    pub fn on_disconnect(&mut self, owner: ConnectionId) {
        let dropped = self.registry.drop_pending_for(owner);
        if !dropped.is_empty() {
            info!(
                "Dropped {} queued task(s) of connection {}",
                dropped.len(),
                owner
            );
        }
    }

    fn is_current(&self, ticket: &DispatchTicket) -> bool {
        self.phase == EnginePhase::Executing
            && self.active.as_deref() == Some(ticket.task_id.as_str())
            && self
                .registry
                .get(&ticket.task_id)
                .is_some_and(|t| t.cursor == ticket.index)
    }

    /// Admit queued tasks until one is executing or the queue is empty
    fn admit_next(&mut self, now: u64, actions: &mut Vec<EngineAction>) {
        while self.active.is_none() {
            let Some(id) = self.registry.next_pending() else {
                break;
            };
            debug!("Admitting task {}", id);
            self.active = Some(id);
            self.phase = EnginePhase::Admitted;
            self.drive(now, actions);
        }
    }

    /// Dispatch the next executable command of the active task, skipping
    /// undecodable ones, or finish the task when none remain
    fn drive(&mut self, now: u64, actions: &mut Vec<EngineAction>) {
        let Some(id) = self.active.clone() else {
            return;
        };

        loop {
            let Some(task) = self.registry.get_mut(&id) else {
                error!("Active task {} missing from registry", id);
                self.release();
                return;
            };

            let Some(raw) = task.current_command() else {
                self.finalize(&id, Outcome::Completed, now, actions);
                return;
            };

            match parse_command(raw) {
                ParsedCommand::Skip(reason) => {
                    debug!(
                        "Skipping command {} of task {}: {:?}",
                        task.cursor, id, reason
                    );
                    task.cursor += 1;
                    task.skipped += 1;
                }
                ParsedCommand::Execute(instruction) => {
                    let index = task.cursor;
                    let owner = task.owner;
                    task.started_at = Some(now);

                    if let Err(err) = self.registry.transition(&id, TaskStatus::Running) {
                        error!("{}", err);
                        self.finalize(&id, Outcome::Failed(err.to_string()), now, actions);
                        return;
                    }

                    debug!(
                        "Dispatching command {} of task {}: token={:?} args={}",
                        index, id, instruction.token as char, instruction.len
                    );

                    self.phase = EnginePhase::Executing;
                    actions.push(EngineAction::Running {
                        owner,
                        task_id: id.clone(),
                        index,
                    });
                    actions.push(EngineAction::Dispatch {
                        ticket: DispatchTicket {
                            task_id: id.clone(),
                            index,
                        },
                        instruction,
                    });
                    return;
                }
            }
        }
    }

    /// Move a task to its terminal state, report it and purge it
    fn finalize(
        &mut self,
        id: &str,
        outcome: Outcome,
        now: u64,
        actions: &mut Vec<EngineAction>,
    ) {
        let status = match outcome {
            Outcome::Completed => TaskStatus::Completed,
            Outcome::Failed(_) => TaskStatus::Failed,
        };

        if let Err(err) = self.registry.transition(id, status) {
            error!("{}", err);
        }

        if let Some(mut task) = self.registry.remove(id) {
            if !task.status.is_terminal() {
                warn!("Purging task {} while still {}", id, task.status);
            }
            let finished = *task.finished_at.insert(now);
            let elapsed = finished.saturating_sub(task.submitted_at);

            match outcome {
                Outcome::Completed => {
                    info!(
                        "Task {} completed: {} results, {} skipped, {}ms",
                        id,
                        task.results.len(),
                        task.skipped,
                        elapsed
                    );
                    actions.push(EngineAction::Completed {
                        owner: task.owner,
                        task_id: task.id,
                        results: task.results,
                    });
                }
                Outcome::Failed(error) => {
                    warn!("Task {} failed after {}ms: {}", id, elapsed, error);
                    actions.push(EngineAction::Failed {
                        owner: task.owner,
                        task_id: task.id,
                        error,
                    });
                }
            }
        }

        if self.active.as_deref() == Some(id) {
            self.release();
        }
    }

    fn release(&mut self) {
        self.active = None;
        self.phase = EnginePhase::Idle;
    }
}

impl Default for DispatchEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

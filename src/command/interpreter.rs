//! Device interpreter seam
//!
//! The interpreter receives one decoded instruction at a time and reports
//! its outcome later through the scheduler's report channel, so that every
//! engine mutation happens on the scheduler loop.

use super::engine::DispatchTicket;
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webtask_shared::Instruction;

/// Outcome of one dispatched instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterReport {
    pub ticket: DispatchTicket,
    /// Textual result, or an error message that fails the task
    pub outcome: Result<String, String>,
}

/// Executes decoded instructions on the device
pub trait DeviceInterpreter: Send {
    /// Start executing `instruction`; the outcome must be reported exactly once
    fn execute(&mut self, ticket: DispatchTicket, instruction: Instruction);
}

/// Raw bytes written to the motion controller: token, args, terminator
pub fn serial_frame(instruction: &Instruction) -> Bytes {
    let mut frame = BytesMut::with_capacity(1 + instruction.params.len());
    frame.put_u8(instruction.token);
    frame.put_slice(&instruction.params);
    frame.freeze()
}

/// Bench interpreter that answers every instruction after a fixed latency
///
/// Printable tokens are echoed back the way the controller acknowledges a
/// command; anything else fails with `Unknown token`.
pub struct SimulatedInterpreter {
    latency: Duration,
    reports: mpsc::UnboundedSender<InterpreterReport>,
}

impl SimulatedInterpreter {
    pub fn new(latency: Duration, reports: mpsc::UnboundedSender<InterpreterReport>) -> Self {
        Self { latency, reports }
    }

    fn respond(instruction: &Instruction) -> Result<String, String> {
        if instruction.token.is_ascii_graphic() {
            Ok((instruction.token as char).to_string())
        } else {
            Err("Unknown token".into())
        }
    }
}

impl DeviceInterpreter for SimulatedInterpreter {
    fn execute(&mut self, ticket: DispatchTicket, instruction: Instruction) {
        let frame = serial_frame(&instruction);
        debug!(
            "[INTERP] task={} cmd={} frame={:02x?}",
            ticket.task_id, ticket.index, &frame[..]
        );

        let latency = self.latency;
        let reports = self.reports.clone();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let report = InterpreterReport {
                outcome: Self::respond(&instruction),
                ticket,
            };
            if reports.send(report).is_err() {
                warn!("[INTERP] Scheduler gone, dropping result");
            }
        });
    }
}

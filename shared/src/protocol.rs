//! JSON wire protocol between clients and the device
//!
//! Every frame is one JSON object with a `type` field.
//!
//! Inbound (client -> device):
//! ```text
//! {"type":"heartbeat"}
//! {"type":"command","taskId":"T1","commands":["F10","b64:SQDi"]}
//! ```
//!
//! Outbound (device -> client):
//! ```text
//! {"type":"heartbeat","timestamp":123}
//! {"type":"response","taskId":"T1","status":"running","index":0}
//! {"type":"response","taskId":"T1","status":"completed","results":["ok","ok"]}
//! {"type":"response","taskId":"T1","status":"error","error":"Task timeout"}
//! {"type":"error","error":"Invalid JSON format"}
//! {"type":"event_cam","x":-12.0,"y":4.5,"width":30,"height":40,"timestamp":123}
//! {"type":"event_us","distance":42,"timestamp":123}
//! ```
//!
//! A `running` response is sent for every dispatched sub-command, not once
//! per task; `index` names the sub-command.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while reading an inbound frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid JSON format")]
    InvalidJson,

    #[error("Invalid command format")]
    InvalidCommand,
}

/// A parsed inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Heartbeat,
    Command(CommandRequest),
    /// Well-formed frame with a type the device does not handle
    Unknown(String),
}

/// A submitted command group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Client-chosen id; the device generates one when absent
    pub task_id: Option<String>,
    pub commands: Vec<String>,
}

#[derive(Deserialize)]
struct RawCommand {
    #[serde(rename = "taskId", default)]
    task_id: Option<Value>,
    commands: Vec<String>,
}

/// Parse one inbound text frame
pub fn parse_inbound(text: &str) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::InvalidJson)?;

    match kind {
        "heartbeat" => Ok(Inbound::Heartbeat),
        "command" => {
            let raw: RawCommand =
                serde_json::from_value(value).map_err(|_| ProtocolError::InvalidCommand)?;

            let task_id = match raw.task_id {
                Some(Value::String(s)) if !s.is_empty() => Some(s),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            };

            Ok(Inbound::Command(CommandRequest {
                task_id,
                commands: raw.commands,
            }))
        }
        other => Ok(Inbound::Unknown(other.to_string())),
    }
}

/// Status carried by a task response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Running,
    Completed,
    Error,
}

/// Per-task response routed to the owning connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub task_id: String,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResponse {
    /// Sub-command `index` was handed to the interpreter
    pub fn running(task_id: impl Into<String>, index: usize) -> Self {
        Self {
            task_id: task_id.into(),
            status: ResponseStatus::Running,
            index: Some(index),
            results: None,
            error: None,
        }
    }

    /// Every sub-command finished
    pub fn completed(task_id: impl Into<String>, results: Vec<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: ResponseStatus::Completed,
            index: None,
            results: Some(results),
            error: None,
        }
    }

    /// The task failed or was rejected
    pub fn error(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: ResponseStatus::Error,
            index: None,
            results: None,
            error: Some(error.into()),
        }
    }
}

/// Frames sent by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Heartbeat {
        timestamp: u64,
    },
    Response(TaskResponse),
    Error {
        error: String,
    },
    EventCam {
        x: f64,
        y: f64,
        width: i32,
        height: i32,
        timestamp: u64,
    },
    EventUs {
        distance: i32,
        timestamp: u64,
    },
}

impl Outbound {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames sent by clients, for client-side use
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame<'a> {
    Heartbeat {
        timestamp: u64,
    },
    Command {
        #[serde(rename = "taskId")]
        task_id: &'a str,
        commands: &'a [String],
    },
}

//! Command execution infrastructure for the device
//!
//! This module handles:
//! - Owning submitted tasks and their lifecycle
//! - Driving one task's sub-commands at a time
//! - Handing decoded instructions to the device interpreter
//! - Timeout supervision of the in-flight sub-command

mod engine;
mod interpreter;
mod registry;
mod task;

pub use engine::{BusyPolicy, DispatchEngine, DispatchTicket, EngineAction, EngineConfig};
pub use interpreter::{DeviceInterpreter, InterpreterReport, SimulatedInterpreter};

//! Session management for the device connection
//!
//! This module handles:
//! - Connecting to the device WebSocket
//! - Sending client frames and reading device frames
//! - Noticing unacknowledged heartbeats and reconnecting with backoff

mod connection;
mod heartbeat;
mod reconnect;

pub use connection::DeviceSession;
pub use heartbeat::HeartbeatMonitor;
pub use reconnect::{reconnect, ReconnectPolicy};

//! Connection management for client sessions
//!
//! This module handles:
//! - Accepting WebSocket clients
//! - Forwarding inbound text frames to the scheduler
//! - Per-connection outbound delivery

mod manager;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionManager};

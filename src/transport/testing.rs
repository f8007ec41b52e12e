//! In-memory transport for tests

use super::{ConnectionId, Outbound};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

/// Records every frame instead of sending it
#[derive(Default)]
pub struct RecordingOutbound {
    open: Mutex<Vec<ConnectionId>>,
    backed_up: Mutex<Vec<ConnectionId>>,
    sent: Mutex<Vec<(ConnectionId, String)>>,
}

impl RecordingOutbound {
    pub fn with_connections(open: &[ConnectionId]) -> Self {
        Self {
            open: Mutex::new(open.to_vec()),
            ..Default::default()
        }
    }

    /// Make `offer` refuse frames for a connection while `send` still works
    pub fn back_up(&self, connection: ConnectionId) {
        self.backed_up.lock().unwrap().push(connection);
    }

    pub fn close(&self, connection: ConnectionId) {
        self.open.lock().unwrap().retain(|&c| c != connection);
    }

    /// Drain recorded frames, parsed as JSON
    pub fn take(&self) -> Vec<(ConnectionId, Value)> {
        self.sent
            .lock()
            .unwrap()
            .drain(..)
            .map(|(c, text)| (c, serde_json::from_str(&text).expect("frame is not JSON")))
            .collect()
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send(&self, connection: ConnectionId, text: String) -> Result<()> {
        if !self.open.lock().unwrap().contains(&connection) {
            return Err(anyhow!("Connection {} not open", connection));
        }
        self.sent.lock().unwrap().push((connection, text));
        Ok(())
    }

    async fn offer(&self, connection: ConnectionId, text: String) -> Result<()> {
        if self.backed_up.lock().unwrap().contains(&connection) {
            return Err(anyhow!("Connection {} busy", connection));
        }
        self.send(connection, text).await
    }

    async fn connections(&self) -> Vec<ConnectionId> {
        self.open.lock().unwrap().clone()
    }
}

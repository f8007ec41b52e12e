//! Outbound transport abstraction for pluggable connection backends

use anyhow::Result;
use async_trait::async_trait;

/// Identifier of one client connection, unique for the device's lifetime
pub type ConnectionId = u64;

/// Sends text frames to connected clients
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Send one text frame to a single connection
    async fn send(&self, connection: ConnectionId, text: String) -> Result<()>;

    /// Send a frame that may be dropped when the connection is backed up
    ///
    /// Used for broadcasts so they never take the room [`Outbound::send`]
    /// needs for task responses.
    async fn offer(&self, connection: ConnectionId, text: String) -> Result<()>;

    /// Currently open connections
    async fn connections(&self) -> Vec<ConnectionId>;
}

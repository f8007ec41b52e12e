//! Client notification gateway - formats and routes outbound frames

use crate::transport::{ConnectionId, Outbound};
use std::sync::Arc;
use tracing::{debug, warn};
use webtask_shared::{Outbound as Frame, ProtocolError, TaskResponse};

/// Sensor frame size used to centre camera coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRange {
    pub x: f64,
    pub y: f64,
}

impl Default for FrameRange {
    fn default() -> Self {
        Self { x: 320.0, y: 240.0 }
    }
}

/// Sends task status, errors, heartbeat acks and sensor broadcasts
///
/// Delivery failures are logged and swallowed; they never affect task state.
pub struct NotificationGateway {
    outbound: Arc<dyn Outbound>,
    frame: FrameRange,
}

impl NotificationGateway {
    pub fn new(outbound: Arc<dyn Outbound>, frame: FrameRange) -> Self {
        Self { outbound, frame }
    }

    /// Sub-command `index` of a task was dispatched
    pub async fn running(&self, owner: ConnectionId, task_id: &str, index: usize) {
        self.send_to(owner, &Frame::Response(TaskResponse::running(task_id, index)))
            .await;
    }

    pub async fn completed(&self, owner: ConnectionId, task_id: &str, results: Vec<String>) {
        self.send_to(owner, &Frame::Response(TaskResponse::completed(task_id, results)))
            .await;
    }

    /// Task failed, timed out or was refused
    pub async fn task_error(&self, owner: ConnectionId, task_id: &str, error: &str) {
        self.send_to(owner, &Frame::Response(TaskResponse::error(task_id, error)))
            .await;
    }

    /// Inbound frame could not be understood
    pub async fn malformed(&self, connection: ConnectionId, error: &ProtocolError) {
        self.send_to(
            connection,
            &Frame::Error {
                error: error.to_string(),
            },
        )
        .await;
    }

    pub async fn heartbeat_ack(&self, connection: ConnectionId, timestamp: u64) {
        self.send_to(connection, &Frame::Heartbeat { timestamp }).await;
    }

    /// Broadcast a camera detection; raw coordinates are re-centred on the frame
    pub async fn broadcast_camera(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        timestamp: u64,
    ) -> usize {
        let frame = Frame::EventCam {
            x: f64::from(x) - self.frame.x / 2.0,
            y: f64::from(y) - self.frame.y / 2.0,
            width,
            height,
            timestamp,
        };
        self.broadcast(&frame).await
    }

    pub async fn broadcast_ultrasonic(&self, distance: i32, timestamp: u64) -> usize {
        self.broadcast(&Frame::EventUs {
            distance,
            timestamp,
        })
        .await
    }

    async fn send_to(&self, connection: ConnectionId, frame: &Frame) {
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize frame for {}: {}", connection, e);
                return;
            }
        };

        if let Err(e) = self.outbound.send(connection, text).await {
            warn!("Failed to notify connection {}: {}", connection, e);
        }
    }

    /// Offer to every open connection, returning how many accepted the frame
    async fn broadcast(&self, frame: &Frame) -> usize {
        let connections = self.outbound.connections().await;
        if connections.is_empty() {
            return 0;
        }

        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize broadcast: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for connection in connections {
            match self.outbound.offer(connection, text.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Broadcast to {} failed: {}", connection, e),
            }
        }
        delivered
    }
}

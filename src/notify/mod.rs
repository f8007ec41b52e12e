//! Client notification gateway
//!
//! Every message the device sends to clients is built here:
//! - task responses (running / completed / error) to the owning connection
//! - protocol errors and heartbeat acks to the sender
//! - sensor event broadcasts to all connections

mod gateway;

pub use gateway::{FrameRange, NotificationGateway};

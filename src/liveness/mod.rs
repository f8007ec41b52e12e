//! Liveness Module
//!
//! Tracks when each connection was last heard from. Disconnecting stale
//! connections is left to the transport.

mod tracker;

pub use tracker::LivenessTracker;

//! Device configuration
//!
//! Defaults come from [`DeviceConfig::default`]; command-line flags override
//! individual fields. Log verbosity is controlled by `RUST_LOG`.

use crate::command::{BusyPolicy, EngineConfig};
use crate::connection::ConnectionConfig;
use crate::sensors::SensorConfig;
use clap::Parser;
use std::time::Duration;
use webtask_shared::timing;

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub connection: ConnectionConfig,
    pub engine: EngineConfig,
    pub sensors: SensorConfig,
    /// Scheduler tick driving timeout supervision
    pub tick: Duration,
    /// Stale-connection sweep interval
    pub heartbeat_interval: Duration,
    /// Silence after which a connection counts as stale
    pub heartbeat_timeout_ms: u64,
    /// Latency of the simulated interpreter
    pub interpreter_latency: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            engine: EngineConfig::default(),
            sensors: SensorConfig::default(),
            tick: Duration::from_millis(timing::SCHEDULER_TICK_MS),
            heartbeat_interval: Duration::from_millis(timing::HEARTBEAT_INTERVAL_MS),
            heartbeat_timeout_ms: timing::HEARTBEAT_TIMEOUT_MS,
            interpreter_latency: Duration::from_millis(200),
        }
    }
}

/// Command-line overrides
#[derive(Debug, Parser)]
#[command(name = "webtask-device", about = "Serial command-group executor for a networked controller")]
pub struct Args {
    /// WebSocket listen address
    #[arg(long, default_value = "0.0.0.0:81")]
    pub listen: String,

    /// Per sub-command timeout in milliseconds
    #[arg(long, default_value_t = timing::TASK_TIMEOUT_MS)]
    pub task_timeout_ms: u64,

    /// Queue up to this many tasks while one runs instead of rejecting them
    #[arg(long)]
    pub queue: Option<usize>,

    /// Simulated interpreter latency in milliseconds
    #[arg(long, default_value_t = 200)]
    pub latency_ms: u64,

    /// Emit simulated camera and ultrasonic events
    #[arg(long)]
    pub simulate_sensors: bool,
}

impl Args {
    pub fn into_config(self) -> DeviceConfig {
        let mut config = DeviceConfig::default();

        config.connection.listen_addr = self.listen;
        config.engine.task_timeout_ms = self.task_timeout_ms;
        config.engine.busy_policy = match self.queue {
            Some(capacity) if capacity > 0 => BusyPolicy::Queue { capacity },
            _ => BusyPolicy::Reject,
        };
        config.interpreter_latency = Duration::from_millis(self.latency_ms);
        config.sensors.simulate = self.simulate_sensors;

        config
    }
}

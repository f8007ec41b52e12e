mod command;
mod config;
mod connection;
mod liveness;
mod notify;
mod scheduler;
mod sensors;
mod transport;

use clap::Parser;
use command::SimulatedInterpreter;
use config::Args;
use connection::ConnectionManager;
use notify::{FrameRange, NotificationGateway};
use scheduler::{Scheduler, SchedulerInputs};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = Args::parse().into_config();

    info!("Webtask device starting");
    info!("  Busy policy: {:?}", config.engine.busy_policy);
    info!("  Task timeout: {}ms", config.engine.task_timeout_ms);

    let (hub, connections) = ConnectionManager::bind(config.connection.clone()).await?;
    info!("Accepting clients on ws://{}", hub.local_addr());

    let (report_tx, reports) = mpsc::unbounded_channel();
    let interpreter = SimulatedInterpreter::new(config.interpreter_latency, report_tx);
    info!(
        "Simulated interpreter ready (latency {:?})",
        config.interpreter_latency
    );

    let (sensor_tx, sensors) = mpsc::channel(32);
    let _sensor_handle = if config.sensors.simulate {
        Some(sensors::spawn_simulated(&config.sensors, sensor_tx.clone()))
    } else {
        None
    };

    let frame = FrameRange {
        x: config.sensors.frame_range_x,
        y: config.sensors.frame_range_y,
    };
    let gateway = NotificationGateway::new(Arc::new(hub), frame);
    let scheduler = Scheduler::new(&config, gateway, interpreter);

    let inputs = SchedulerInputs {
        connections,
        reports,
        sensors,
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Ctrl-C received");
    };

    let result = scheduler.run(inputs, shutdown).await;
    drop(sensor_tx);

    if let Err(e) = &result {
        error!("Scheduler stopped: {}", e);
    }
    result
}

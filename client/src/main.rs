mod command;
mod session;

use anyhow::{bail, Result};
use clap::Parser;
use command::{prepare_command, skipped_commands, TaskTracker, TaskUpdate};
use session::{reconnect, DeviceSession, HeartbeatMonitor, ReconnectPolicy};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use webtask_shared::protocol::ClientFrame;
use webtask_shared::{now_ms, timing, Outbound};

/// Submit one command group to a device and wait for its result
#[derive(Debug, Parser)]
#[command(name = "webtask-client")]
struct Args {
    /// Device WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:81")]
    url: String,

    /// Task id; defaults to the current time in milliseconds
    #[arg(long)]
    task_id: Option<String>,

    /// Send every command in encoded form
    #[arg(long)]
    b64: bool,

    /// Give up waiting for a terminal response after this many milliseconds
    #[arg(long, default_value_t = timing::CLIENT_TASK_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Commands, executed in order
    #[arg(required = true)]
    commands: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let task_id = args.task_id.unwrap_or_else(|| now_ms().to_string());
    let commands: Vec<String> = args
        .commands
        .iter()
        .map(|c| prepare_command(c, args.b64))
        .collect();

    for index in skipped_commands(&commands) {
        warn!("Command {} ({:?}) will be skipped by the device", index, commands[index]);
    }

    let policy = ReconnectPolicy::default();
    let mut session = DeviceSession::connect(&args.url, policy.connect_timeout).await?;
    info!("Connected to {}", session.url());

    let mut tracker = TaskTracker::new(args.timeout_ms);
    tracker.track(&task_id, commands.len(), now_ms());
    submit(&mut session, &task_id, &commands).await?;

    let mut monitor = HeartbeatMonitor::new(timing::HEARTBEAT_TIMEOUT_MS, now_ms());
    let mut heartbeat = interval(Duration::from_millis(timing::HEARTBEAT_INTERVAL_MS));
    let mut deadline_check = interval(Duration::from_millis(250));
    let mut started = false;

    let outcome = loop {
        let lost = tokio::select! {
            _ = heartbeat.tick() => {
                if monitor.is_overdue(now_ms()) {
                    Some("Heartbeat timeout".to_string())
                } else {
                    session
                        .send(&ClientFrame::Heartbeat { timestamp: now_ms() })
                        .await
                        .err()
                        .map(|e| format!("Heartbeat send failed: {}", e))
                }
            }

            _ = deadline_check.tick() => {
                if let Some(task) = tracker.expire(now_ms()).pop() {
                    break Err(format!(
                        "Task {} ({} commands) got no response within {}ms",
                        task.task_id, task.commands, args.timeout_ms
                    ));
                }
                None
            }

            frame = session.recv() => match frame {
                Err(e) => Some(format!("Read error: {}", e)),
                Ok(None) => Some("Device closed the connection".to_string()),
                Ok(Some(Outbound::Heartbeat { timestamp })) => {
                    debug!("<<< heartbeat ack (device time {})", timestamp);
                    monitor.ack(now_ms());
                    None
                }
                Ok(Some(Outbound::Error { error })) => {
                    break Err(format!("Device refused the request: {}", error));
                }
                Ok(Some(Outbound::EventCam { x, y, width, height, .. })) => {
                    info!("<<< camera: ({:.1}, {:.1}) {}x{}", x, y, width, height);
                    None
                }
                Ok(Some(Outbound::EventUs { distance, .. })) => {
                    info!("<<< ultrasonic: {}cm", distance);
                    None
                }
                Ok(Some(Outbound::Response(response))) => {
                    match tracker.handle(&response, now_ms()) {
                        Some(TaskUpdate::Progress { task_id, index }) => {
                            info!("<<< task {} running command {:?}", task_id, index);
                            started = true;
                        }
                        Some(TaskUpdate::Completed { task_id, results, elapsed_ms }) => {
                            info!("<<< task {} completed in {}ms", task_id, elapsed_ms);
                            break Ok(results);
                        }
                        Some(TaskUpdate::Failed { task_id, error }) => {
                            break Err(format!("Task {} failed: {}", task_id, error));
                        }
                        None => warn!("<<< response for unknown task {}", response.task_id),
                    }
                    None
                }
            }
        };

        let Some(reason) = lost else { continue };

        // Responses for a running task go to the connection that submitted it
        if started {
            break Err(format!(
                "Connection lost while task {} was running: {}",
                task_id, reason
            ));
        }

        warn!("Connection lost before task {} started: {}", task_id, reason);
        session = match reconnect(&args.url, &policy).await {
            Ok(session) => session,
            Err(e) => break Err(e.to_string()),
        };
        monitor.ack(now_ms());
        if let Err(e) = submit(&mut session, &task_id, &commands).await {
            break Err(format!("Resubmitting task {} failed: {}", task_id, e));
        }
    };

    if !tracker.is_empty() {
        warn!("Closing with task {} still pending", task_id);
    }
    session.close().await;

    match outcome {
        Ok(results) => {
            println!("{}", serde_json::to_string(&results)?);
            Ok(())
        }
        Err(e) => bail!(e),
    }
}

async fn submit(session: &mut DeviceSession, task_id: &str, commands: &[String]) -> Result<()> {
    session.send(&ClientFrame::Command { task_id, commands }).await?;
    info!(">>> Sent task {} ({} commands)", task_id, commands.len());
    Ok(())
}

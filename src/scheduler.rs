//! The device's single cooperative loop
//!
//! Connection events, interpreter reports, sensor readings and clock ticks
//! are all funnelled into one `select!` loop. The dispatch engine is owned
//! here and only ever touched from this loop.

use crate::command::{
    DeviceInterpreter, DispatchEngine, DispatchTicket, EngineAction, InterpreterReport,
};
use crate::config::DeviceConfig;
use crate::connection::ConnectionEvent;
use crate::liveness::LivenessTracker;
use crate::notify::NotificationGateway;
use crate::sensors::SensorEvent;
use crate::transport::ConnectionId;
use anyhow::{anyhow, Result};
use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use webtask_shared::protocol::parse_inbound;
use webtask_shared::{Inbound, Instruction};

/// Channels feeding the scheduler
pub struct SchedulerInputs {
    pub connections: mpsc::Receiver<ConnectionEvent>,
    pub reports: mpsc::UnboundedReceiver<InterpreterReport>,
    pub sensors: mpsc::Receiver<SensorEvent>,
}

pub struct Scheduler<I: DeviceInterpreter> {
    engine: DispatchEngine,
    gateway: NotificationGateway,
    liveness: LivenessTracker,
    interpreter: I,
    started: Instant,
    tick: Duration,
    sweep_interval: Duration,
}

impl<I: DeviceInterpreter> Scheduler<I> {
    pub fn new(config: &DeviceConfig, gateway: NotificationGateway, interpreter: I) -> Self {
        Self {
            engine: DispatchEngine::new(config.engine.clone()),
            gateway,
            liveness: LivenessTracker::new(config.heartbeat_timeout_ms),
            interpreter,
            started: Instant::now(),
            tick: config.tick,
            sweep_interval: config.heartbeat_interval,
        }
    }

    /// Milliseconds on the device's monotonic clock
    fn now(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Run until `shutdown` resolves or the connection hub goes away
    pub async fn run(
        mut self,
        mut inputs: SchedulerInputs,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweeper = tokio::time::interval(self.sweep_interval);
        sweeper.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "Scheduler running (tick {:?}, liveness sweep {:?})",
            self.tick, self.sweep_interval
        );

        loop {
            tokio::select! {
                event = inputs.connections.recv() => match event {
                    Some(event) => {
                        let now = self.now();
                        self.on_connection_event(event, now).await;
                    }
                    None => {
                        let now = self.now();
                        self.shutdown(now).await;
                        return Err(anyhow!("Connection hub closed"));
                    }
                },

                Some(report) = inputs.reports.recv() => {
                    let now = self.now();
                    self.on_report(report, now).await;
                }

                Some(event) = inputs.sensors.recv() => {
                    let now = self.now();
                    self.on_sensor(event, now).await;
                }

                _ = ticker.tick() => {
                    let now = self.now();
                    self.on_tick(now).await;
                }

                _ = sweeper.tick() => {
                    let now = self.now();
                    self.sweep(now);
                }

                _ = &mut shutdown => {
                    let now = self.now();
                    self.shutdown(now).await;
                    return Ok(());
                }
            }
        }
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent, now: u64) {
        match event {
            ConnectionEvent::Connected { connection, addr } => {
                info!("Client {} connected from {}", connection, addr);
                self.liveness.connect(connection, now);
            }
            ConnectionEvent::Disconnected { connection, reason } => {
                info!("Client {} disconnected: {}", connection, reason);
                self.liveness.disconnect(connection);
                self.engine.on_disconnect(connection);
            }
            ConnectionEvent::Message { connection, text } => {
                self.on_message(connection, &text, now).await;
            }
        }
    }

    async fn on_message(&mut self, connection: ConnectionId, text: &str, now: u64) {
        match parse_inbound(text) {
            Ok(Inbound::Heartbeat) => {
                debug!("Heartbeat from {}", connection);
                self.liveness.touch(connection, now);
                self.gateway.heartbeat_ack(connection, now).await;
            }
            Ok(Inbound::Command(request)) => {
                self.liveness.touch(connection, now);
                let actions = self.engine.submit(connection, request, now);
                self.apply(actions).await;
            }
            Ok(Inbound::Unknown(kind)) => {
                debug!("Ignoring '{}' message from {}", kind, connection);
            }
            Err(e) => {
                warn!("Malformed message from {}: {}", connection, e);
                self.gateway.malformed(connection, &e).await;
            }
        }
    }

    async fn on_report(&mut self, report: InterpreterReport, now: u64) {
        let actions = match report.outcome {
            Ok(result) => self.engine.on_result(&report.ticket, result, now),
            Err(message) => self.engine.on_error(&report.ticket, message, now),
        };
        self.apply(actions).await;
    }

    async fn on_sensor(&mut self, event: SensorEvent, now: u64) {
        let delivered = match event {
            SensorEvent::Camera {
                x,
                y,
                width,
                height,
            } => {
                self.gateway
                    .broadcast_camera(x, y, width, height, now)
                    .await
            }
            SensorEvent::Ultrasonic { distance } => {
                self.gateway.broadcast_ultrasonic(distance, now).await
            }
        };
        debug!("Sensor event {:?} delivered to {} client(s)", event, delivered);
    }

    async fn on_tick(&mut self, now: u64) {
        let actions = self.engine.check_timeouts(now);
        self.apply(actions).await;
    }

    fn sweep(&mut self, now: u64) {
        debug!(
            "Liveness sweep: {} client(s), engine {:?}, {} task(s) held, {} waiting",
            self.liveness.len(),
            self.engine.phase(),
            self.engine.registry().len(),
            self.engine.registry().pending_count()
        );

        for connection in self.liveness.sweep(now) {
            let silent = self
                .liveness
                .last_seen(connection)
                .map(|seen| now.saturating_sub(seen))
                .unwrap_or_default();
            warn!("Client {} silent for {}ms", connection, silent);
        }
    }

    /// Fail the in-flight task so its owner is not left waiting
    async fn shutdown(&mut self, now: u64) {
        match self.engine.active_task() {
            Some(task) => info!(
                "Scheduler stopping with task {} at command {}/{}",
                task.id,
                task.cursor,
                task.commands.len()
            ),
            None => info!("Scheduler stopping"),
        }
        let actions = self.engine.fail_active("Device shutting down", now);
        self.apply(actions).await;
    }

    fn dispatch(&mut self, ticket: DispatchTicket, instruction: Instruction) {
        debug!(
            "Task {} command {} -> interpreter ({:?})",
            ticket.task_id, ticket.index, instruction.token as char
        );
        self.interpreter.execute(ticket, instruction);
    }

    /// Carry out engine actions in order
    async fn apply(&mut self, actions: Vec<EngineAction>) {
        for action in actions {
            match action {
                EngineAction::Dispatch {
                    ticket,
                    instruction,
                } => self.dispatch(ticket, instruction),
                EngineAction::Running {
                    owner,
                    task_id,
                    index,
                } => self.gateway.running(owner, &task_id, index).await,
                EngineAction::Completed {
                    owner,
                    task_id,
                    results,
                } => self.gateway.completed(owner, &task_id, results).await,
                EngineAction::Failed {
                    owner,
                    task_id,
                    error,
                }
                | EngineAction::Rejected {
                    owner,
                    task_id,
                    error,
                } => self.gateway.task_error(owner, &task_id, &error).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::BusyPolicy;
    use crate::notify::FrameRange;
    use crate::transport::testing::RecordingOutbound;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Records dispatches; results are fed back by the test
    #[derive(Clone, Default)]
    struct ManualInterpreter {
        dispatched: Arc<Mutex<Vec<(DispatchTicket, Instruction)>>>,
    }

    impl ManualInterpreter {
        fn take(&self) -> Vec<(DispatchTicket, Instruction)> {
            self.dispatched.lock().unwrap().drain(..).collect()
        }
    }

    impl DeviceInterpreter for ManualInterpreter {
        fn execute(&mut self, ticket: DispatchTicket, instruction: Instruction) {
            self.dispatched.lock().unwrap().push((ticket, instruction));
        }
    }

    struct Harness {
        scheduler: Scheduler<ManualInterpreter>,
        outbound: Arc<RecordingOutbound>,
        interpreter: ManualInterpreter,
    }

    fn harness(config: DeviceConfig) -> Harness {
        let outbound = Arc::new(RecordingOutbound::with_connections(&[1, 2]));
        let gateway = NotificationGateway::new(outbound.clone(), FrameRange::default());
        let interpreter = ManualInterpreter::default();
        let scheduler = Scheduler::new(&config, gateway, interpreter.clone());
        Harness {
            scheduler,
            outbound,
            interpreter,
        }
    }

    fn message(connection: ConnectionId, text: &str) -> ConnectionEvent {
        ConnectionEvent::Message {
            connection,
            text: text.into(),
        }
    }

    fn ok(ticket: DispatchTicket, result: &str) -> InterpreterReport {
        InterpreterReport {
            ticket,
            outcome: Ok(result.into()),
        }
    }

    #[tokio::test]
    async fn test_two_command_group_end_to_end() {
        let mut h = harness(DeviceConfig::default());

        h.scheduler
            .on_connection_event(
                message(
                    1,
                    r#"{"type":"command","taskId":"T1","commands":["F10","b64:SQDi"]}"#,
                ),
                0,
            )
            .await;

        assert_eq!(
            h.outbound.take(),
            vec![(1, json!({"type":"response","taskId":"T1","status":"running","index":0}))]
        );
        let mut dispatched = h.interpreter.take();
        assert_eq!(dispatched.len(), 1);
        let (ticket, instruction) = dispatched.remove(0);
        assert_eq!(instruction, Instruction::plain(b'F', b"10"));

        h.scheduler.on_report(ok(ticket, "ok"), 100).await;
        assert_eq!(
            h.outbound.take(),
            vec![(1, json!({"type":"response","taskId":"T1","status":"running","index":1}))]
        );
        let (ticket, instruction) = h.interpreter.take().remove(0);
        assert_eq!(instruction.token, b'I');
        assert_eq!(instruction.args(), &[0, 226]);

        h.scheduler.on_report(ok(ticket, "ok"), 200).await;
        assert_eq!(
            h.outbound.take(),
            vec![(
                1,
                json!({"type":"response","taskId":"T1","status":"completed","results":["ok","ok"]})
            )]
        );
        assert!(h.scheduler.engine.registry().is_empty());
    }

    #[tokio::test]
    async fn test_busy_submission_rejected_to_sender_only() {
        let mut h = harness(DeviceConfig::default());

        h.scheduler
            .on_connection_event(
                message(1, r#"{"type":"command","taskId":"T1","commands":["F10"]}"#),
                0,
            )
            .await;
        h.outbound.take();

        h.scheduler
            .on_connection_event(
                message(2, r#"{"type":"command","taskId":"T2","commands":["d"]}"#),
                5,
            )
            .await;

        assert_eq!(
            h.outbound.take(),
            vec![(
                2,
                json!({"type":"response","taskId":"T2","status":"error",
                       "error":"Previous web task is still running"})
            )]
        );
        assert_eq!(h.interpreter.take().len(), 1);
        assert_eq!(h.scheduler.engine.active_task_id(), Some("T1"));
    }

    #[tokio::test]
    async fn test_queued_task_runs_after_current() {
        let mut config = DeviceConfig::default();
        config.engine.busy_policy = BusyPolicy::Queue { capacity: 2 };
        let mut h = harness(config);

        h.scheduler
            .on_connection_event(
                message(1, r#"{"type":"command","taskId":"T1","commands":["a"]}"#),
                0,
            )
            .await;
        h.scheduler
            .on_connection_event(
                message(2, r#"{"type":"command","taskId":"T2","commands":["b"]}"#),
                1,
            )
            .await;
        h.outbound.take();

        let (ticket, _) = h.interpreter.take().remove(0);
        h.scheduler.on_report(ok(ticket, "a"), 2).await;

        assert_eq!(
            h.outbound.take(),
            vec![
                (1, json!({"type":"response","taskId":"T1","status":"completed","results":["a"]})),
                (2, json!({"type":"response","taskId":"T2","status":"running","index":0})),
            ]
        );
        assert_eq!(h.interpreter.take()[0].0.task_id, "T2");
    }

    #[tokio::test]
    async fn test_tick_times_out_task_and_drops_late_result() {
        let mut h = harness(DeviceConfig::default());

        h.scheduler
            .on_connection_event(
                message(1, r#"{"type":"command","taskId":"T1","commands":["F10","B20"]}"#),
                1_000,
            )
            .await;
        h.outbound.take();
        let (ticket, _) = h.interpreter.take().remove(0);

        h.scheduler.on_tick(31_000).await;
        assert!(h.outbound.take().is_empty());

        h.scheduler.on_tick(31_001).await;
        assert_eq!(
            h.outbound.take(),
            vec![(1, json!({"type":"response","taskId":"T1","status":"error","error":"Task timeout"}))]
        );

        h.scheduler.on_report(ok(ticket, "late"), 31_002).await;
        assert!(h.outbound.take().is_empty());
        assert!(h.interpreter.take().is_empty());
    }

    #[tokio::test]
    async fn test_interpreter_error_fails_task() {
        let mut h = harness(DeviceConfig::default());

        h.scheduler
            .on_connection_event(
                message(2, r#"{"type":"command","taskId":"T9","commands":["x","y"]}"#),
                0,
            )
            .await;
        h.outbound.take();
        let (ticket, _) = h.interpreter.take().remove(0);

        h.scheduler
            .on_report(
                InterpreterReport {
                    ticket,
                    outcome: Err("Unknown token".into()),
                },
                10,
            )
            .await;

        assert_eq!(
            h.outbound.take(),
            vec![(2, json!({"type":"response","taskId":"T9","status":"error","error":"Unknown token"}))]
        );
        assert!(h.interpreter.take().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_input_leaves_task_untouched() {
        let mut h = harness(DeviceConfig::default());

        h.scheduler
            .on_connection_event(
                message(1, r#"{"type":"command","taskId":"T1","commands":["a"]}"#),
                0,
            )
            .await;
        h.outbound.take();

        h.scheduler.on_connection_event(message(2, "not json"), 1).await;
        h.scheduler
            .on_connection_event(message(2, r#"{"type":"command","commands":"F10"}"#), 2)
            .await;
        h.scheduler
            .on_connection_event(message(2, r#"{"type":"telemetry"}"#), 3)
            .await;

        assert_eq!(
            h.outbound.take(),
            vec![
                (2, json!({"type":"error","error":"Invalid JSON format"})),
                (2, json!({"type":"error","error":"Invalid command format"})),
            ]
        );
        assert_eq!(h.scheduler.engine.active_task_id(), Some("T1"));
    }

    #[tokio::test]
    async fn test_heartbeat_acked_and_tracked() {
        let mut h = harness(DeviceConfig::default());
        let addr = "127.0.0.1:5000".parse().unwrap();

        h.scheduler
            .on_connection_event(
                ConnectionEvent::Connected {
                    connection: 1,
                    addr,
                },
                0,
            )
            .await;
        h.scheduler
            .on_connection_event(message(1, r#"{"type":"heartbeat"}"#), 9_000)
            .await;

        assert_eq!(
            h.outbound.take(),
            vec![(1, json!({"type":"heartbeat","timestamp":9000}))]
        );
        assert_eq!(h.scheduler.liveness.last_seen(1), Some(9_000));

        h.scheduler
            .on_connection_event(
                ConnectionEvent::Disconnected {
                    connection: 1,
                    reason: "bye".into(),
                },
                10_000,
            )
            .await;
        assert_eq!(h.scheduler.liveness.len(), 0);
    }

    #[tokio::test]
    async fn test_sensor_events_broadcast() {
        let mut h = harness(DeviceConfig::default());

        h.scheduler
            .on_sensor(SensorEvent::Ultrasonic { distance: 42 }, 77)
            .await;

        let expected = json!({"type":"event_us","distance":42,"timestamp":77});
        assert_eq!(h.outbound.take(), vec![(1, expected.clone()), (2, expected)]);
    }

    #[tokio::test]
    async fn test_owner_gone_before_completion() {
        let mut h = harness(DeviceConfig::default());

        h.scheduler
            .on_connection_event(
                message(1, r#"{"type":"command","taskId":"T1","commands":["a"]}"#),
                0,
            )
            .await;
        h.outbound.take();
        let (ticket, _) = h.interpreter.take().remove(0);

        h.outbound.close(1);
        h.scheduler
            .on_connection_event(
                ConnectionEvent::Disconnected {
                    connection: 1,
                    reason: "Client closed connection".into(),
                },
                1,
            )
            .await;

        // The active task runs to completion; the lost notification is swallowed
        h.scheduler.on_report(ok(ticket, "a"), 2).await;
        assert!(h.outbound.take().is_empty());
        assert!(h.scheduler.engine.registry().is_empty());
        assert_eq!(h.scheduler.engine.active_task_id(), None);
    }

    #[tokio::test]
    async fn test_shutdown_fails_active_task() {
        let mut h = harness(DeviceConfig::default());

        h.scheduler
            .on_connection_event(
                message(1, r#"{"type":"command","taskId":"T1","commands":["a"]}"#),
                0,
            )
            .await;
        h.outbound.take();

        h.scheduler.shutdown(5).await;
        assert_eq!(
            h.outbound.take(),
            vec![(
                1,
                json!({"type":"response","taskId":"T1","status":"error","error":"Device shutting down"})
            )]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let h = harness(DeviceConfig::default());
        let (_conn_tx, connections) = mpsc::channel(1);
        let (_report_tx, reports) = mpsc::unbounded_channel();
        let (_sensor_tx, sensors) = mpsc::channel(1);

        let inputs = SchedulerInputs {
            connections,
            reports,
            sensors,
        };
        h.scheduler
            .run(inputs, async {})
            .await
            .expect("scheduler failed");
    }
}

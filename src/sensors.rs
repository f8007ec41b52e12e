//! Sensor event producers
//!
//! Sensor readers push events into the scheduler; the gateway broadcasts
//! them to every connection regardless of task state.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A reading worth broadcasting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorEvent {
    /// Object detected by the camera, in raw sensor-frame pixels
    Camera {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    /// Ultrasonic range reading in centimetres
    Ultrasonic { distance: i32 },
}

#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Run the bench producer
    pub simulate: bool,
    /// Interval between simulated readings
    pub interval: Duration,
    /// Camera frame size, used to centre coordinates
    pub frame_range_x: f64,
    pub frame_range_y: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            simulate: false,
            interval: Duration::from_millis(500),
            frame_range_x: 320.0,
            frame_range_y: 240.0,
        }
    }
}

/// Bench producer alternating camera sweeps and ultrasonic readings
pub fn spawn_simulated(
    config: &SensorConfig,
    events: mpsc::Sender<SensorEvent>,
) -> JoinHandle<()> {
    let interval = config.interval;
    let width = config.frame_range_x as i32;
    let height = config.frame_range_y as i32;

    info!("[SENSOR] Simulated producer every {:?}", interval);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut step: i32 = 0;

        loop {
            ticker.tick().await;
            step = step.wrapping_add(1);

            let event = if step % 2 == 0 {
                SensorEvent::Camera {
                    x: (step * 7).rem_euclid(width.max(1)),
                    y: height / 2,
                    width: 24,
                    height: 24,
                }
            } else {
                SensorEvent::Ultrasonic {
                    distance: 10 + (step * 3).rem_euclid(90),
                }
            };

            if events.send(event).await.is_err() {
                debug!("[SENSOR] Scheduler gone, stopping producer");
                break;
            }
        }
    })
}

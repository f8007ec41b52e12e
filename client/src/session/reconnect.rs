//! Reconnection with bounded exponential backoff

use super::DeviceSession;
use anyhow::{bail, Result};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use webtask_shared::timing;

/// How often and how patiently to reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_attempts: u32,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(timing::RECONNECT_DELAY_MS),
            max_attempts: timing::MAX_RECONNECT_ATTEMPTS,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Wait before the 1-based `attempt`, or `None` once attempts run out
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1)?;
        self.initial_delay.checked_mul(factor)
    }
}

/// Reconnect to `url`, backing off between failed attempts
pub async fn reconnect(url: &str, policy: &ReconnectPolicy) -> Result<DeviceSession> {
    let mut attempt = 1;

    while let Some(delay) = policy.delay(attempt) {
        info!(
            "Reconnecting to {} in {:?} (attempt {}/{})",
            url, delay, attempt, policy.max_attempts
        );
        sleep(delay).await;

        match DeviceSession::connect(url, policy.connect_timeout).await {
            Ok(session) => {
                info!("Reconnected to {}", url);
                return Ok(session);
            }
            Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
        }
        attempt += 1;
    }

    bail!(
        "Gave up reconnecting to {} after {} attempts",
        url,
        policy.max_attempts
    )
}

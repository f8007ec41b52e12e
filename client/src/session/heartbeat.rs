//! Heartbeat acknowledgement deadline

/// Flags a connection whose heartbeats stopped being acknowledged
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    timeout_ms: u64,
    last_ack: u64,
}

impl HeartbeatMonitor {
    /// Start the clock at `now`, as if an ack had just arrived
    pub fn new(timeout_ms: u64, now: u64) -> Self {
        Self {
            timeout_ms,
            last_ack: now,
        }
    }

    /// Record an acknowledgement, or a fresh connection
    pub fn ack(&mut self, now: u64) {
        self.last_ack = now;
    }

    pub fn is_overdue(&self, now: u64) -> bool {
        now.saturating_sub(self.last_ack) > self.timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overdue_only_after_timeout() {
        let monitor = HeartbeatMonitor::new(15_000, 1_000);
        assert!(!monitor.is_overdue(1_000));
        assert!(!monitor.is_overdue(16_000));
        assert!(monitor.is_overdue(16_001));
    }

    #[test]
    fn test_ack_pushes_deadline_back() {
        let mut monitor = HeartbeatMonitor::new(15_000, 0);
        monitor.ack(10_000);
        assert!(!monitor.is_overdue(20_000));
        assert!(monitor.is_overdue(25_001));
    }

    #[test]
    fn test_clock_going_backwards_is_not_overdue() {
        let monitor = HeartbeatMonitor::new(15_000, 50_000);
        assert!(!monitor.is_overdue(10_000));
    }
}

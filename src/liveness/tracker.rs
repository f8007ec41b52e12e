//! Per-connection heartbeat tracking

use crate::transport::ConnectionId;
use std::collections::{HashMap, HashSet};
use webtask_shared::timing;

/// Last-seen timestamps per connection
#[derive(Debug)]
pub struct LivenessTracker {
    timeout_ms: u64,
    last_seen: HashMap<ConnectionId, u64>,
    /// Connections already reported stale, so a sweep only reports each once
    reported: HashSet<ConnectionId>,
}

impl LivenessTracker {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            last_seen: HashMap::new(),
            reported: HashSet::new(),
        }
    }

    /// Start tracking a new connection
    pub fn connect(&mut self, connection: ConnectionId, now: u64) {
        self.last_seen.insert(connection, now);
        self.reported.remove(&connection);
    }

    /// Stop tracking a closed connection
    pub fn disconnect(&mut self, connection: ConnectionId) {
        self.last_seen.remove(&connection);
        self.reported.remove(&connection);
    }

    /// Record activity (heartbeat or command submission)
    pub fn touch(&mut self, connection: ConnectionId, now: u64) {
        self.last_seen.insert(connection, now);
        self.reported.remove(&connection);
    }

    pub fn last_seen(&self, connection: ConnectionId) -> Option<u64> {
        self.last_seen.get(&connection).copied()
    }

    /// Whether the connection has been heard from within the timeout
    pub fn is_alive(&self, connection: ConnectionId, now: u64) -> bool {
        self.last_seen
            .get(&connection)
            .is_some_and(|&seen| now.saturating_sub(seen) <= self.timeout_ms)
    }

    /// All tracked connections past the timeout
    pub fn stale(&self, now: u64) -> Vec<ConnectionId> {
        let mut stale: Vec<ConnectionId> = self
            .last_seen
            .keys()
            .copied()
            .filter(|&c| !self.is_alive(c, now))
            .collect();
        stale.sort_unstable();
        stale
    }

    /// Connections that became stale since the previous sweep
    pub fn sweep(&mut self, now: u64) -> Vec<ConnectionId> {
        let newly: Vec<ConnectionId> = self
            .stale(now)
            .into_iter()
            .filter(|c| !self.reported.contains(c))
            .collect();
        self.reported.extend(newly.iter().copied());
        newly
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new(timing::HEARTBEAT_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alive_within_timeout() {
        let mut tracker = LivenessTracker::default();
        tracker.connect(1, 1_000);

        assert!(tracker.is_alive(1, 1_000 + timing::HEARTBEAT_TIMEOUT_MS));
        assert!(!tracker.is_alive(1, 1_001 + timing::HEARTBEAT_TIMEOUT_MS));
    }

    #[test]
    fn test_touch_refreshes() {
        let mut tracker = LivenessTracker::new(15_000);
        tracker.connect(1, 0);
        tracker.touch(1, 10_000);

        assert!(tracker.is_alive(1, 20_000));
        assert_eq!(tracker.last_seen(1), Some(10_000));
    }

    #[test]
    fn test_unknown_connection_is_not_alive() {
        let tracker = LivenessTracker::default();
        assert!(!tracker.is_alive(9, 0));
    }

    #[test]
    fn test_disconnect_forgets() {
        let mut tracker = LivenessTracker::new(15_000);
        tracker.connect(1, 0);
        tracker.disconnect(1);

        assert_eq!(tracker.len(), 0);
        assert!(tracker.stale(100_000).is_empty());
    }

    #[test]
    fn test_sweep_reports_once() {
        let mut tracker = LivenessTracker::new(15_000);
        tracker.connect(1, 0);
        tracker.connect(2, 10_000);

        assert_eq!(tracker.sweep(16_000), vec![1]);
        assert!(tracker.sweep(17_000).is_empty());
        assert_eq!(tracker.stale(17_000), vec![1]);

        // Coming back to life re-arms the report
        tracker.touch(1, 18_000);
        assert_eq!(tracker.sweep(26_000), vec![2]);
        assert_eq!(tracker.sweep(34_000), vec![1]);
    }
}

//! Heartbeat liveness tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Tracks when the server last proved it was alive.
///
/// The timestamp is stored as milliseconds since a monotonic epoch taken at
/// construction, so it can be updated from the read path and queried from any
/// thread without locking.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    epoch: Instant,
    last_millis: AtomicU64,
    max_interval: Duration,
}

impl HeartbeatMonitor {
    /// Creates a monitor whose last heartbeat is "now".
    pub fn new(max_interval: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            last_millis: AtomicU64::new(0),
            max_interval,
        }
    }

    /// Records a heartbeat at the current time.
    pub fn record(&self) {
        // fetch_max keeps the timestamp non-decreasing under concurrent writers
        self.last_millis
            .fetch_max(self.elapsed_millis(), Ordering::AcqRel);
    }

    /// Returns true while the last heartbeat is within the allowed interval.
    pub fn is_ok(&self) -> bool {
        self.since_last() <= self.max_interval
    }

    /// Time elapsed since the last recorded heartbeat.
    pub fn since_last(&self) -> Duration {
        let last = self.last_millis.load(Ordering::Acquire);
        Duration::from_millis(self.elapsed_millis().saturating_sub(last))
    }

    fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fresh_monitor_is_ok() {
        let monitor = HeartbeatMonitor::new(Duration::from_millis(60_000));
        assert!(monitor.is_ok());
        assert_eq!(monitor.since_last(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_is_inclusive() {
        let monitor = HeartbeatMonitor::new(Duration::from_millis(60_000));

        tokio::time::advance(Duration::from_millis(60_000)).await;
        assert!(monitor.is_ok());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!monitor.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_restores_liveness() {
        let monitor = HeartbeatMonitor::new(Duration::from_millis(60_000));

        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(!monitor.is_ok());

        monitor.record();
        assert!(monitor.is_ok());
        assert_eq!(monitor.since_last(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(monitor.since_last(), Duration::from_secs(30));
        assert!(monitor.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timestamp_never_moves_backwards() {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(10)).await;
        monitor.record();
        let recorded = monitor.last_millis.load(Ordering::Acquire);

        // A stale writer cannot lower the timestamp
        monitor.last_millis.fetch_max(1, Ordering::AcqRel);
        assert_eq!(monitor.last_millis.load(Ordering::Acquire), recorded);
        assert_eq!(recorded, 10_000);
    }
}

//! Heartbeat monitor
//!
//! Detects a connection that is open at the transport layer but unresponsive
//! at the application layer. Owns the ping cadence and the reply deadline;
//! created fresh for each connected session and dropped at teardown, so no
//! timer state survives across attempts.

use std::time::Duration;

use tokio::time::{interval_at, sleep_until, Instant, Interval};

/// What the connection loop must act on next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Cadence fired: send a ping
    SendPing,
    /// The reply deadline expired: the connection is presumed dead
    TimedOut,
}

/// Liveness timers for one connected session
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Interval,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Create a monitor; the first ping fires one full interval from now
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval: interval_at(Instant::now() + interval, interval),
            timeout,
            deadline: None,
        }
    }

    /// Wait for the next ping slot or an expired reply deadline
    pub async fn next_event(&mut self) -> HeartbeatEvent {
        match self.deadline {
            Some(deadline) => {
                // When both are due at once the deadline wins
                tokio::select! {
                    biased;
                    _ = sleep_until(deadline) => HeartbeatEvent::TimedOut,
                    _ = self.interval.tick() => HeartbeatEvent::SendPing,
                }
            }
            None => {
                self.interval.tick().await;
                HeartbeatEvent::SendPing
            }
        }
    }

    /// Record that a ping went out; arms the reply deadline unless one is
    /// already pending
    pub fn ping_sent(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.timeout);
        }
    }

    /// Record liveness evidence; clears any pending deadline
    pub fn liveness(&mut self) {
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_ping_after_one_interval() {
        let mut monitor =
            HeartbeatMonitor::new(Duration::from_millis(100), Duration::from_millis(200));
        let start = Instant::now();

        assert_eq!(monitor.next_event().await, HeartbeatEvent::SendPing);
        assert_eq!(start.elapsed(), Duration::from_millis(100));

        assert_eq!(monitor.next_event().await, HeartbeatEvent::SendPing);
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_ping_times_out() {
        let mut monitor =
            HeartbeatMonitor::new(Duration::from_millis(100), Duration::from_millis(250));
        let start = Instant::now();

        assert_eq!(monitor.next_event().await, HeartbeatEvent::SendPing);
        monitor.ping_sent(); // deadline at 350

        // Cadence keeps firing while the deadline is pending
        assert_eq!(monitor.next_event().await, HeartbeatEvent::SendPing);
        monitor.ping_sent(); // already armed, unchanged
        assert_eq!(monitor.next_event().await, HeartbeatEvent::SendPing);

        assert_eq!(monitor.next_event().await, HeartbeatEvent::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_wins_when_due_with_a_tick() {
        let mut monitor =
            HeartbeatMonitor::new(Duration::from_millis(100), Duration::from_millis(200));
        let start = Instant::now();

        assert_eq!(monitor.next_event().await, HeartbeatEvent::SendPing);
        monitor.ping_sent(); // deadline at 300, same instant as the third tick

        assert_eq!(monitor.next_event().await, HeartbeatEvent::SendPing);
        assert_eq!(monitor.next_event().await, HeartbeatEvent::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_clears_the_deadline() {
        let mut monitor =
            HeartbeatMonitor::new(Duration::from_millis(100), Duration::from_millis(200));
        let start = Instant::now();

        assert_eq!(monitor.next_event().await, HeartbeatEvent::SendPing);
        monitor.ping_sent(); // deadline at 300
        monitor.liveness(); // reply arrived, deadline cleared

        assert_eq!(monitor.next_event().await, HeartbeatEvent::SendPing);
        monitor.ping_sent(); // deadline at 400

        assert_eq!(monitor.next_event().await, HeartbeatEvent::SendPing);
        assert_eq!(monitor.next_event().await, HeartbeatEvent::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_without_pending_deadline_is_harmless() {
        let mut monitor =
            HeartbeatMonitor::new(Duration::from_millis(100), Duration::from_millis(200));
        monitor.liveness();
        assert_eq!(monitor.next_event().await, HeartbeatEvent::SendPing);
    }
}

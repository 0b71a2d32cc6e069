//! Sliding-window request history.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Timestamps of the most recent requests to one provider.
///
/// Holds at most `capacity` entries: once the ring is full the oldest
/// timestamp is evicted. Storage grows with recorded requests, never with
/// the configured budget.
#[derive(Debug, Clone)]
pub struct RequestWindow {
    capacity: usize,
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl RequestWindow {
    /// A window allowing `capacity` requests per `window`.
    pub fn new(capacity: usize, window: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window,
            stamps: VecDeque::new(),
        }
    }

    /// Whether another request fits in the budget at `now`.
    pub fn has_capacity(&self, now: Instant) -> bool {
        self.in_window(now) < self.capacity
    }

    /// Number of recorded requests inside the window ending at `now`.
    pub fn in_window(&self, now: Instant) -> usize {
        self.stamps
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.window)
            .count()
    }

    /// Record a request at `now`.
    pub fn record(&mut self, now: Instant) {
        if self.stamps.len() == self.capacity {
            self.stamps.pop_front();
        }
        self.stamps.push_back(now);
    }

    /// Number of timestamps held. Never exceeds the capacity.
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    /// Whether no request has been recorded.
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn window_fills_and_drains() {
        let mut window = RequestWindow::new(2, Duration::from_secs(1));
        let start = Instant::now();
        assert!(window.has_capacity(start));

        window.record(start);
        window.record(start);
        assert!(!window.has_capacity(start));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!window.has_capacity(Instant::now()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(window.has_capacity(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn ring_never_exceeds_capacity() {
        let mut window = RequestWindow::new(3, Duration::from_secs(60));
        for _ in 0..50 {
            window.record(Instant::now());
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn huge_budget_allocates_nothing_up_front() {
        let mut window = RequestWindow::new(u32::MAX as usize, Duration::from_secs(1));
        assert!(window.is_empty());
        let now = Instant::now();
        window.record(now);
        assert_eq!(window.len(), 1);
        assert!(window.has_capacity(now));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let window = RequestWindow::new(0, Duration::from_secs(1));
        assert!(window.is_empty());
        assert!(window.has_capacity(Instant::now()));
    }
}

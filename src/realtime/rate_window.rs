// Per-connection sliding-window event limiter
// Trimming happens at check time; no background maintenance

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct SlidingWindow {
    max_events: u32,
    window: Duration,
    events: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events,
            window,
            events: VecDeque::with_capacity(max_events as usize),
        }
    }

    /// Record an event if the window still has room; false means breached
    pub fn allow(&mut self, now: Instant) -> bool {
        while let Some(front) = self.events.front() {
            if now.duration_since(*front) >= self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }

        if self.events.len() >= self.max_events as usize {
            return false;
        }

        self.events.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_fills_and_recovers() {
        let mut window = SlidingWindow::new(3, Duration::from_secs(10));
        let start = Instant::now();

        assert!(window.allow(start));
        assert!(window.allow(start + Duration::from_secs(1)));
        assert!(window.allow(start + Duration::from_secs(2)));
        assert!(!window.allow(start + Duration::from_secs(3)));

        // Oldest event ages out
        assert!(window.allow(start + Duration::from_secs(11)));
    }

    #[test]
    fn test_breach_does_not_consume_a_slot() {
        let mut window = SlidingWindow::new(1, Duration::from_secs(10));
        let start = Instant::now();

        assert!(window.allow(start));
        assert!(!window.allow(start + Duration::from_secs(1)));
        assert!(window.allow(start + Duration::from_secs(10)));
    }
}

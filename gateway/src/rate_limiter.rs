// gateway/src/rate_limiter.rs
use std::time::{Duration, Instant};

/// Fixed-window budget for inbound WebSocket messages of one session.
///
/// Messages over budget are dropped without telling the browser.
#[derive(Debug, Clone)]
pub struct MessageRateLimiter {
    window: Duration,
    max_messages: u32,
    count: u32,
    window_start: Instant,
}

impl MessageRateLimiter {
    pub fn new(window: Duration, max_messages: u32) -> Self {
        Self {
            window,
            max_messages,
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Count one message and report whether it is within budget
    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    pub fn check_at(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) > self.window {
            self.count = 0;
            self.window_start = now;
        }

        self.count = self.count.saturating_add(1);
        self.count <= self.max_messages
    }
}

//! Rolling-window call budget for the external generator

use std::collections::VecDeque;

/// At most `max_calls` recorded calls inside any `window_ms` span
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_calls: usize,
    window_ms: u64,
    calls: VecDeque<u64>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window_ms: u64) -> Self {
        Self {
            max_calls,
            window_ms,
            calls: VecDeque::with_capacity(max_calls),
        }
    }

    fn prune(&mut self, now_ms: u64) {
        while let Some(&oldest) = self.calls.front() {
            if now_ms.saturating_sub(oldest) >= self.window_ms {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether another call fits in the current window
    pub fn allows(&mut self, now_ms: u64) -> bool {
        self.prune(now_ms);
        self.calls.len() < self.max_calls
    }

    /// Count a completed call
    pub fn record(&mut self, now_ms: u64) {
        self.prune(now_ms);
        self.calls.push_back(now_ms);
    }

    pub fn remaining(&mut self, now_ms: u64) -> usize {
        self.prune(now_ms);
        self.max_calls.saturating_sub(self.calls.len())
    }
}

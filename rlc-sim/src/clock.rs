//! Virtual clock for deterministic protocol runs
//!
//! Time only moves when the harness advances it, so every timer expiry is
//! reproducible regardless of wall-clock scheduling.

use std::time::{Duration, Instant};

/// Manually advanced clock anchored at construction time
#[derive(Debug, Clone, Copy)]
pub struct VirtualClock {
    now: Instant,
}

impl VirtualClock {
    pub fn new() -> Self {
        VirtualClock {
            now: Instant::now(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Move forward to `deadline`; moving backwards is a no-op
    pub fn advance_to(&mut self, deadline: Instant) {
        if deadline > self.now {
            self.now = deadline;
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

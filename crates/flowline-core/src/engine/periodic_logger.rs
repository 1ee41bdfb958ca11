//! Rate limiter for repeated warnings.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Lets at most one message through per `period`.
#[derive(Debug)]
pub struct PeriodicLogger {
    period: Duration,
    last: Mutex<Option<Instant>>,
}

impl PeriodicLogger {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: Mutex::new(None),
        }
    }

    /// Whether a message may be emitted now. Records the emission when it may.
    pub fn should_log(&self) -> bool {
        self.should_log_at(Instant::now())
    }

    fn should_log_at(&self, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(previous) if now.duration_since(previous) < self.period => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

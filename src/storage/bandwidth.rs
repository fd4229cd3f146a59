//! Storage write throughput limiter.
//!
//! After every completed write the limiter compares the achieved rate
//! against the configured byte/s budget and sleeps off the difference.
//! Wall-clock samples that run backwards are skipped.

use std::time::{Duration, SystemTime};

pub struct BandwidthLimiter {
    /// Bytes per second; `None` disables throttling.
    limit: Option<u64>,
    /// Carry-over from writes smaller than the sleep granularity.
    debt: Duration,
}

/// Sleep slices shorter than this are accumulated instead.
const MIN_SLEEP: Duration = Duration::from_millis(2);

impl BandwidthLimiter {
    pub fn new(limit: Option<u64>) -> Self {
        BandwidthLimiter {
            limit: limit.filter(|limit| *limit > 0),
            debt: Duration::ZERO,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Account one completed write of `bytes` that started at
    /// `started`, sleeping so the average rate stays at or below the
    /// budget.
    pub fn throttle(&mut self, bytes: u64, started: SystemTime) {
        let Some(limit) = self.limit else {
            return;
        };
        // A backwards clock step makes the sample meaningless.
        let Ok(elapsed) = started.elapsed() else {
            return;
        };
        let required = Duration::from_secs_f64(bytes as f64 / limit as f64);
        if required <= elapsed {
            return;
        }
        self.debt += required - elapsed;
        if self.debt >= MIN_SLEEP {
            std::thread::sleep(self.debt);
            self.debt = Duration::ZERO;
        }
    }
}

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Deadline/timer oracle supplied by the host.
pub trait TimeOracle: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock oracle for production hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeOracle for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced oracle for deterministic scenario tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl TimeOracle for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

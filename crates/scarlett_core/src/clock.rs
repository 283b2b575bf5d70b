use chrono::{DateTime, Local};
use parking_lot::Mutex;

/// Source of "now" for every time-dependent rule.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Local>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock();
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock()
    }
}

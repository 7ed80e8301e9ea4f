use chrono::{TimeDelta, Utc};
use elset_types::time::UtcTimestamp;
use std::sync::{Mutex, PoisonError};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> UtcTimestamp;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UtcTimestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock(Mutex<UtcTimestamp>);

impl ManualClock {
    pub fn new(t: UtcTimestamp) -> Self {
        ManualClock(Mutex::new(t))
    }

    pub fn set(&self, t: UtcTimestamp) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = t;
    }

    pub fn advance(&self, dt: TimeDelta) {
        let mut t = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *t += dt;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UtcTimestamp {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

use chrono::{DateTime, Duration, Local};
use std::sync::Mutex;

/// Source of "now" for day-granularity decisions.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Local> {
    Local::now()
  }
}

/// A clock that only moves when told to.
pub struct FixedClock {
  now: Mutex<DateTime<Local>>,
}

impl FixedClock {
  pub fn new(now: DateTime<Local>) -> Self {
    Self {
      now: Mutex::new(now),
    }
  }

  pub fn advance(&self, by: Duration) {
    if let Ok(mut current) = self.now.lock() {
      *current += by;
    }
  }
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Local> {
    match self.now.lock() {
      Ok(now) => *now,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }
}

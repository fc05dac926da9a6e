//! Injectable clock, per the "inject a clock" design note: every component
//! compares against a single `now` captured once at the top of its operation,
//! rather than calling `Utc::now()` scattered through its body.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock that always returns a fixed instant, so scenario tests can pin
/// `now` to an exact seed value instead of racing the system clock.
#[derive(Debug, Clone)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

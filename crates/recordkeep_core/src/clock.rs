//! Time source used by lifecycle, ledger and reminder logic.
//!
//! Services take a `Clock` so audit timestamps and "today" can be pinned in
//! tests.

use chrono::{Local, NaiveDate, Utc};
use std::cell::Cell;

pub trait Clock {
    /// Current time as Unix epoch milliseconds.
    fn now_ms(&self) -> i64;
    /// Current calendar date in the local timezone.
    fn today(&self) -> NaiveDate;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> i64 {
        (**self).now_ms()
    }

    fn today(&self) -> NaiveDate {
        (**self).today()
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Manually driven clock for deterministic callers.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now_ms: Cell<i64>,
    today: NaiveDate,
}

impl FixedClock {
    pub fn new(now_ms: i64, today: NaiveDate) -> Self {
        Self {
            now_ms: Cell::new(now_ms),
            today,
        }
    }

    /// Moves `now_ms` forward; `today` is left unchanged.
    pub fn advance(&self, millis: i64) {
        self.now_ms.set(self.now_ms.get() + millis);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.get()
    }

    fn today(&self) -> NaiveDate {
        self.today
    }
}

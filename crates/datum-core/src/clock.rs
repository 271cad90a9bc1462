//! Time source for metadata stamps
//!
//! Lifecycle operations stamp `meta.createTime` and `meta.modifyTime` from a
//! [`Clock`] rather than calling `Utc::now()` directly, so tests can control
//! time and so every stamp from one clock is strictly later than the last.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

#[cfg(test)]
use std::sync::Mutex;

/// A time provider for metadata timestamps.
pub trait Clock: Send + Sync + Debug {
    /// Current time. Successive calls on one clock never go backwards.
    fn now(&self) -> DateTime<Utc>;

    /// Current time formatted the way it is stored in `meta`.
    fn now_stamp(&self) -> String {
        format_stamp(&self.now())
    }
}

/// Format a timestamp as stored in document metadata.
pub fn format_stamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Wall clock with millisecond resolution.
///
/// Two calls inside the same millisecond would produce equal stamps, which
/// would make `modifyTime` stand still across real changes. The clock bumps
/// such calls forward by one millisecond instead.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_millis: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_millis();
        let mut last = self.last_millis.load(Ordering::Relaxed);
        loop {
            let next = wall.max(last + 1);
            match self.last_millis.compare_exchange_weak(
                last,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Utc
                        .timestamp_millis_opt(next)
                        .single()
                        .unwrap_or_else(Utc::now)
                }
                Err(current) => last = current,
            }
        }
    }
}

/// Test clock that only moves when told to
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    millis: Mutex<i64>,
}

#[cfg(test)]
impl ManualClock {
    /// Create a clock frozen at the given milliseconds since the epoch.
    pub fn new(millis: i64) -> Self {
        Self {
            millis: Mutex::new(millis),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, ms: i64) {
        *self.millis.lock().unwrap() += ms;
    }

    /// Set the clock to a specific time in milliseconds.
    pub fn set(&self, ms: i64) {
        *self.millis.lock().unwrap() = ms;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = *self.millis.lock().unwrap();
        Utc.timestamp_millis_opt(millis)
            .single()
            .expect("manual clock set to an unrepresentable time")
    }
}

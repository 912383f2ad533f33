//! Logical timestamps.
//!
//! Envelopes are ordered by a producer-assigned [`Timestamp`], never by
//! arrival order. Envelopes this engine produces itself (drag completions,
//! local edits, persistence outcomes) are stamped by a [`HybridClock`]: wall
//! time in milliseconds, bumped past any previously issued or observed stamp
//! so a later local action always outranks what it has already seen.

#[cfg(test)]
#[path = "clock_test.rs"]
mod clock_test;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Logical instant in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall time. Returns the epoch if the system clock is before it.
    #[must_use]
    pub fn now() -> Self {
        Self(now_ms())
    }

    #[must_use]
    pub fn as_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Monotonic stamp source for self-produced envelopes.
#[derive(Debug, Clone, Default)]
pub struct HybridClock {
    last: Timestamp,
}

impl HybridClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a stamp strictly greater than every stamp issued or observed so far.
    pub fn tick(&mut self) -> Timestamp {
        self.tick_at(Timestamp::now())
    }

    fn tick_at(&mut self, wall: Timestamp) -> Timestamp {
        let next = if wall > self.last { wall } else { Timestamp(self.last.0.saturating_add(1)) };
        self.last = next;
        next
    }

    /// Fold in a stamp from an accepted envelope so the next tick outranks it.
    pub fn observe(&mut self, stamp: Timestamp) {
        if stamp > self.last {
            self.last = stamp;
        }
    }

    /// The most recent stamp issued or observed.
    #[must_use]
    pub fn last(&self) -> Timestamp {
        self.last
    }
}

fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(i64::MAX)
}

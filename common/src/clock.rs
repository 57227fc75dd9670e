//! Time stamping for log entries.
//!
//! A [`DateTimeStamp`] is a UTC instant expressed in 100 ns ticks since the
//! Unix epoch, extended with a one-byte uniquifier so that two entries taken
//! in the same tick can still be totally ordered. Ordering is lexicographic
//! over `(ticks, uniquifier)`.

use std::time::{SystemTime, UNIX_EPOCH};

/// Number of 100 ns ticks per second.
const TICKS_PER_SECOND: i64 = 10_000_000;

/// UTC instant with a tie-breaking uniquifier.
///
/// The uniquifier starts at 0 and is only raised when consecutive stamps
/// would otherwise collide (see [`DateTimeStamp::unique_after`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTimeStamp {
    /// 100 ns ticks since the Unix epoch, UTC.
    pub ticks: i64,
    /// Tie breaker between stamps sharing the same tick.
    pub uniquifier: u8,
}

impl DateTimeStamp {
    /// Sentinel for "no known time". Sorts before every real stamp.
    pub const UNKNOWN: DateTimeStamp = DateTimeStamp {
        ticks: i64::MIN,
        uniquifier: 0,
    };

    /// Creates a stamp from a raw tick count with a zero uniquifier.
    pub fn new(ticks: i64) -> Self {
        Self {
            ticks,
            uniquifier: 0,
        }
    }

    /// Creates a stamp from raw wire components.
    pub fn from_parts(ticks: i64, uniquifier: u8) -> Self {
        Self { ticks, uniquifier }
    }

    /// Captures the current UTC time.
    pub fn now() -> Self {
        let ticks = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i64 / 100,
            // Clock before the epoch: negative tick count.
            Err(e) => -(e.duration().as_nanos() as i64 / 100),
        };
        Self::new(ticks)
    }

    /// Returns `true` for the [`UNKNOWN`](DateTimeStamp::UNKNOWN) sentinel.
    pub fn is_known(&self) -> bool {
        self.ticks != i64::MIN
    }

    /// Returns a stamp strictly greater than `prev`.
    ///
    /// Takes `now` when the clock has moved past `prev`; otherwise bumps the
    /// uniquifier, carrying into the tick count when the uniquifier is
    /// exhausted. Callers that must emit monotonically increasing stamps
    /// (one producer per monitor) thread the previous stamp through here.
    pub fn unique_after(prev: DateTimeStamp, now: DateTimeStamp) -> DateTimeStamp {
        if now.ticks > prev.ticks {
            return now;
        }
        match prev.uniquifier.checked_add(1) {
            Some(u) => DateTimeStamp {
                ticks: prev.ticks,
                uniquifier: u,
            },
            None => DateTimeStamp {
                ticks: prev.ticks + 1,
                uniquifier: 0,
            },
        }
    }

    /// Seconds since the Unix epoch, truncated.
    pub fn as_unix_seconds(&self) -> i64 {
        self.ticks / TICKS_PER_SECOND
    }
}

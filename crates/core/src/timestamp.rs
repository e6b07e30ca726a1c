//! Microsecond-precision timestamp type
//!
//! Timestamps are stored as microseconds since Unix epoch. They feed the
//! logical clock (see `version`), the TTL reaper cutoff, and the
//! last-write-wins guard on cache-style tables.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Microsecond-precision timestamp
///
/// Represents a point in time as microseconds since Unix epoch. This is the
/// canonical wall-clock representation in the engine; versions are logical
/// timestamps derived from it (see `LogicalClock`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Unix epoch (1970-01-01 00:00:00 UTC)
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Maximum representable timestamp
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Create a timestamp for the current moment
    ///
    /// Returns epoch (0) if the system clock is before Unix epoch.
    pub fn now() -> Self {
        let micros = Utc::now().timestamp_micros();
        Timestamp(micros.max(0) as u64)
    }

    /// Create a timestamp from microseconds since epoch
    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    /// Create a timestamp from seconds since epoch
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000))
    }

    /// Get microseconds since Unix epoch
    #[inline]
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Get seconds since Unix epoch (truncates)
    #[inline]
    pub const fn as_secs(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Compute duration since an earlier timestamp
    ///
    /// Returns `None` if `earlier` is actually later than `self`.
    pub fn duration_since(&self, earlier: Timestamp) -> Option<Duration> {
        if self.0 >= earlier.0 {
            Some(Duration::from_micros(self.0 - earlier.0))
        } else {
            None
        }
    }

    /// Add a duration, saturating at `Timestamp::MAX`
    pub fn saturating_add(&self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.as_micros() as u64))
    }

    /// Subtract a duration, saturating at `Timestamp::EPOCH`
    pub fn saturating_sub(&self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_sub(duration.as_micros() as u64))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::EPOCH
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:06}", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

impl From<u64> for Timestamp {
    fn from(micros: u64) -> Self {
        Timestamp(micros)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_now_advances() {
        let before = Timestamp::now();
        std::thread::sleep(Duration::from_millis(1));
        let after = Timestamp::now();
        assert!(after > before);
    }

    #[test]
    fn test_timestamp_conversions() {
        let ts = Timestamp::from_secs(1000);
        assert_eq!(ts.as_micros(), 1_000_000_000);
        assert_eq!(ts.as_secs(), 1000);
    }

    #[test]
    fn test_timestamp_duration_since() {
        let t1 = Timestamp::from_micros(1000);
        let t2 = Timestamp::from_micros(3000);
        assert_eq!(t2.duration_since(t1).unwrap().as_micros(), 2000);
        assert!(t1.duration_since(t2).is_none());
    }

    #[test]
    fn test_timestamp_saturating_arithmetic() {
        let ts = Timestamp::from_micros(1000);
        assert_eq!(ts.saturating_sub(Duration::from_micros(500)).as_micros(), 500);
        assert_eq!(ts.saturating_sub(Duration::from_micros(5000)), Timestamp::EPOCH);
        assert_eq!(
            Timestamp::MAX.saturating_add(Duration::from_micros(1)),
            Timestamp::MAX
        );
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(Timestamp::from_micros(1_234_567_890).to_string(), "1234.567890");
    }
}

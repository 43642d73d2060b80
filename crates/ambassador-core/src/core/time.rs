// ambassador-core/src/core/time.rs
// ============================================================================
// Module: Ambassador Time Model
// Description: Canonical timestamp representation for entities and audit events.
// Purpose: Provide a single, RFC 3339-serializable wall-clock timestamp type.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Unlike a deterministic-replay engine, the Ambassador's session lifecycle
//! and audit trail are driven by real wall-clock time. [`Timestamp`] wraps
//! [`time::OffsetDateTime`] so every entity and audit record serializes a
//! stable RFC 3339 string rather than an opaque integer.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ops::Add;
use std::ops::Sub;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// A UTC wall-clock instant, serialized as RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Wraps an explicit [`OffsetDateTime`] value.
    #[must_use]
    pub const fn from_offset_date_time(value: OffsetDateTime) -> Self {
        Self(value)
    }

    /// Returns the underlying [`OffsetDateTime`].
    #[must_use]
    pub const fn as_offset_date_time(&self) -> OffsetDateTime {
        self.0
    }

    /// Returns the number of seconds elapsed between `self` and `other`,
    /// saturating at zero when `other` is earlier than `self`.
    #[must_use]
    pub fn seconds_since(&self, other: Self) -> u64 {
        let delta = self.0 - other.0;
        u64::try_from(delta.whole_seconds()).unwrap_or(0)
    }

    /// Returns true when this timestamp is strictly before `other`.
    #[must_use]
    pub fn is_before(&self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let whole = time::Duration::try_from(rhs).unwrap_or(time::Duration::ZERO);
        Self(self.0 + whole)
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self::Output {
        let whole = time::Duration::try_from(rhs).unwrap_or(time::Duration::ZERO);
        Self(self.0 - whole)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;

    #[test]
    fn seconds_since_is_zero_when_reversed() {
        let earlier = Timestamp::now();
        let later = earlier + Duration::from_secs(30);
        assert_eq!(earlier.seconds_since(later), 0);
        assert_eq!(later.seconds_since(earlier), 30);
    }

    #[test]
    fn round_trips_through_json() {
        let ts = Timestamp::now();
        let json = serde_json::to_string(&ts).expect("serialize timestamp");
        let back: Timestamp = serde_json::from_str(&json).expect("deserialize timestamp");
        assert_eq!(back.as_offset_date_time().unix_timestamp(), ts.as_offset_date_time().unix_timestamp());
    }

    #[test]
    fn is_before_orders_correctly() {
        let earlier = Timestamp::now();
        let later = earlier + Duration::from_secs(1);
        assert!(earlier.is_before(later));
        assert!(!later.is_before(earlier));
    }
}

//! Second-resolution timestamps and clock skew validation.
//!
//! Message and publication timestamps record first-broadcast time and are
//! carried on the wire as big-endian signed seconds since the Unix epoch.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::encoding::{DecodeError, WireDecode, WireEncode};
use crate::MAX_CLOCK_SKEW_SECS;

/// Timestamp in seconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Creates a timestamp from seconds since the Unix epoch.
    pub const fn new(secs: i64) -> Self {
        Self(secs)
    }

    /// Returns the current time, truncated to whole seconds.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self(duration.as_secs() as i64)
    }

    /// Returns the seconds since the Unix epoch.
    pub const fn as_secs(&self) -> i64 {
        self.0
    }

    /// Returns true if this timestamp is within the VERSION skew window of
    /// the reference (±5 minutes).
    pub fn within_clock_skew(&self, reference: &Timestamp) -> bool {
        (self.0 - reference.0).abs() <= MAX_CLOCK_SKEW_SECS
    }

    /// Subtracts a duration, saturating at the epoch boundary.
    pub fn sub(&self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_secs() as i64))
    }

    /// Adds a duration.
    pub fn add(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_secs() as i64))
    }
}

impl WireEncode for Timestamp {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}

impl WireDecode for Timestamp {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self(i64::decode(buf)?))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(secs: i64) -> Self {
        Self(secs)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

//! Stream versions and checked conversions from raw log positions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest integer every consumer of our JSON payloads can represent exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Raised when a stream position cannot be represented without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unsafe numeric conversion: {value} is outside the safe range [-1, {max}]")]
pub struct UnsafeNumericConversion {
    /// The offending raw value.
    pub value: i128,
    /// The upper bound that was exceeded.
    pub max: i64,
}

impl UnsafeNumericConversion {
    fn new(value: impl Into<i128>) -> Self {
        Self {
            value: value.into(),
            max: MAX_SAFE_INTEGER,
        }
    }
}

/// Version number of an aggregate stream, used for optimistic concurrency control.
///
/// `-1` means the stream does not exist; the first event has version `0`.
/// A version always equals the number of events in the stream minus one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of a stream that does not exist yet (-1).
    pub fn initial() -> Self {
        Self(-1)
    }

    /// Returns the version of the first event (0).
    pub fn first() -> Self {
        Self(0)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true if this version denotes a stream with no events.
    pub fn is_initial(&self) -> bool {
        self.0 < 0
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Number of events between `earlier` and this version.
    ///
    /// Returns zero when `earlier` is not actually earlier.
    pub fn events_since(&self, earlier: Version) -> u64 {
        u64::try_from(self.0.saturating_sub(earlier.0)).unwrap_or(0)
    }

    /// Returns the version reached after `count` more events, refusing to leave the safe range.
    pub fn advance_by(&self, count: usize) -> Result<Self, UnsafeNumericConversion> {
        let count = i64::try_from(count).map_err(|_| UnsafeNumericConversion::new(count as u64))?;
        let advanced = self
            .0
            .checked_add(count)
            .ok_or_else(|| UnsafeNumericConversion::new(i128::from(self.0) + i128::from(count)))?;
        Self::checked(advanced)
    }

    /// Validates that a raw signed value is within `[-1, MAX_SAFE_INTEGER]`.
    pub fn checked(value: i64) -> Result<Self, UnsafeNumericConversion> {
        if (-1..=MAX_SAFE_INTEGER).contains(&value) {
            Ok(Self(value))
        } else {
            Err(UnsafeNumericConversion::new(value))
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::initial()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Raw, unsigned position of an event inside its stream as reported by the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamRevision(pub u64);

impl TryFrom<StreamRevision> for Version {
    type Error = UnsafeNumericConversion;

    fn try_from(revision: StreamRevision) -> Result<Self, Self::Error> {
        match i64::try_from(revision.0) {
            Ok(value) if value <= MAX_SAFE_INTEGER => Ok(Self(value)),
            _ => Err(UnsafeNumericConversion::new(revision.0)),
        }
    }
}

impl TryFrom<Version> for StreamRevision {
    type Error = UnsafeNumericConversion;

    fn try_from(version: Version) -> Result<Self, Self::Error> {
        u64::try_from(version.0)
            .map(StreamRevision)
            .map_err(|_| UnsafeNumericConversion::new(version.0))
    }
}

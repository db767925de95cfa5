//! Superdense time: durations, tags, and their wire encodings.
//!
//! A [`TimeValue`] is a non-negative duration measured in `(seconds,
//! nanoseconds)`. Logical time is carried as an absolute `TimeValue` (the
//! duration since the UNIX epoch), mirroring physical clock readings from
//! [`TimeValue::now`]. A [`Tag`] pairs a `TimeValue` with a microstep to
//! form a point in superdense time.

use std::{fmt::Display, str::FromStr, time::Duration};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Wire encoding of [`TimeValue::NEVER`].
const WIRE_NEVER: u64 = 0x8000_0000_0000_0000;
/// Wire encoding of [`TimeValue::FOREVER`].
const WIRE_FOREVER: u64 = 0x7FFF_FFFF_FFFF_FFFF;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TimeError {
    #[error("time value overflow: {value} {unit}")]
    UnitOverflow { value: u64, unit: TimeUnit },

    #[error("time value exceeds the 64-bit nanosecond wire range")]
    WireOverflow,

    #[error("unrecognized time unit: '{0}'")]
    InvalidUnit(String),
}

/// A non-negative duration with nanosecond resolution.
///
/// Two reserved bit patterns, [`TimeValue::NEVER`] and
/// [`TimeValue::FOREVER`], order below and above every finite value. They
/// cannot be produced by [`TimeValue::new`] or any arithmetic on finite
/// values; arithmetic treats them as absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimeValue {
    secs: u64,
    nanos: u32,
}

impl TimeValue {
    pub const ZERO: Self = Self { secs: 0, nanos: 0 };

    /// Sentinel ordering below every other value.
    pub const NEVER: Self = Self {
        secs: u64::MAX,
        nanos: u32::MAX,
    };

    /// Sentinel ordering above every other value.
    pub const FOREVER: Self = Self {
        secs: u64::MAX,
        nanos: u32::MAX - 1,
    };

    /// Create a finite time value. Panics if `nanos` names more than a
    /// second; use [`TimeValue::from_nanos`] for unnormalized input.
    pub const fn new(secs: u64, nanos: u32) -> Self {
        assert!(nanos < NANOS_PER_SEC);
        Self { secs, nanos }
    }

    pub const fn from_nanos(nanos: u64) -> Self {
        Self {
            secs: nanos / NANOS_PER_SEC as u64,
            nanos: (nanos % NANOS_PER_SEC as u64) as u32,
        }
    }

    /// Construct from an integer quantity of the given unit. Fails if the
    /// result is not representable.
    pub fn from_unit(value: u64, unit: TimeUnit) -> Result<Self, TimeError> {
        let total = value as u128 * unit.in_nanos() as u128;
        let secs = total / NANOS_PER_SEC as u128;
        if secs > u64::MAX as u128 {
            return Err(TimeError::UnitOverflow { value, unit });
        }
        Ok(Self {
            secs: secs as u64,
            nanos: (total % NANOS_PER_SEC as u128) as u32,
        })
    }

    /// The current physical time, as the duration since the UNIX epoch.
    pub fn now() -> Self {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("System time before UNIX epoch")
            .into()
    }

    pub const fn is_never(&self) -> bool {
        self.secs == Self::NEVER.secs && self.nanos == Self::NEVER.nanos
    }

    pub const fn is_forever(&self) -> bool {
        self.secs == Self::FOREVER.secs && self.nanos == Self::FOREVER.nanos
    }

    pub const fn is_finite(&self) -> bool {
        !self.is_never() && !self.is_forever()
    }

    pub const fn is_zero(&self) -> bool {
        self.secs == 0 && self.nanos == 0
    }

    fn total_nanos(&self) -> u128 {
        debug_assert!(self.is_finite());
        self.secs as u128 * NANOS_PER_SEC as u128 + self.nanos as u128
    }

    /// Checked addition; `None` on overflow. Sentinels absorb.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        if self.is_never() || rhs.is_never() {
            return Some(Self::NEVER);
        }
        if self.is_forever() || rhs.is_forever() {
            return Some(Self::FOREVER);
        }
        let mut secs = self.secs.checked_add(rhs.secs)?;
        let mut nanos = self.nanos + rhs.nanos;
        if nanos >= NANOS_PER_SEC {
            nanos -= NANOS_PER_SEC;
            secs = secs.checked_add(1)?;
        }
        Some(Self { secs, nanos })
    }

    /// Addition saturating at [`TimeValue::FOREVER`].
    pub fn saturating_add(self, rhs: Self) -> Self {
        self.checked_add(rhs).unwrap_or(Self::FOREVER)
    }

    /// Checked subtraction; fails if the result would be negative.
    /// Sentinels absorb.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        if self.is_never() || self.is_forever() {
            return Some(self);
        }
        if !rhs.is_finite() {
            return None;
        }
        let (mut secs, mut nanos) = (self.secs, self.nanos);
        if nanos < rhs.nanos {
            secs = secs.checked_sub(1)?;
            nanos += NANOS_PER_SEC;
        }
        Some(Self {
            secs: secs.checked_sub(rhs.secs)?,
            nanos: nanos - rhs.nanos,
        })
    }

    /// Subtraction saturating at [`TimeValue::ZERO`].
    pub fn saturating_sub(self, rhs: Self) -> Self {
        self.checked_sub(rhs).unwrap_or(Self::ZERO)
    }

    /// Checked multiplication by a scalar; `None` on overflow. Sentinels
    /// absorb.
    pub fn checked_mul(self, factor: u64) -> Option<Self> {
        if !self.is_finite() {
            return Some(self);
        }
        let total = self.total_nanos().checked_mul(factor as u128)?;
        let secs = total / NANOS_PER_SEC as u128;
        if secs > u64::MAX as u128 {
            return None;
        }
        Some(Self {
            secs: secs as u64,
            nanos: (total % NANOS_PER_SEC as u128) as u32,
        })
    }

    /// Convert to a std [`Duration`]; `None` for sentinels.
    pub fn to_duration(self) -> Option<Duration> {
        self.is_finite().then(|| Duration::new(self.secs, self.nanos))
    }

    /// Encode as 8 bytes of little-endian nanoseconds. Finite values past
    /// the 63-bit nanosecond range are not representable on the wire.
    pub fn to_le_bytes(self) -> Result<[u8; 8], TimeError> {
        let raw = if self.is_never() {
            WIRE_NEVER
        } else if self.is_forever() {
            WIRE_FOREVER
        } else {
            let total = self.total_nanos();
            if total >= WIRE_FOREVER as u128 {
                return Err(TimeError::WireOverflow);
            }
            total as u64
        };
        Ok(raw.to_le_bytes())
    }

    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        match u64::from_le_bytes(bytes) {
            WIRE_NEVER => Self::NEVER,
            WIRE_FOREVER => Self::FOREVER,
            raw => Self::from_nanos(raw),
        }
    }

    fn rank(&self) -> u8 {
        if self.is_never() {
            0
        } else if self.is_forever() {
            2
        } else {
            1
        }
    }
}

impl Ord for TimeValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| (self.secs, self.nanos).cmp(&(other.secs, other.nanos)))
    }
}

impl PartialOrd for TimeValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl From<Duration> for TimeValue {
    fn from(duration: Duration) -> Self {
        Self {
            secs: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        }
    }
}

impl Display for TimeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_never() {
            write!(f, "NEVER")
        } else if self.is_forever() {
            write!(f, "FOREVER")
        } else {
            write!(f, "{:?}", Duration::new(self.secs, self.nanos))
        }
    }
}

/// Units accepted by [`TimeValue::from_unit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TimeUnit {
    Nsec,
    Usec,
    Msec,
    Sec,
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    pub const fn in_nanos(self) -> u64 {
        match self {
            TimeUnit::Nsec => 1,
            TimeUnit::Usec => 1_000,
            TimeUnit::Msec => 1_000_000,
            TimeUnit::Sec => 1_000_000_000,
            TimeUnit::Minute => 60 * 1_000_000_000,
            TimeUnit::Hour => 3_600 * 1_000_000_000,
            TimeUnit::Day => 86_400 * 1_000_000_000,
            TimeUnit::Week => 604_800 * 1_000_000_000,
        }
    }
}

impl Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TimeUnit::Nsec => "nsec",
            TimeUnit::Usec => "usec",
            TimeUnit::Msec => "msec",
            TimeUnit::Sec => "sec",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
        };
        write!(f, "{name}")
    }
}

impl FromStr for TimeUnit {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ns" | "nsec" | "nsecs" => Ok(TimeUnit::Nsec),
            "us" | "usec" | "usecs" => Ok(TimeUnit::Usec),
            "ms" | "msec" | "msecs" => Ok(TimeUnit::Msec),
            "s" | "sec" | "secs" => Ok(TimeUnit::Sec),
            "min" | "minute" | "minutes" => Ok(TimeUnit::Minute),
            "h" | "hour" | "hours" => Ok(TimeUnit::Hour),
            "d" | "day" | "days" => Ok(TimeUnit::Day),
            "week" | "weeks" => Ok(TimeUnit::Week),
            other => Err(TimeError::InvalidUnit(other.to_owned())),
        }
    }
}

/// A point in superdense time: a time value plus a microstep that breaks
/// simultaneity within one instant. Totally ordered, lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Tag {
    time: TimeValue,
    microstep: u32,
}

impl Tag {
    pub const NEVER: Self = Self {
        time: TimeValue::NEVER,
        microstep: 0,
    };

    pub const FOREVER: Self = Self {
        time: TimeValue::FOREVER,
        microstep: u32::MAX,
    };

    pub const fn new(time: TimeValue, microstep: u32) -> Self {
        Self { time, microstep }
    }

    pub const fn time(&self) -> TimeValue {
        self.time
    }

    pub const fn microstep(&self) -> u32 {
        self.microstep
    }

    /// The tag reached after `delay`. A zero or NEVER delay yields the
    /// same tag; any other delay resets the microstep.
    pub fn later(&self, delay: TimeValue) -> Self {
        if delay.is_zero() || delay.is_never() {
            *self
        } else {
            Self {
                time: self.time.saturating_add(delay),
                microstep: 0,
            }
        }
    }

    /// The tag `n` microsteps later within the same instant.
    pub fn microsteps_later(&self, n: u32) -> Self {
        Self {
            time: self.time,
            microstep: self.microstep.saturating_add(n),
        }
    }

    /// Encode as 12 bytes: the time value followed by the little-endian
    /// microstep.
    pub fn to_le_bytes(self) -> Result<[u8; 12], TimeError> {
        let mut out = [0u8; 12];
        out[..8].copy_from_slice(&self.time.to_le_bytes()?);
        out[8..].copy_from_slice(&self.microstep.to_le_bytes());
        Ok(out)
    }

    pub fn from_le_bytes(bytes: [u8; 12]) -> Self {
        let mut time = [0u8; 8];
        time.copy_from_slice(&bytes[..8]);
        let mut microstep = [0u8; 4];
        microstep.copy_from_slice(&bytes[8..]);
        Self {
            time: TimeValue::from_le_bytes(time),
            microstep: u32::from_le_bytes(microstep),
        }
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}+{}]", self.time, self.microstep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_ordering() {
        let finite = TimeValue::new(5, 0);
        assert!(TimeValue::NEVER < TimeValue::ZERO);
        assert!(TimeValue::NEVER < finite);
        assert!(finite < TimeValue::FOREVER);
        assert!(TimeValue::ZERO < TimeValue::FOREVER);
        assert!(TimeValue::NEVER < TimeValue::FOREVER);
    }

    #[test]
    fn test_arithmetic() {
        let a = TimeValue::new(1, 600_000_000);
        let b = TimeValue::new(2, 700_000_000);
        assert_eq!(a.checked_add(b), Some(TimeValue::new(4, 300_000_000)));
        assert_eq!(b.checked_sub(a), Some(TimeValue::new(1, 100_000_000)));
        // Subtraction that would go negative fails.
        assert_eq!(a.checked_sub(b), None);
        assert_eq!(a.checked_mul(3), Some(TimeValue::new(4, 800_000_000)));
        // Sentinels absorb.
        assert_eq!(
            TimeValue::FOREVER.checked_add(a),
            Some(TimeValue::FOREVER)
        );
        assert_eq!(TimeValue::NEVER.checked_add(a), Some(TimeValue::NEVER));
    }

    #[test]
    fn test_unit_construction() {
        assert_eq!(
            TimeValue::from_unit(1, TimeUnit::Week).unwrap(),
            TimeValue::new(604_800, 0)
        );
        assert_eq!(
            TimeValue::from_unit(1_500, TimeUnit::Msec).unwrap(),
            TimeValue::new(1, 500_000_000)
        );
        assert_eq!(
            TimeValue::from_unit(u64::MAX, TimeUnit::Week),
            Err(TimeError::UnitOverflow {
                value: u64::MAX,
                unit: TimeUnit::Week
            })
        );
    }

    #[test]
    fn test_wire_round_trip() {
        for value in [
            TimeValue::ZERO,
            TimeValue::new(3, 500_000_000),
            TimeValue::NEVER,
            TimeValue::FOREVER,
        ] {
            let bytes = value.to_le_bytes().unwrap();
            assert_eq!(TimeValue::from_le_bytes(bytes), value);
        }
        assert_eq!(
            TimeValue::NEVER.to_le_bytes().unwrap(),
            0x8000_0000_0000_0000u64.to_le_bytes()
        );
        assert_eq!(
            TimeValue::FOREVER.to_le_bytes().unwrap(),
            0x7FFF_FFFF_FFFF_FFFFu64.to_le_bytes()
        );
    }

    #[test]
    fn test_tag_round_trip() {
        let tag = Tag::new(TimeValue::new(7, 250), 3);
        assert_eq!(Tag::from_le_bytes(tag.to_le_bytes().unwrap()), tag);
    }

    #[test]
    fn test_tag_ordering() {
        let t = TimeValue::new(1, 0);
        assert!(Tag::new(t, 0) < Tag::new(t, 1));
        assert!(Tag::new(t, 5) < Tag::new(TimeValue::new(1, 1), 0));
        assert!(Tag::NEVER < Tag::new(TimeValue::ZERO, 0));
        assert!(Tag::new(TimeValue::FOREVER, 0) < Tag::FOREVER);
    }

    #[test]
    fn test_tag_delay() {
        let tag = Tag::new(TimeValue::new(2, 0), 4);
        assert_eq!(tag.later(TimeValue::ZERO), tag);
        assert_eq!(tag.later(TimeValue::NEVER), tag);
        assert_eq!(
            tag.later(TimeValue::new(1, 0)),
            Tag::new(TimeValue::new(3, 0), 0)
        );
        assert_eq!(tag.microsteps_later(2), Tag::new(TimeValue::new(2, 0), 6));
    }
}

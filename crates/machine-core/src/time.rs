//! Simulated time and clock-rate conversions.
//!
//! All engine time is virtual. A [`Time`] counts attoseconds so that cycle
//! periods of typical clock crystals stay integral enough for long runs, and
//! a [`ClockRate`] converts between a device's cycles and that shared
//! timeline.

use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Attoseconds in one second.
pub const ATTOS_PER_SECOND: u128 = 1_000_000_000_000_000_000;
/// Attoseconds in one millisecond.
pub const ATTOS_PER_MILLISECOND: u128 = ATTOS_PER_SECOND / 1_000;
/// Attoseconds in one microsecond.
pub const ATTOS_PER_MICROSECOND: u128 = ATTOS_PER_SECOND / 1_000_000;
/// Attoseconds in one nanosecond.
pub const ATTOS_PER_NANOSECOND: u128 = ATTOS_PER_SECOND / 1_000_000_000;

/// A point on (or a span of) the simulated timeline, in attoseconds.
///
/// Arithmetic saturates instead of wrapping: `Time::MAX` doubles as "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Time(u128);

impl Time {
    /// The origin of the timeline, also the empty duration.
    pub const ZERO: Self = Self(0);
    /// The far end of the timeline. Used for "no deadline".
    pub const MAX: Self = Self(u128::MAX);

    /// Builds a time from raw attoseconds.
    #[must_use]
    pub const fn from_attos(attos: u128) -> Self {
        Self(attos)
    }

    /// Builds a time from whole nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos as u128 * ATTOS_PER_NANOSECOND)
    }

    /// Builds a time from whole microseconds.
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros as u128 * ATTOS_PER_MICROSECOND)
    }

    /// Builds a time from whole milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis as u128 * ATTOS_PER_MILLISECOND)
    }

    /// Builds a time from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs as u128 * ATTOS_PER_SECOND)
    }

    /// Returns the period of a `hz` frequency, or `None` for zero.
    #[must_use]
    pub const fn from_hz(hz: u64) -> Option<Self> {
        if hz == 0 {
            None
        } else {
            Some(Self(ATTOS_PER_SECOND / hz as u128))
        }
    }

    /// Raw attosecond count.
    #[must_use]
    pub const fn as_attos(self) -> u128 {
        self.0
    }

    /// Whole nanoseconds, truncated.
    #[must_use]
    pub const fn as_nanos(self) -> u128 {
        self.0 / ATTOS_PER_NANOSECOND
    }

    /// Whole microseconds, truncated.
    #[must_use]
    pub const fn as_micros(self) -> u128 {
        self.0 / ATTOS_PER_MICROSECOND
    }

    /// Returns `true` for the zero time.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` when this is the "never" sentinel.
    #[must_use]
    pub const fn is_never(self) -> bool {
        self.0 == u128::MAX
    }

    /// Saturating addition.
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction; clamps at [`Time::ZERO`].
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Checked addition.
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Saturating multiplication by an integer factor.
    #[must_use]
    pub const fn saturating_mul(self, factor: u64) -> Self {
        Self(self.0.saturating_mul(factor as u128))
    }
}

impl Add for Time {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Time {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub for Time {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            return f.write_str("never");
        }
        let secs = self.0 / ATTOS_PER_SECOND;
        let frac = self.0 % ATTOS_PER_SECOND;
        write!(f, "{secs}.{frac:018}s")
    }
}

/// A device clock frequency in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ClockRate(u64);

impl ClockRate {
    /// Wraps a frequency in Hz. Zero means "unclocked".
    #[must_use]
    pub const fn from_hz(hz: u64) -> Self {
        Self(hz)
    }

    /// Convenience constructor for whole-kHz clocks.
    #[must_use]
    pub const fn from_khz(khz: u64) -> Self {
        Self(khz * 1_000)
    }

    /// Convenience constructor for whole-MHz clocks.
    #[must_use]
    pub const fn from_mhz(mhz: u64) -> Self {
        Self(mhz * 1_000_000)
    }

    /// Frequency in Hz.
    #[must_use]
    pub const fn hz(self) -> u64 {
        self.0
    }

    /// Returns `true` for an unclocked device.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Duration of one cycle, or `None` when unclocked.
    #[must_use]
    pub const fn period(self) -> Option<Time> {
        Time::from_hz(self.0)
    }

    /// Converts a cycle count into a span of simulated time.
    ///
    /// Unclocked devices report [`Time::MAX`]: their cycles never complete.
    #[must_use]
    pub const fn cycles_to_time(self, cycles: u64) -> Time {
        match self.period() {
            Some(period) => period.saturating_mul(cycles),
            None => Time::MAX,
        }
    }

    /// Number of whole cycles that fit in `span`, rounded down.
    #[must_use]
    pub const fn time_to_cycles(self, span: Time) -> u64 {
        match self.period() {
            Some(period) if period.as_attos() > 0 => {
                clamp_u64(span.as_attos() / period.as_attos())
            }
            _ => 0,
        }
    }

    /// Number of cycles needed to cover `span`, rounded up.
    #[must_use]
    pub const fn time_to_cycles_ceil(self, span: Time) -> u64 {
        match self.period() {
            Some(period) if period.as_attos() > 0 => {
                clamp_u64(span.as_attos().div_ceil(period.as_attos()))
            }
            _ => 0,
        }
    }
}

impl fmt::Display for ClockRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.0)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn clamp_u64(value: u128) -> u64 {
    if value > u64::MAX as u128 {
        u64::MAX
    } else {
        value as u64
    }
}

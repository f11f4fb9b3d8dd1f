//! Time APIs for obtaining the current time and calculating with points in time and durations.
//!
//! The link engine never reads a clock on its own. It is handed a [`Timer`] and reports the next
//! point in time at which it wants to be called again, which keeps it deterministic under test.
//! Everything here has microsecond resolution.

use core::fmt;
use core::ops::{Add, AddAssign};

/// A duration with microsecond resolution.
///
/// This can represent a maximum duration of about 1 hour, which is far longer than any timeout the
/// transport deals with.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(u32);

impl Duration {
    /// A zero-length duration.
    pub const ZERO: Self = Duration(0);

    /// Creates a [`Duration`] from a number of microseconds.
    pub const fn from_micros(micros: u32) -> Self {
        Duration(micros)
    }

    /// Creates a [`Duration`] representing the given number of milliseconds.
    pub const fn from_millis(millis: u16) -> Self {
        Duration(millis as u32 * 1_000)
    }

    /// Returns the number of whole milliseconds that fit in `self`.
    pub fn whole_millis(&self) -> u32 {
        self.0 / 1_000
    }

    /// Returns the number of microseconds represented by `self`.
    pub fn as_micros(&self) -> u32 {
        self.0
    }
}

impl Add for Duration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Duration(self.0.checked_add(rhs.0).expect("duration overflow"))
    }
}

impl From<Duration> for core::time::Duration {
    fn from(d: Duration) -> Self {
        core::time::Duration::from_micros(u64::from(d.0))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1000 {
            let (millis, submilli_micros) = (self.whole_millis(), self.0 % 1000);
            if submilli_micros == 0 {
                write!(f, "{}ms", millis)
            } else {
                write!(f, "{}.{:03}ms", millis, submilli_micros)
            }
        } else {
            write!(f, "{}µs", self.0)
        }
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

/// A point in time, relative to an unspecified epoch.
///
/// `Instant`s are obtained from an implementation of [`Timer`]. `Instant`s created from different
/// [`Timer`] instances are not compatible, and mixing them in operations causes unspecified
/// results.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(u64);

impl Instant {
    /// Creates an `Instant` from raw microseconds since an arbitrary implementation-defined
    /// reference point.
    ///
    /// This should only be called from a [`Timer`] implementation.
    pub fn from_raw_micros(micros: u64) -> Self {
        Instant(micros)
    }

    /// Returns the raw value from which this `Instant` was created.
    pub fn raw_micros(&self) -> u64 {
        self.0
    }

    /// Returns the time between `earlier` and `self`, or `None` if `earlier` is later than `self`.
    ///
    /// Durations that do not fit in a [`Duration`] saturate.
    pub fn checked_duration_since(&self, earlier: Instant) -> Option<Duration> {
        let micros = self.0.checked_sub(earlier.0)?;
        Some(Duration(if micros > u64::from(u32::MAX) {
            u32::MAX
        } else {
            micros as u32
        }))
    }
}

/// A [`Duration`] can be added to an [`Instant`], moving the [`Instant`] forwards in time.
impl Add<Duration> for Instant {
    type Output = Self;

    fn add(self, d: Duration) -> Self {
        Instant(self.0 + u64::from(d.as_micros()))
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, d: Duration) {
        *self = *self + d;
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (secs, subsec_micros) = (self.0 / 1_000_000, self.0 % 1_000_000);
        write!(f, "{}.{:06}s", secs, subsec_micros)
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

/// Trait for time providers.
///
/// The driver provides an implementation backed by the OS clock. Tests use a manually advanced
/// mock.
pub trait Timer {
    /// Obtain the current time as an [`Instant`].
    ///
    /// The [`Instant`]s returned by this function must never move backwards in time.
    fn now(&self) -> Instant;
}

impl<T: Timer + ?Sized> Timer for &'_ T {
    fn now(&self) -> Instant {
        (**self).now()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn display() {
        assert_eq!(Duration::from_millis(250).to_string(), "250ms");
        assert_eq!(Duration::from_micros(1500).to_string(), "1.500ms");
        assert_eq!(Duration::from_micros(10).to_string(), "10µs");
        assert_eq!(Instant::from_raw_micros(2_000_123).to_string(), "2.000123s");
    }

    #[test]
    fn duration_since() {
        let a = Instant::from_raw_micros(1_000);
        let b = a + Duration::from_millis(3);
        assert_eq!(b.checked_duration_since(a), Some(Duration::from_micros(3_000)));
        assert_eq!(a.checked_duration_since(b), None);
        assert!(a < b);
    }
}

//! Monotonic microsecond timestamps.
//!
//! Everything in the link core is driven by a caller-supplied clock: the
//! engines never read the wall clock themselves. This keeps the polling
//! model of the firmware intact and makes every timing-sensitive test
//! deterministic.

use std::ops::{Add, AddAssign, Sub};

/// A monotonic instant in microseconds since an arbitrary epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeMicros(pub u64);

impl TimeMicros {
    pub const ZERO: TimeMicros = TimeMicros(0);
    pub const MAX: TimeMicros = TimeMicros(u64::MAX);

    /// Raw microsecond count.
    pub fn micros(self) -> u64 {
        self.0
    }

    /// Microseconds elapsed since `earlier`, saturating at zero.
    pub fn micros_since(self, earlier: TimeMicros) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<u64> for TimeMicros {
    type Output = TimeMicros;

    fn add(self, micros: u64) -> TimeMicros {
        TimeMicros(self.0.saturating_add(micros))
    }
}

impl AddAssign<u64> for TimeMicros {
    fn add_assign(&mut self, micros: u64) {
        self.0 = self.0.saturating_add(micros);
    }
}

impl Sub<TimeMicros> for TimeMicros {
    type Output = u64;

    fn sub(self, earlier: TimeMicros) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Converts whole milliseconds into microseconds.
pub const fn millis_to_micros(ms: u64) -> u64 {
    ms * 1000
}

/// Converts whole seconds into microseconds.
pub const fn secs_to_micros(s: u64) -> u64 {
    s * 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        let t = TimeMicros(1000);
        assert_eq!(t + 500, TimeMicros(1500));
        assert_eq!((t + 500).micros_since(t), 500);
        assert_eq!(t.micros_since(t + 500), 0);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(millis_to_micros(20), 20_000);
        assert_eq!(secs_to_micros(3), 3_000_000);
    }
}

//! Log positions and monotonic time markers.

use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A system change number: a monotonically increasing position used both to
/// order log records and as a commit timestamp.
///
/// [`Scn::MAX`] doubles as "unbounded": a minimum taken over an empty set of
/// positions is `Scn::MAX`, so it never constrains recycling.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Scn(u64);

impl Scn {
    pub const MAX: Scn = Scn(u64::MAX);
    pub const MIN: Scn = Scn(0);

    pub const fn new(val: u64) -> Self {
        Self(val)
    }

    /// Returns the raw value of the position.
    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_max(&self) -> bool {
        self.0 == u64::MAX
    }

    /// Returns the smaller of two optional positions, treating `None` as unbounded.
    pub fn min_opt(a: Option<Scn>, b: Option<Scn>) -> Option<Scn> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }
}

impl fmt::Display for Scn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            write!(f, "MAX")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Microseconds elapsed on a process-wide monotonic clock.
///
/// Used as the "since" marker when asking the timestamp oracle for a timestamp
/// that must be generated after a given local instant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct MonotonicTs(u64);

static CLOCK_BASE: OnceLock<Instant> = OnceLock::new();

impl MonotonicTs {
    pub const fn new(us: u64) -> Self {
        Self(us)
    }

    pub fn current() -> Self {
        let base = CLOCK_BASE.get_or_init(Instant::now);
        // Offset by one so that a reading is never mistaken for the reset value.
        Self(base.elapsed().as_micros() as u64 + 1)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for MonotonicTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_opt_treats_none_as_unbounded() {
        let a = Some(Scn::new(10));
        let b = Some(Scn::new(5));
        assert_eq!(Scn::min_opt(a, b), Some(Scn::new(5)));
        assert_eq!(Scn::min_opt(a, None), a);
        assert_eq!(Scn::min_opt(None, b), b);
        assert_eq!(Scn::min_opt(None, None), None);
    }

    #[test]
    fn test_monotonic_ts_never_goes_back() {
        let t1 = MonotonicTs::current();
        let t2 = MonotonicTs::current();
        assert!(t1.is_valid());
        assert!(t2 >= t1);
    }
}

//! Monotonic timestamps.
//!
//! The engine never reads a clock itself. Every entry point receives `now`
//! from the caller, which keeps the countdown logic deterministic under test.

use std::time::Duration;

/// Time elapsed since an arbitrary fixed origin (usually daemon start).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MonotonicTime(Duration);

impl MonotonicTime {
    /// The origin.
    pub const ZERO: MonotonicTime = MonotonicTime(Duration::ZERO);

    /// Latest representable instant. Saturating arithmetic clamps here.
    pub const MAX: MonotonicTime = MonotonicTime(Duration::MAX);

    pub fn from_duration(since_origin: Duration) -> Self {
        Self(since_origin)
    }

    pub fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    pub fn as_duration(self) -> Duration {
        self.0
    }

    /// `self + delta`, clamped to [`MonotonicTime::MAX`].
    pub fn saturating_add(self, delta: Duration) -> Self {
        Self(self.0.saturating_add(delta))
    }

    /// `self - earlier`, or zero when `earlier` is in the future.
    pub fn saturating_duration_since(self, earlier: MonotonicTime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl From<Duration> for MonotonicTime {
    fn from(since_origin: Duration) -> Self {
        Self(since_origin)
    }
}

//! Expiration countdowns and the periodic sweep that drives them.
//!
//! A countdown is one of three states. `Running` holds an absolute
//! expiration instant; `Paused` holds the time that was left when the
//! pointer entered the popup. Resuming re-anchors the remaining time to the
//! resume instant, so hovering never eats into the countdown.

use crate::backend::Timers;
use crate::time::MonotonicTime;
use std::time::Duration;
use tracing::debug;

/// Timeout requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Never expire (explicit 0).
    Never,
    /// Server default (any negative value).
    Default,
    /// Expire after the given duration.
    After(Duration),
}

impl Timeout {
    /// Interpret the protocol's signed millisecond timeout.
    pub fn from_millis(ms: i32) -> Self {
        match ms {
            0 => Timeout::Never,
            n if n < 0 => Timeout::Default,
            n => Timeout::After(Duration::from_millis(n as u64)),
        }
    }

    /// Concrete duration, or `None` for "never".
    pub fn resolve(self, default: Duration) -> Option<Duration> {
        match self {
            Timeout::Never => None,
            Timeout::Default => Some(default),
            Timeout::After(d) => Some(d),
        }
    }
}

/// Per-notification countdown state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    /// The notification stays until closed.
    NoTimeout,
    /// Counting down towards `expiration`.
    Running {
        expiration: MonotonicTime,
        total: Duration,
    },
    /// Frozen while the pointer is over the popup.
    Paused { remaining: Duration, total: Duration },
}

impl Countdown {
    /// Start a fresh countdown. Any previous pause state is discarded.
    pub fn arm(timeout: Option<Duration>, now: MonotonicTime) -> Self {
        match timeout {
            None => Countdown::NoTimeout,
            Some(total) => Countdown::Running {
                expiration: now.saturating_add(total),
                total,
            },
        }
    }

    pub fn has_timeout(&self) -> bool {
        !matches!(self, Countdown::NoTimeout)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Countdown::Paused { .. })
    }

    /// Freeze the countdown. Returns false if there was nothing to pause.
    pub fn pause(&mut self, now: MonotonicTime) -> bool {
        match *self {
            Countdown::Running { expiration, total } => {
                *self = Countdown::Paused {
                    remaining: expiration.saturating_duration_since(now),
                    total,
                };
                true
            }
            _ => false,
        }
    }

    /// Continue a paused countdown from `now`. Returns false if not paused.
    pub fn resume(&mut self, now: MonotonicTime) -> bool {
        match *self {
            Countdown::Paused { remaining, total } => {
                *self = Countdown::Running {
                    expiration: now.saturating_add(remaining),
                    total,
                };
                true
            }
            _ => false,
        }
    }

    /// Time left before expiry, or `None` without a timeout.
    pub fn remaining(&self, now: MonotonicTime) -> Option<Duration> {
        match *self {
            Countdown::NoTimeout => None,
            Countdown::Running { expiration, .. } => Some(expiration.saturating_duration_since(now)),
            Countdown::Paused { remaining, .. } => Some(remaining),
        }
    }

    /// True once a running countdown has passed its expiration instant.
    pub fn is_expired(&self, now: MonotonicTime) -> bool {
        match *self {
            Countdown::Running { expiration, .. } => now > expiration,
            _ => false,
        }
    }
}

/// Owns the lazily started periodic sweep.
#[derive(Debug, Default)]
pub struct ExpirationScheduler {
    ticking: bool,
}

impl ExpirationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    /// Start the sweep if it is not already running.
    pub fn ensure_ticking(&mut self, timers: &mut impl Timers) {
        if !self.ticking {
            debug!("Starting expiration tick");
            timers.start_expiration_tick();
            self.ticking = true;
        }
    }

    /// Stop the sweep. A no-op when already stopped.
    pub fn stop(&mut self, timers: &mut impl Timers) {
        if self.ticking {
            debug!("Stopping expiration tick");
            timers.stop_expiration_tick();
            self.ticking = false;
        }
    }
}

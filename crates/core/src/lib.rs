//! notifyd Core Engine
//!
//! Platform-agnostic notification lifecycle and positioning engine.
//!
//! This crate owns everything that decides *when* and *where* a popup lives:
//! - Notification identities and their registry
//! - Expiration countdowns with hover pause/resume
//! - The idle-exit timer armed while nothing is on screen
//! - Per-monitor popup stacks and corner placement
//! - Anchoring popups to a source window through the native window tree
//!
//! Rendering, audio, timers and the native window system are reached only
//! through the traits in [`backend`].

pub mod backend;
pub mod engine;
pub mod expiration;
pub mod hints;
pub mod idle;
pub mod registry;
pub mod reposition;
pub mod stack;
pub mod time;
pub mod tracker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use backend::{Host, NativeError, Renderer, SignalSink, SoundPlayer, Timers, WindowSystem};
pub use engine::{Engine, EngineSettings, NotifyRequest};
pub use expiration::{Countdown, Timeout};
pub use hints::{HintValue, IconSource, ImageData};
pub use stack::StackLocation;
pub use time::MonotonicTime;
pub use tracker::StructureEvent;

/// Identifier handed to clients. Zero is never a live notification.
pub type NotificationId = u32;

/// Native window identifier (an X11 XID on the reference platform).
pub type NativeWindowId = u32;

/// Maximum number of live notifications.
pub const MAX_NOTIFICATIONS: usize = 20;

/// Period of the expiration sweep.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Delay used to coalesce bursts of source-window geometry changes.
pub const REPOSITION_DELAY: Duration = Duration::from_millis(50);

/// Quiet period after which an empty daemon exits.
pub const IDLE_EXIT_DELAY: Duration = Duration::from_secs(30);

/// Timeout applied when a client asks for the server default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(7000);

/// Opaque reference to a rendered popup, issued by the [`Renderer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PopupHandle(pub u64);

/// A point in root-window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Width and height of a popup in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

/// A rectangle in screen coordinates (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Get the right edge x-coordinate.
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Get the bottom edge y-coordinate.
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Check whether a point lies inside this rectangle.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    /// Overlapping area of two rectangles, if any.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right > x && bottom > y {
            Some(Rect::new(x, y, right - x, bottom - y))
        } else {
            None
        }
    }

    /// Centre point, rounding towards the origin.
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Why a notification went away. Wire codes follow the desktop notification protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The countdown ran out (or the popup was destroyed behind our back).
    Expired,
    /// The user clicked the popup or one of its actions.
    Dismissed,
    /// A client called close.
    ClosedByCall,
    /// The popup was never shown (screensaver or fullscreen window active).
    Undelivered,
}

impl CloseReason {
    /// Numeric reason code sent with the closed signal.
    pub fn code(self) -> u32 {
        match self {
            CloseReason::Expired => 1,
            CloseReason::Dismissed => 2,
            CloseReason::ClosedByCall => 3,
            CloseReason::Undelivered => 4,
        }
    }
}

/// Errors returned to clients by the request handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("Exceeded maximum number of notifications")]
    CapacityExceeded,

    #[error("{0} is not a valid notification ID")]
    InvalidId(NotificationId),

    #[error("Notification {0} not found")]
    NotFound(NotificationId),

    #[error(transparent)]
    Registry(#[from] registry::RegistryError),

    #[error("Failed to create popup: {0}")]
    Popup(String),
}

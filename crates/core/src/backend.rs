//! Collaborator interfaces.
//!
//! The engine drives these traits and never touches a display server, an
//! audio device or a clock directly. The daemon provides real
//! implementations; tests provide recording fakes.

use crate::hints::{HintValue, IconSource};
use crate::{CloseReason, NativeWindowId, NotificationId, Point, PopupHandle, Rect, Size};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a native window-system query.
///
/// The engine treats every native failure as "skip this step"; the
/// variants exist for logging.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    #[error("Window {0:#x} no longer exists")]
    WindowGone(NativeWindowId),

    #[error("Native request failed: {0}")]
    RequestFailed(String),
}

/// Parent and root of a native window, as reported by a tree query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLinks {
    pub parent: NativeWindowId,
    pub root: NativeWindowId,
}

/// Draws popups. Coordinates are root-window pixels.
pub trait Renderer {
    fn create_popup(&mut self) -> Result<PopupHandle, String>;
    fn destroy_popup(&mut self, popup: PopupHandle);
    fn set_text(&mut self, popup: PopupHandle, summary: &str, body: &str);
    fn set_hints(&mut self, popup: PopupHandle, hints: &HashMap<String, HintValue>);
    fn set_icon(&mut self, popup: PopupHandle, icon: &IconSource);
    fn clear_actions(&mut self, popup: PopupHandle);
    fn add_action(&mut self, popup: PopupHandle, key: &str, label: &str);
    /// Point the popup's arrow at `anchor`, or remove the arrow.
    fn set_arrow(&mut self, popup: PopupHandle, anchor: Option<Point>);
    fn move_popup(&mut self, popup: PopupHandle, position: Point);
    fn show(&mut self, popup: PopupHandle);
    fn hide(&mut self, popup: PopupHandle);
    /// Total timeout, for themes that draw a countdown.
    fn set_timeout(&mut self, popup: PopupHandle, total: Duration);
    /// Remaining time on the countdown indicator.
    fn tick(&mut self, popup: PopupHandle, remaining: Duration);
    fn popup_size(&self, popup: PopupHandle) -> Size;
    /// Themes may insist on stacking even when a position hint was given.
    fn always_stack(&self, popup: PopupHandle) -> bool {
        let _ = popup;
        false
    }
}

/// Read-only queries and event subscriptions on the native window tree.
pub trait WindowSystem {
    fn query_tree(&mut self, window: NativeWindowId) -> Result<TreeLinks, NativeError>;
    fn watch_structure(&mut self, window: NativeWindowId);
    fn unwatch_structure(&mut self, window: NativeWindowId);
    /// Route structure events for watched windows to the engine.
    fn install_structure_filter(&mut self);
    fn remove_structure_filter(&mut self);
    /// Window rectangle with its origin translated to root coordinates.
    fn root_geometry(&mut self, window: NativeWindowId) -> Result<Rect, NativeError>;
    /// Index of the monitor under the pointer.
    fn monitor_at_pointer(&mut self) -> Option<usize>;
    fn screensaver_active(&mut self) -> bool;
    fn fullscreen_window_active(&mut self) -> bool;
}

/// Outbound signals addressed to the client that created a notification.
pub trait SignalSink {
    fn action_invoked(&mut self, destination: &str, id: NotificationId, action_key: &str);
    fn notification_closed(&mut self, destination: &str, id: NotificationId, reason: CloseReason);
}

pub trait SoundPlayer {
    fn play_file(&mut self, path: &Path);
}

/// Deferred callbacks. Each one comes back into the engine through the
/// matching entry point (`tick`, `reposition_due`, ...).
pub trait Timers {
    fn start_expiration_tick(&mut self);
    fn stop_expiration_tick(&mut self);
    fn arm_idle_exit(&mut self);
    fn disarm_idle_exit(&mut self);
    fn schedule_reposition(&mut self, id: NotificationId, delay: Duration);
    /// Queue an "undelivered" close for the next loop iteration.
    fn schedule_undelivered_close(&mut self, id: NotificationId);
}

/// Everything the engine needs from its environment.
pub trait Host: Renderer + WindowSystem + SignalSink + SoundPlayer + Timers {}

impl<T: Renderer + WindowSystem + SignalSink + SoundPlayer + Timers> Host for T {}

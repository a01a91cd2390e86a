//! The notification engine.
//!
//! [`Engine`] owns the registry, the expiration scheduler, the monitor
//! stacks, the source-window tracker and the reposition queue. Every entry
//! point takes the host by `&mut` and the current time where it matters;
//! the engine holds no references to its environment between calls.
//!
//! Teardown of a notification always takes the entry out of the registry
//! before any side effect runs, so a "popup destroyed" event triggered by
//! that teardown finds nothing left to close.

use crate::backend::Host;
use crate::expiration::{Countdown, ExpirationScheduler, Timeout};
use crate::hints::{self, HintValue, Placement};
use crate::registry::{NotificationEntry, Registry};
use crate::reposition::RepositionQueue;
use crate::stack::{StackLocation, StackManager};
use crate::time::MonotonicTime;
use crate::tracker::{self, SourceWindowTracker, StructureEvent, TrackerAction};
use crate::{
    CloseReason, NotificationId, NotifyError, PopupHandle, Rect, DEFAULT_TIMEOUT,
    MAX_NOTIFICATIONS,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runtime-adjustable preferences.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Corner the stacks grow from.
    pub location: StackLocation,
    /// Place stacked popups on the monitor under the pointer.
    pub use_active_monitor: bool,
    /// Monitor used when `use_active_monitor` is off.
    pub monitor_number: usize,
    pub sound_enabled: bool,
    /// Used for negative client timeouts.
    pub default_timeout: Duration,
    pub max_notifications: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            location: StackLocation::default(),
            use_active_monitor: false,
            monitor_number: 0,
            sound_enabled: true,
            default_timeout: DEFAULT_TIMEOUT,
            max_notifications: MAX_NOTIFICATIONS,
        }
    }
}

/// A client's request to show or replace a notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyRequest {
    /// Client that will receive the signals for this notification.
    pub sender: String,
    pub app_name: String,
    /// Live id to replace, or 0 for a new notification.
    pub replaces_id: NotificationId,
    pub icon: String,
    pub summary: String,
    pub body: String,
    /// Flat `[key, label, key, label, ...]` list.
    pub actions: Vec<String>,
    pub hints: HashMap<String, HintValue>,
    /// 0 never expires, negative uses the default, positive is milliseconds.
    pub timeout_ms: i32,
}

#[derive(Debug)]
pub struct Engine {
    settings: EngineSettings,
    registry: Registry,
    scheduler: ExpirationScheduler,
    stacks: StackManager,
    tracker: SourceWindowTracker,
    reposition: RepositionQueue,
}

impl Engine {
    /// Create an engine with one stack per monitor work area.
    pub fn new(settings: EngineSettings, work_areas: &[Rect]) -> Self {
        let stacks = StackManager::new(settings.location, work_areas);
        Self {
            settings,
            registry: Registry::new(),
            scheduler: ExpirationScheduler::new(),
            stacks,
            tracker: SourceWindowTracker::new(),
            reposition: RepositionQueue::new(),
        }
    }

    /// Arm the idle-exit timer; the daemon starts with nothing to show.
    pub fn start(&mut self, host: &mut impl Host) {
        self.registry.arm_idle_if_empty(host);
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn ids(&self) -> Vec<NotificationId> {
        self.registry.ids()
    }

    pub fn get(&self, id: NotificationId) -> Option<&NotificationEntry> {
        self.registry.get(id)
    }

    pub fn stacks(&self) -> &StackManager {
        &self.stacks
    }

    pub fn tracker(&self) -> &SourceWindowTracker {
        &self.tracker
    }

    pub fn is_ticking(&self) -> bool {
        self.scheduler.is_ticking()
    }

    /// Show a new notification or replace a live one. Returns its id.
    pub fn notify(
        &mut self,
        host: &mut impl Host,
        now: MonotonicTime,
        request: NotifyRequest,
    ) -> Result<NotificationId, NotifyError> {
        let replacing = (request.replaces_id > 0 && self.registry.contains(request.replaces_id))
            .then_some(request.replaces_id);

        if replacing.is_none() && self.registry.len() >= self.settings.max_notifications {
            warn!(
                "Rejecting notification from {}: {} already live",
                request.app_name,
                self.registry.len()
            );
            return Err(NotifyError::CapacityExceeded);
        }

        let (id, popup, previous_source) = match replacing.and_then(|id| self.registry.get(id)) {
            Some(entry) => {
                host.clear_actions(entry.popup);
                (entry.id, entry.popup, entry.source_window)
            }
            None => {
                let id = self.registry.allocate_id()?;
                let popup = host.create_popup().map_err(NotifyError::Popup)?;
                (id, popup, None)
            }
        };
        let is_new = replacing.is_none();

        host.set_text(popup, &request.summary, &request.body);
        host.set_hints(popup, &request.hints);

        let placement = hints::placement(&request.hints);
        let sound = hints::sound_file(&request.hints, self.settings.sound_enabled);

        for (key, label) in hints::action_buttons(&request.actions) {
            host.add_action(popup, &key, &label);
        }
        if let Some(icon) = hints::icon_source(&request.icon, &request.hints) {
            host.set_icon(popup, &icon);
        }

        let placement = if host.always_stack(popup) {
            Placement::Stack
        } else {
            placement
        };
        let source_window = match placement {
            Placement::SourceWindow(window) => {
                self.stacks.remove(host, popup);
                Some(window)
            }
            Placement::Fixed(point) => {
                self.stacks.remove(host, popup);
                host.set_arrow(popup, Some(point));
                host.move_popup(popup, point);
                None
            }
            Placement::Stack => {
                host.set_arrow(popup, None);
                let monitor = self.target_monitor(host);
                self.stacks.place(host, popup, monitor, is_new);
                None
            }
        };

        let timeout = Timeout::from_millis(request.timeout_ms).resolve(self.settings.default_timeout);
        let countdown = Countdown::arm(timeout, now);
        if let Some(total) = timeout {
            host.set_timeout(popup, total);
        }

        match self.registry.get_mut(id) {
            Some(entry) => {
                entry.countdown = countdown;
                entry.source_window = source_window;
                entry.sender = request.sender.clone();
            }
            None => self.registry.put(
                NotificationEntry {
                    id,
                    popup,
                    countdown,
                    source_window,
                    sender: request.sender.clone(),
                },
                host,
            ),
        }
        if countdown.has_timeout() {
            self.scheduler.ensure_ticking(host);
        }

        match source_window {
            Some(source) => {
                self.tracker.begin_tracking(host, id, source);
                tracker::sync_position(host, popup, source);
            }
            None if previous_source.is_some() => self.tracker.forget(host, id),
            None => {}
        }

        if !countdown.has_timeout() || (!host.screensaver_active() && !host.fullscreen_window_active()) {
            host.show(popup);
            if let Some(path) = sound {
                host.play_file(&path);
            }
        } else {
            info!(
                "Notification {} not shown: screensaver or fullscreen window active",
                id
            );
            host.schedule_undelivered_close(id);
        }

        info!(
            "Notification {} {} for {} ({})",
            id,
            if is_new { "created" } else { "replaced" },
            request.app_name,
            request.sender
        );
        Ok(id)
    }

    /// Close on behalf of a client.
    pub fn close(&mut self, host: &mut impl Host, id: NotificationId) -> Result<(), NotifyError> {
        if id == 0 {
            return Err(NotifyError::InvalidId(id));
        }
        if self.close_with(host, id, CloseReason::ClosedByCall, true) {
            Ok(())
        } else {
            Err(NotifyError::NotFound(id))
        }
    }

    /// Pointer entered a popup: freeze its countdown.
    pub fn pointer_entered(&mut self, popup: PopupHandle, now: MonotonicTime) {
        if let Some(entry) = self.entry_for_popup(popup) {
            if entry.countdown.pause(now) {
                debug!("Notification {} paused", entry.id);
            }
        }
    }

    /// Pointer left a popup: continue its countdown from now.
    pub fn pointer_left(&mut self, popup: PopupHandle, now: MonotonicTime) {
        if let Some(entry) = self.entry_for_popup(popup) {
            if entry.countdown.resume(now) {
                debug!("Notification {} resumed", entry.id);
            }
        }
    }

    /// Click on the popup body invokes the default action and dismisses it.
    pub fn popup_clicked(&mut self, host: &mut impl Host, popup: PopupHandle) {
        self.action_invoked(host, popup, "default");
    }

    /// Click on an action button.
    pub fn action_invoked(&mut self, host: &mut impl Host, popup: PopupHandle, action_key: &str) {
        let Some(id) = self.registry.find_by_popup(popup) else {
            return;
        };
        if let Some(entry) = self.registry.get(id) {
            debug!("Notification {} action '{}' invoked", id, action_key);
            host.action_invoked(&entry.sender, id, action_key);
        }
        self.close_with(host, id, CloseReason::Dismissed, true);
    }

    /// The popup was destroyed outside of our teardown.
    pub fn popup_destroyed(&mut self, host: &mut impl Host, popup: PopupHandle) {
        if let Some(id) = self.registry.find_by_popup(popup) {
            debug!("Popup for notification {} destroyed externally", id);
            self.close_with(host, id, CloseReason::Expired, false);
        }
    }

    /// Periodic expiration sweep.
    pub fn tick(&mut self, host: &mut impl Host, now: MonotonicTime) {
        let mut expired = Vec::new();
        let mut has_more = false;

        for entry in self.registry.entries_mut() {
            if entry.countdown.is_expired(now) {
                host.tick(entry.popup, Duration::ZERO);
                expired.push(entry.id);
                continue;
            }
            match entry.countdown {
                Countdown::Running { expiration, .. } => {
                    host.tick(entry.popup, expiration.saturating_duration_since(now));
                    has_more = true;
                }
                Countdown::Paused { .. } => has_more = true,
                Countdown::NoTimeout => {}
            }
        }

        expired.sort_unstable();
        for id in expired {
            self.close_with(host, id, CloseReason::Expired, false);
        }

        if !has_more {
            self.scheduler.stop(host);
        }
    }

    /// A debounced reposition timer fired.
    pub fn reposition_due(&mut self, host: &mut impl Host, id: NotificationId) {
        self.reposition.fire(id);
        let Some(entry) = self.registry.get(id) else {
            return;
        };
        if let Some(source) = entry.source_window {
            tracker::sync_position(host, entry.popup, source);
        }
    }

    /// The queued "not shown" close for `id` is due.
    pub fn undelivered_due(&mut self, host: &mut impl Host, id: NotificationId) {
        self.close_with(host, id, CloseReason::Undelivered, true);
    }

    /// Structure change on a native window we may be watching.
    pub fn structure_event(&mut self, host: &mut impl Host, event: StructureEvent) {
        match self.tracker.route(host, event) {
            Some(TrackerAction::Debounce(id)) => {
                self.reposition.schedule(host, id);
            }
            Some(TrackerAction::Rewalk(id)) => {
                let Some(entry) = self.registry.get(id) else {
                    return;
                };
                let popup = entry.popup;
                if let Some(source) = entry.source_window {
                    self.tracker.begin_tracking(host, id, source);
                    tracker::sync_position(host, popup, source);
                }
            }
            None => {}
        }
    }

    /// Monitor count or geometry changed.
    pub fn monitors_changed(&mut self, host: &mut impl Host, work_areas: &[Rect]) {
        self.stacks.monitors_changed(host, work_areas);
    }

    /// The desktop work area changed (panels moved). Re-lay out every stack.
    pub fn work_area_changed(&mut self, host: &mut impl Host, work_areas: &[Rect]) {
        debug!("Work area changed, repositioning stacks");
        self.stacks.monitors_changed(host, work_areas);
    }

    pub fn set_stack_location(&mut self, host: &mut impl Host, location: StackLocation) {
        self.settings.location = location;
        self.stacks.set_location(host, location);
    }

    /// Apply reloaded preferences.
    pub fn apply_settings(&mut self, host: &mut impl Host, settings: EngineSettings) {
        self.set_stack_location(host, settings.location);
        self.settings = settings;
    }

    /// The idle-exit timer fired. Returns true if the daemon should exit.
    pub fn idle_exit_due(&mut self) -> bool {
        let should_exit = self.registry.idle().is_armed() && self.registry.is_empty();
        if should_exit {
            self.registry.idle_mut().fired();
        } else {
            debug!("Ignoring stale idle-exit timer");
        }
        should_exit
    }

    /// Tear down every popup without signalling clients.
    pub fn shutdown(&mut self, host: &mut impl Host) {
        for id in self.registry.ids() {
            if let Some(entry) = self.registry.remove(id, host) {
                self.teardown(host, entry, true);
            }
        }
        self.scheduler.stop(host);
    }

    fn target_monitor(&self, host: &mut impl Host) -> usize {
        if self.settings.use_active_monitor {
            host.monitor_at_pointer().unwrap_or(0)
        } else {
            self.settings.monitor_number
        }
    }

    fn entry_for_popup(&mut self, popup: PopupHandle) -> Option<&mut NotificationEntry> {
        let id = self.registry.find_by_popup(popup)?;
        self.registry.get_mut(id)
    }

    /// Remove `id` and run its teardown. Returns false if it was not live.
    fn close_with(
        &mut self,
        host: &mut impl Host,
        id: NotificationId,
        reason: CloseReason,
        hide: bool,
    ) -> bool {
        let Some(entry) = self.registry.remove(id, host) else {
            return false;
        };
        host.notification_closed(&entry.sender, id, reason);
        self.teardown(host, entry, hide);
        info!("Notification {} closed ({:?})", id, reason);
        true
    }

    fn teardown(&mut self, host: &mut impl Host, entry: NotificationEntry, hide: bool) {
        if hide {
            host.hide(entry.popup);
        }
        self.stacks.remove(host, entry.popup);
        if entry.source_window.is_some() {
            self.tracker.forget(host, entry.id);
        }
        host.destroy_popup(entry.popup);
    }
}

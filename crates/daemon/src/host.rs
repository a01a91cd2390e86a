//! The daemon's implementation of the engine host traits.
//!
//! Rendering and window-system queries go to X11, timers become tokio tasks
//! that post [`DaemonEvent`]s back to the event loop, signals are written to
//! client sessions and sounds are played by an external command.

use crate::config::Config;
use crate::DaemonEvent;
use notifyd_core::backend::{
    NativeError, Renderer, SignalSink, SoundPlayer, Timers, TreeLinks, WindowSystem,
};
use notifyd_core::{
    CloseReason, HintValue, IconSource, NativeWindowId, NotificationId, Point, PopupHandle, Rect,
    Size, IDLE_EXIT_DELAY, TICK_INTERVAL,
};
use notifyd_ipc::{IpcMessage, IpcSignal};
use notifyd_platform_x11::{PopupManager, X11Display};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Connected IPC clients and their outgoing queues.
#[derive(Default)]
pub struct Sessions {
    outboxes: HashMap<String, mpsc::UnboundedSender<IpcMessage>>,
    subscribers: HashSet<String>,
}

impl Sessions {
    pub fn open(&mut self, session: String, outbox: mpsc::UnboundedSender<IpcMessage>) {
        self.outboxes.insert(session.clone(), outbox);
        debug!("Session {} opened ({} open)", session, self.len());
    }

    pub fn close(&mut self, session: &str) {
        debug!("Session {} closed", session);
        self.outboxes.remove(session);
        self.subscribers.remove(session);
    }

    /// Copy every future signal to `session`.
    pub fn subscribe(&mut self, session: &str) -> bool {
        if !self.outboxes.contains_key(session) {
            return false;
        }
        self.subscribers.insert(session.to_string())
    }

    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// Send `signal` to the session that owns the notification and to all
    /// subscribers. Sessions whose writer has gone away are dropped.
    pub fn deliver(&mut self, destination: &str, signal: IpcSignal) {
        let mut targets: Vec<String> = Vec::new();
        if self.outboxes.contains_key(destination) {
            targets.push(destination.to_string());
        } else {
            debug!("Signal for {} dropped: session is gone", destination);
        }
        targets.extend(
            self.subscribers
                .iter()
                .filter(|s| s.as_str() != destination)
                .cloned(),
        );

        for session in targets {
            let sent = self
                .outboxes
                .get(&session)
                .map(|outbox| outbox.send(IpcMessage::Signal(signal.clone())).is_ok())
                .unwrap_or(false);
            if !sent {
                self.close(&session);
            }
        }
    }
}

/// Timer tasks owned by the daemon. Each fires by posting an event.
pub struct TimerTasks {
    events: mpsc::Sender<DaemonEvent>,
    tick: Option<JoinHandle<()>>,
    idle: Option<JoinHandle<()>>,
    /// The engine wants the idle timer running, whether or not it is enabled.
    idle_requested: bool,
    idle_exit_enabled: bool,
}

impl TimerTasks {
    pub fn new(events: mpsc::Sender<DaemonEvent>, idle_exit_enabled: bool) -> Self {
        Self {
            events,
            tick: None,
            idle: None,
            idle_requested: false,
            idle_exit_enabled,
        }
    }

    /// Turn idle exit on or off. Turning it on while the engine has the
    /// timer armed starts the countdown now.
    pub fn set_idle_exit(&mut self, enabled: bool) {
        self.idle_exit_enabled = enabled;
        if !enabled {
            if let Some(handle) = self.idle.take() {
                handle.abort();
            }
        } else if self.idle_requested && self.idle.is_none() {
            self.spawn_idle();
        }
    }

    fn spawn_idle(&mut self) {
        if let Some(handle) = self.idle.take() {
            handle.abort();
        }
        self.idle = Some(self.post_after(IDLE_EXIT_DELAY, DaemonEvent::IdleExit));
    }

    pub fn is_ticking(&self) -> bool {
        self.tick.is_some()
    }

    pub fn idle_armed(&self) -> bool {
        self.idle.is_some()
    }

    /// Abort every pending timer.
    pub fn cancel_all(&mut self) {
        if let Some(handle) = self.tick.take() {
            handle.abort();
        }
        if let Some(handle) = self.idle.take() {
            handle.abort();
        }
    }

    fn post_after(&self, delay: Duration, event: DaemonEvent) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = events.send(event).await;
        })
    }
}

impl Timers for TimerTasks {
    fn start_expiration_tick(&mut self) {
        if self.tick.is_some() {
            return;
        }
        let events = self.events.clone();
        self.tick = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if events.send(DaemonEvent::ExpirationTick).await.is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_expiration_tick(&mut self) {
        if let Some(handle) = self.tick.take() {
            handle.abort();
        }
    }

    fn arm_idle_exit(&mut self) {
        self.idle_requested = true;
        if self.idle_exit_enabled {
            self.spawn_idle();
        }
    }

    fn disarm_idle_exit(&mut self) {
        self.idle_requested = false;
        if let Some(handle) = self.idle.take() {
            handle.abort();
        }
    }

    fn schedule_reposition(&mut self, id: NotificationId, delay: Duration) {
        // Stale firings are ignored by the engine's queue, so the handle is not kept.
        drop(self.post_after(delay, DaemonEvent::Reposition(id)));
    }

    fn schedule_undelivered_close(&mut self, id: NotificationId) {
        drop(self.post_after(Duration::ZERO, DaemonEvent::Undelivered(id)));
    }
}

/// Everything the engine talks to, bundled for the event loop.
pub struct DaemonHost {
    pub display: X11Display,
    pub popups: PopupManager,
    pub timers: TimerTasks,
    pub sessions: Sessions,
    sound_command: String,
}

impl DaemonHost {
    pub fn new(display: X11Display, popups: PopupManager, timers: TimerTasks, config: &Config) -> Self {
        Self {
            display,
            popups,
            timers,
            sessions: Sessions::default(),
            sound_command: config.sound.command.clone(),
        }
    }

    /// Pick up the host-side parts of a (re)loaded config.
    pub fn configure(&mut self, config: &Config) {
        self.sound_command = config.sound.command.clone();
        self.timers.set_idle_exit(config.behavior.idle_exit);
    }
}

impl Renderer for DaemonHost {
    fn create_popup(&mut self) -> Result<PopupHandle, String> {
        self.popups.create_popup()
    }
    fn destroy_popup(&mut self, popup: PopupHandle) {
        self.popups.destroy_popup(popup)
    }
    fn set_text(&mut self, popup: PopupHandle, summary: &str, body: &str) {
        self.popups.set_text(popup, summary, body)
    }
    fn set_hints(&mut self, popup: PopupHandle, hints: &HashMap<String, HintValue>) {
        self.popups.set_hints(popup, hints)
    }
    fn set_icon(&mut self, popup: PopupHandle, icon: &IconSource) {
        self.popups.set_icon(popup, icon)
    }
    fn clear_actions(&mut self, popup: PopupHandle) {
        self.popups.clear_actions(popup)
    }
    fn add_action(&mut self, popup: PopupHandle, key: &str, label: &str) {
        self.popups.add_action(popup, key, label)
    }
    fn set_arrow(&mut self, popup: PopupHandle, anchor: Option<Point>) {
        self.popups.set_arrow(popup, anchor)
    }
    fn move_popup(&mut self, popup: PopupHandle, position: Point) {
        self.popups.move_popup(popup, position)
    }
    fn show(&mut self, popup: PopupHandle) {
        self.popups.show(popup)
    }
    fn hide(&mut self, popup: PopupHandle) {
        self.popups.hide(popup)
    }
    fn set_timeout(&mut self, popup: PopupHandle, total: Duration) {
        self.popups.set_timeout(popup, total)
    }
    fn tick(&mut self, popup: PopupHandle, remaining: Duration) {
        self.popups.tick(popup, remaining)
    }
    fn popup_size(&self, popup: PopupHandle) -> Size {
        self.popups.popup_size(popup)
    }
    fn always_stack(&self, popup: PopupHandle) -> bool {
        self.popups.always_stack(popup)
    }
}

impl WindowSystem for DaemonHost {
    fn query_tree(&mut self, window: NativeWindowId) -> Result<TreeLinks, NativeError> {
        self.display.query_tree(window)
    }
    fn watch_structure(&mut self, window: NativeWindowId) {
        self.display.watch_structure(window)
    }
    fn unwatch_structure(&mut self, window: NativeWindowId) {
        self.display.unwatch_structure(window)
    }
    fn install_structure_filter(&mut self) {
        self.display.install_structure_filter()
    }
    fn remove_structure_filter(&mut self) {
        self.display.remove_structure_filter()
    }
    fn root_geometry(&mut self, window: NativeWindowId) -> Result<Rect, NativeError> {
        self.display.root_geometry(window)
    }
    fn monitor_at_pointer(&mut self) -> Option<usize> {
        self.display.monitor_at_pointer()
    }
    fn screensaver_active(&mut self) -> bool {
        self.display.screensaver_active()
    }
    fn fullscreen_window_active(&mut self) -> bool {
        self.display.fullscreen_window_active()
    }
}

impl SignalSink for DaemonHost {
    fn action_invoked(&mut self, destination: &str, id: NotificationId, action_key: &str) {
        self.sessions.deliver(
            destination,
            IpcSignal::ActionInvoked {
                id,
                action_key: action_key.to_string(),
            },
        );
    }

    fn notification_closed(&mut self, destination: &str, id: NotificationId, reason: CloseReason) {
        self.sessions
            .deliver(destination, IpcSignal::NotificationClosed { id, reason });
    }
}

impl SoundPlayer for DaemonHost {
    fn play_file(&mut self, path: &Path) {
        play_with(&self.sound_command, path);
    }
}

impl Timers for DaemonHost {
    fn start_expiration_tick(&mut self) {
        self.timers.start_expiration_tick()
    }
    fn stop_expiration_tick(&mut self) {
        self.timers.stop_expiration_tick()
    }
    fn arm_idle_exit(&mut self) {
        self.timers.arm_idle_exit()
    }
    fn disarm_idle_exit(&mut self) {
        self.timers.disarm_idle_exit()
    }
    fn schedule_reposition(&mut self, id: NotificationId, delay: Duration) {
        self.timers.schedule_reposition(id, delay)
    }
    fn schedule_undelivered_close(&mut self, id: NotificationId) {
        self.timers.schedule_undelivered_close(id)
    }
}

/// Programs tried in order to open a link.
const URL_OPENERS: &[&str] = &["xdg-open", "gvfs-open"];

/// Open `url` with the first opener that can be started.
pub fn open_url(url: &str) {
    if open_url_with(URL_OPENERS, url).is_none() {
        warn!("Unable to open {}: no URL opener found", url);
    }
}

/// Returns the program that was started, if any.
fn open_url_with<'a>(programs: &[&'a str], url: &str) -> Option<&'a str> {
    for &program in programs {
        let spawned = tokio::process::Command::new(program)
            .arg(url)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => {
                debug!("Opening {} with {}", url, program);
                tokio::spawn(async move {
                    if let Err(e) = child.wait().await {
                        debug!("URL opener did not exit cleanly: {}", e);
                    }
                });
                return Some(program);
            }
            Err(e) => debug!("Could not start {}: {}", program, e),
        }
    }
    None
}

/// Run `<command> <path>` in the background and reap it.
fn play_with(command: &str, path: &Path) {
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        return;
    };
    let spawned = tokio::process::Command::new(program)
        .args(parts)
        .arg(path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .spawn();
    match spawned {
        Ok(mut child) => {
            tokio::spawn(async move {
                if let Err(e) = child.wait().await {
                    debug!("Sound player did not exit cleanly: {}", e);
                }
            });
        }
        Err(e) => warn!("Failed to play {}: {}", path.display(), e),
    }
}

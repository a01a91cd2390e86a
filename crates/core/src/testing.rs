//! Recording fake host shared by the unit tests and by downstream crates
//! through the `testing` feature.

use crate::backend::{
    NativeError, Renderer, SignalSink, SoundPlayer, Timers, TreeLinks, WindowSystem,
};
use crate::hints::{HintValue, IconSource};
use crate::{CloseReason, NativeWindowId, NotificationId, Point, PopupHandle, Rect, Size};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ROOT_WINDOW: NativeWindowId = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(PopupHandle),
    Destroy(PopupHandle),
    SetText(PopupHandle, String, String),
    SetHints(PopupHandle),
    SetIcon(PopupHandle, IconSource),
    ClearActions(PopupHandle),
    AddAction(PopupHandle, String, String),
    SetArrow(PopupHandle, Option<Point>),
    Move(PopupHandle, Point),
    Show(PopupHandle),
    Hide(PopupHandle),
    SetTimeout(PopupHandle, Duration),
    Tick(PopupHandle, Duration),
    Watch(NativeWindowId),
    Unwatch(NativeWindowId),
    InstallFilter,
    RemoveFilter,
    ActionInvoked(String, NotificationId, String),
    Closed(String, NotificationId, CloseReason),
    PlaySound(PathBuf),
    StartTick,
    StopTick,
    ArmIdle,
    DisarmIdle,
    ScheduleReposition(NotificationId, Duration),
    ScheduleUndelivered(NotificationId),
}

pub struct FakeHost {
    pub calls: Vec<Call>,
    next_popup: u64,
    /// window -> (parent, geometry relative to parent)
    windows: HashMap<NativeWindowId, (NativeWindowId, Rect)>,
    pub pointer_monitor: Option<usize>,
    pub screensaver: bool,
    pub fullscreen: bool,
    pub always_stack: bool,
    pub size: Size,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            next_popup: 100,
            windows: HashMap::new(),
            pointer_monitor: None,
            screensaver: false,
            fullscreen: false,
            always_stack: false,
            size: Size::new(300, 80),
        }
    }

    pub fn add_window(&mut self, window: NativeWindowId, parent: NativeWindowId, local: Rect) {
        self.windows.insert(window, (parent, local));
    }

    pub fn reparent(&mut self, window: NativeWindowId, new_parent: NativeWindowId) {
        if let Some(entry) = self.windows.get_mut(&window) {
            entry.0 = new_parent;
        }
    }

    pub fn move_window(&mut self, window: NativeWindowId, x: i32, y: i32) {
        if let Some(entry) = self.windows.get_mut(&window) {
            entry.1.x = x;
            entry.1.y = y;
        }
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn closed(&self) -> Vec<(NotificationId, CloseReason)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Closed(_, id, reason) => Some((*id, *reason)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for FakeHost {
    fn create_popup(&mut self) -> Result<PopupHandle, String> {
        self.next_popup += 1;
        let popup = PopupHandle(self.next_popup);
        self.calls.push(Call::Create(popup));
        Ok(popup)
    }
    fn destroy_popup(&mut self, popup: PopupHandle) {
        self.calls.push(Call::Destroy(popup));
    }
    fn set_text(&mut self, popup: PopupHandle, summary: &str, body: &str) {
        self.calls
            .push(Call::SetText(popup, summary.to_string(), body.to_string()));
    }
    fn set_hints(&mut self, popup: PopupHandle, _hints: &HashMap<String, HintValue>) {
        self.calls.push(Call::SetHints(popup));
    }
    fn set_icon(&mut self, popup: PopupHandle, icon: &IconSource) {
        self.calls.push(Call::SetIcon(popup, icon.clone()));
    }
    fn clear_actions(&mut self, popup: PopupHandle) {
        self.calls.push(Call::ClearActions(popup));
    }
    fn add_action(&mut self, popup: PopupHandle, key: &str, label: &str) {
        self.calls
            .push(Call::AddAction(popup, key.to_string(), label.to_string()));
    }
    fn set_arrow(&mut self, popup: PopupHandle, anchor: Option<Point>) {
        self.calls.push(Call::SetArrow(popup, anchor));
    }
    fn move_popup(&mut self, popup: PopupHandle, position: Point) {
        self.calls.push(Call::Move(popup, position));
    }
    fn show(&mut self, popup: PopupHandle) {
        self.calls.push(Call::Show(popup));
    }
    fn hide(&mut self, popup: PopupHandle) {
        self.calls.push(Call::Hide(popup));
    }
    fn set_timeout(&mut self, popup: PopupHandle, total: Duration) {
        self.calls.push(Call::SetTimeout(popup, total));
    }
    fn tick(&mut self, popup: PopupHandle, remaining: Duration) {
        self.calls.push(Call::Tick(popup, remaining));
    }
    fn popup_size(&self, _popup: PopupHandle) -> Size {
        self.size
    }
    fn always_stack(&self, _popup: PopupHandle) -> bool {
        self.always_stack
    }
}

impl WindowSystem for FakeHost {
    fn query_tree(&mut self, window: NativeWindowId) -> Result<TreeLinks, NativeError> {
        match self.windows.get(&window) {
            Some(&(parent, _)) => Ok(TreeLinks {
                parent,
                root: ROOT_WINDOW,
            }),
            None => Err(NativeError::WindowGone(window)),
        }
    }
    fn watch_structure(&mut self, window: NativeWindowId) {
        self.calls.push(Call::Watch(window));
    }
    fn unwatch_structure(&mut self, window: NativeWindowId) {
        self.calls.push(Call::Unwatch(window));
    }
    fn install_structure_filter(&mut self) {
        self.calls.push(Call::InstallFilter);
    }
    fn remove_structure_filter(&mut self) {
        self.calls.push(Call::RemoveFilter);
    }
    fn root_geometry(&mut self, window: NativeWindowId) -> Result<Rect, NativeError> {
        let &(mut parent, local) = self
            .windows
            .get(&window)
            .ok_or(NativeError::WindowGone(window))?;
        let mut rect = local;
        while parent != ROOT_WINDOW {
            let &(grandparent, parent_rect) = self
                .windows
                .get(&parent)
                .ok_or(NativeError::WindowGone(parent))?;
            rect.x += parent_rect.x;
            rect.y += parent_rect.y;
            parent = grandparent;
        }
        Ok(rect)
    }
    fn monitor_at_pointer(&mut self) -> Option<usize> {
        self.pointer_monitor
    }
    fn screensaver_active(&mut self) -> bool {
        self.screensaver
    }
    fn fullscreen_window_active(&mut self) -> bool {
        self.fullscreen
    }
}

impl SignalSink for FakeHost {
    fn action_invoked(&mut self, destination: &str, id: NotificationId, action_key: &str) {
        self.calls.push(Call::ActionInvoked(
            destination.to_string(),
            id,
            action_key.to_string(),
        ));
    }
    fn notification_closed(&mut self, destination: &str, id: NotificationId, reason: CloseReason) {
        self.calls
            .push(Call::Closed(destination.to_string(), id, reason));
    }
}

impl SoundPlayer for FakeHost {
    fn play_file(&mut self, path: &Path) {
        self.calls.push(Call::PlaySound(path.to_path_buf()));
    }
}

impl Timers for FakeHost {
    fn start_expiration_tick(&mut self) {
        self.calls.push(Call::StartTick);
    }
    fn stop_expiration_tick(&mut self) {
        self.calls.push(Call::StopTick);
    }
    fn arm_idle_exit(&mut self) {
        self.calls.push(Call::ArmIdle);
    }
    fn disarm_idle_exit(&mut self) {
        self.calls.push(Call::DisarmIdle);
    }
    fn schedule_reposition(&mut self, id: NotificationId, delay: Duration) {
        self.calls.push(Call::ScheduleReposition(id, delay));
    }
    fn schedule_undelivered_close(&mut self, id: NotificationId) {
        self.calls.push(Call::ScheduleUndelivered(id));
    }
}

//! Source-window tracking.
//!
//! A notification can be anchored to a client window. The popup then has to
//! follow that window, but moving a window only produces events on the
//! window itself and on its ancestors up to the root. The tracker subscribes
//! to structure events on every ancestor of the source and keeps an
//! `ancestor -> notification` map so events can be routed back.

use crate::backend::{Renderer, WindowSystem};
use crate::{NativeWindowId, NotificationId, PopupHandle};
use std::collections::HashMap;
use tracing::debug;

/// Structure-change notification for a watched native window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureEvent {
    Configure(NativeWindowId),
    Map(NativeWindowId),
    Reparent(NativeWindowId),
    Destroy(NativeWindowId),
}

impl StructureEvent {
    pub fn window(&self) -> NativeWindowId {
        match *self {
            StructureEvent::Configure(w)
            | StructureEvent::Map(w)
            | StructureEvent::Reparent(w)
            | StructureEvent::Destroy(w) => w,
        }
    }
}

/// What the owner of a routed event should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerAction {
    /// Geometry may have changed: reposition after the debounce delay.
    Debounce(NotificationId),
    /// The hierarchy changed: walk the ancestors again, then reposition now.
    Rewalk(NotificationId),
}

#[derive(Debug, Default)]
pub struct SourceWindowTracker {
    monitored: HashMap<NativeWindowId, NotificationId>,
    filter_installed: bool,
}

impl SourceWindowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.monitored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitored.is_empty()
    }

    pub fn is_filter_installed(&self) -> bool {
        self.filter_installed
    }

    pub fn owner_of(&self, window: NativeWindowId) -> Option<NotificationId> {
        self.monitored.get(&window).copied()
    }

    /// Watch every ancestor of `source` below the root on behalf of `id`.
    ///
    /// Mappings left over from an earlier walk for the same id are dropped
    /// first. A failed tree query ends the walk where it is.
    pub fn begin_tracking(
        &mut self,
        ws: &mut impl WindowSystem,
        id: NotificationId,
        source: NativeWindowId,
    ) {
        self.clear_mappings(ws, id);

        let mut current = source;
        loop {
            let links = match ws.query_tree(current) {
                Ok(links) => links,
                Err(e) => {
                    debug!("Stopping ancestor walk for notification {}: {}", id, e);
                    break;
                }
            };
            let parent = links.parent;
            if parent == 0 || parent == links.root || self.owner_of(parent) == Some(id) {
                break;
            }
            ws.watch_structure(parent);
            self.monitored.insert(parent, id);
            current = parent;
        }

        debug!(
            "Tracking source window {:#x} for notification {} ({} ancestors)",
            source,
            id,
            self.monitored.values().filter(|&&owner| owner == id).count()
        );
        self.update_filter(ws);
    }

    /// Stop watching every ancestor owned by `id`.
    pub fn forget(&mut self, ws: &mut impl WindowSystem, id: NotificationId) {
        self.clear_mappings(ws, id);
        self.update_filter(ws);
    }

    /// Route a structure event. Destroyed windows are dropped here.
    pub fn route(
        &mut self,
        ws: &mut impl WindowSystem,
        event: StructureEvent,
    ) -> Option<TrackerAction> {
        let id = self.owner_of(event.window())?;
        match event {
            StructureEvent::Destroy(window) => {
                self.monitored.remove(&window);
                self.update_filter(ws);
                None
            }
            StructureEvent::Configure(_) | StructureEvent::Map(_) => {
                Some(TrackerAction::Debounce(id))
            }
            StructureEvent::Reparent(_) => Some(TrackerAction::Rewalk(id)),
        }
    }

    fn clear_mappings(&mut self, ws: &mut impl WindowSystem, id: NotificationId) {
        let stale: Vec<NativeWindowId> = self
            .monitored
            .iter()
            .filter(|(_, &owner)| owner == id)
            .map(|(&window, _)| window)
            .collect();
        for window in stale {
            self.monitored.remove(&window);
            ws.unwatch_structure(window);
        }
    }

    fn update_filter(&mut self, ws: &mut impl WindowSystem) {
        if self.monitored.is_empty() && self.filter_installed {
            ws.remove_structure_filter();
            self.filter_installed = false;
        } else if !self.monitored.is_empty() && !self.filter_installed {
            ws.install_structure_filter();
            self.filter_installed = true;
        }
    }
}

/// Point `popup` at the centre of `source`.
///
/// Native failures (usually a window that vanished mid-query) skip the
/// reposition; the next structure event corrects it.
pub fn sync_position<H: Renderer + WindowSystem>(
    host: &mut H,
    popup: PopupHandle,
    source: NativeWindowId,
) -> bool {
    let rect = match host.root_geometry(source) {
        Ok(rect) => rect,
        Err(e) => {
            debug!("Skipping reposition for source {:#x}: {}", source, e);
            return false;
        }
    };
    let anchor = rect.center();
    host.set_arrow(popup, Some(anchor));
    host.move_popup(popup, anchor);
    host.show(popup);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeHost};
    use crate::{Point, Rect};

    const ROOT: NativeWindowId = 1;

    /// root <- frame(10) <- decoration(11) <- client(12)
    fn host_with_tree() -> FakeHost {
        let mut host = FakeHost::new();
        host.add_window(10, ROOT, Rect::new(0, 0, 800, 600));
        host.add_window(11, 10, Rect::new(100, 100, 600, 400));
        host.add_window(12, 11, Rect::new(100, 200, 400, 300));
        host
    }

    #[test]
    fn test_walk_watches_ancestors_below_root() {
        let mut host = host_with_tree();
        let mut tracker = SourceWindowTracker::new();
        tracker.begin_tracking(&mut host, 5, 12);

        assert_eq!(tracker.owner_of(11), Some(5));
        assert_eq!(tracker.owner_of(10), Some(5));
        assert_eq!(tracker.owner_of(12), None);
        assert_eq!(tracker.owner_of(ROOT), None);
        assert!(tracker.is_filter_installed());
        assert_eq!(host.count(|c| matches!(c, Call::InstallFilter)), 1);
    }

    #[test]
    fn test_destroy_drops_window_and_filter() {
        let mut host = host_with_tree();
        let mut tracker = SourceWindowTracker::new();
        tracker.begin_tracking(&mut host, 5, 12);

        assert_eq!(tracker.route(&mut host, StructureEvent::Destroy(11)), None);
        assert!(tracker.is_filter_installed());
        assert_eq!(tracker.route(&mut host, StructureEvent::Destroy(10)), None);
        assert!(tracker.is_empty());
        assert!(!tracker.is_filter_installed());
        assert_eq!(host.count(|c| matches!(c, Call::RemoveFilter)), 1);
    }

    #[test]
    fn test_route_configure_and_reparent() {
        let mut host = host_with_tree();
        let mut tracker = SourceWindowTracker::new();
        tracker.begin_tracking(&mut host, 5, 12);

        assert_eq!(
            tracker.route(&mut host, StructureEvent::Configure(10)),
            Some(TrackerAction::Debounce(5))
        );
        assert_eq!(
            tracker.route(&mut host, StructureEvent::Map(11)),
            Some(TrackerAction::Debounce(5))
        );
        assert_eq!(
            tracker.route(&mut host, StructureEvent::Reparent(11)),
            Some(TrackerAction::Rewalk(5))
        );
        assert_eq!(tracker.route(&mut host, StructureEvent::Configure(99)), None);
    }

    #[test]
    fn test_rewalk_replaces_old_chain() {
        let mut host = host_with_tree();
        let mut tracker = SourceWindowTracker::new();
        tracker.begin_tracking(&mut host, 5, 12);

        // The client is reparented straight under a new frame.
        host.add_window(20, ROOT, Rect::new(0, 0, 400, 300));
        host.reparent(12, 20);
        tracker.begin_tracking(&mut host, 5, 12);

        assert_eq!(tracker.owner_of(20), Some(5));
        assert_eq!(tracker.owner_of(11), None);
        assert_eq!(tracker.owner_of(10), None);
        assert!(host.count(|c| matches!(c, Call::Unwatch(11))) == 1);
    }

    #[test]
    fn test_forget_only_touches_own_windows() {
        let mut host = host_with_tree();
        host.add_window(30, ROOT, Rect::new(0, 0, 10, 10));
        host.add_window(31, 30, Rect::new(0, 0, 10, 10));
        let mut tracker = SourceWindowTracker::new();
        tracker.begin_tracking(&mut host, 5, 12);
        tracker.begin_tracking(&mut host, 6, 31);

        tracker.forget(&mut host, 5);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.owner_of(30), Some(6));
        assert!(tracker.is_filter_installed());

        tracker.forget(&mut host, 6);
        assert!(!tracker.is_filter_installed());
    }

    #[test]
    fn test_walk_stops_on_query_failure() {
        let mut host = FakeHost::new();
        let mut tracker = SourceWindowTracker::new();
        tracker.begin_tracking(&mut host, 1, 0xdead);
        assert!(tracker.is_empty());
        assert!(!tracker.is_filter_installed());
    }

    #[test]
    fn test_sync_position_uses_center() {
        let mut host = host_with_tree();
        let popup = PopupHandle(77);
        // 12 sits at (100,200) inside 11 at (100,100) inside 10 at (0,0).
        assert!(sync_position(&mut host, popup, 12));
        assert!(host.calls.contains(&Call::SetArrow(popup, Some(Point::new(400, 450)))));
        assert!(host.calls.contains(&Call::Move(popup, Point::new(400, 450))));
        assert!(host.calls.contains(&Call::Show(popup)));
    }

    #[test]
    fn test_sync_position_swallows_errors() {
        let mut host = FakeHost::new();
        assert!(!sync_position(&mut host, PopupHandle(1), 0xbeef));
        assert!(host.calls.is_empty());
    }
}

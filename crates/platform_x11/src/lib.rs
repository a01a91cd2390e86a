//! notifyd Platform X11
//!
//! X11-specific window system integration using x11rb.
//!
//! This crate handles:
//! - Monitor and work-area discovery via RandR and `_NET_WORKAREA`
//! - Ancestor-window queries and structure-event subscriptions
//! - Screensaver and fullscreen detection
//! - A blocking event thread that forwards translated [`NativeEvent`]s
//! - Override-redirect popup windows (see [`popup`]) and their icons

pub mod icon;
pub mod popup;

use notifyd_core::backend::{NativeError, TreeLinks, WindowSystem};
use notifyd_core::{NativeWindowId, Point, Rect, StructureEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use x11rb::connection::Connection;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::screensaver::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ConnectionExt as _, EventMask, NotifyDetail,
    Window,
};
use x11rb::protocol::{ErrorKind, Event};
use x11rb::rust_connection::RustConnection;

pub use popup::{PopupHit, PopupManager};

/// Errors that can occur during X11 operations.
#[derive(Debug, Error)]
pub enum X11Error {
    #[error("Failed to connect to the X server: {0}")]
    Connect(#[from] ConnectError),

    #[error("X11 connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("X11 request failed: {0}")]
    Reply(#[from] ReplyError),

    #[error("X11 resource allocation failed: {0}")]
    ReplyOrId(#[from] ReplyOrIdError),
}

/// Events the daemon needs to handle, translated from raw X11 events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeEvent {
    /// Structure change on a window we may be watching.
    Structure(StructureEvent),
    /// A window needs repainting.
    Expose(NativeWindowId),
    /// Pointer entered a window.
    PointerEntered(NativeWindowId),
    /// Pointer left a window.
    PointerLeft(NativeWindowId),
    /// Button released inside a window, in window coordinates.
    Clicked {
        window: NativeWindowId,
        position: Point,
    },
    /// The RandR screen configuration changed.
    ScreenChanged,
    /// `_NET_WORKAREA` changed on the root window.
    WorkAreaChanged,
    /// The connection to the X server is gone.
    ConnectionLost,
}

/// Atoms used by the window-system queries.
#[derive(Debug, Clone, Copy)]
struct Atoms {
    net_workarea: Atom,
    net_current_desktop: Atom,
    net_active_window: Atom,
    net_wm_state: Atom,
    net_wm_state_fullscreen: Atom,
}

impl Atoms {
    fn intern(conn: &RustConnection) -> Result<Self, X11Error> {
        Ok(Self {
            net_workarea: intern_atom(conn, b"_NET_WORKAREA")?,
            net_current_desktop: intern_atom(conn, b"_NET_CURRENT_DESKTOP")?,
            net_active_window: intern_atom(conn, b"_NET_ACTIVE_WINDOW")?,
            net_wm_state: intern_atom(conn, b"_NET_WM_STATE")?,
            net_wm_state_fullscreen: intern_atom(conn, b"_NET_WM_STATE_FULLSCREEN")?,
        })
    }
}

pub(crate) fn intern_atom(conn: &RustConnection, name: &[u8]) -> Result<Atom, X11Error> {
    Ok(conn.intern_atom(false, name)?.reply()?.atom)
}

/// Connection-level state shared by the window-system queries and the
/// event thread.
pub struct X11Display {
    conn: Arc<RustConnection>,
    screen_num: usize,
    root: Window,
    atoms: Atoms,
    /// While false, the event thread drops structure events for foreign windows.
    structure_filter: Arc<AtomicBool>,
}

impl X11Display {
    /// Connect to the display named by `$DISPLAY`.
    pub fn connect() -> Result<Self, X11Error> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let root = conn.setup().roots[screen_num].root;
        let atoms = Atoms::intern(&conn)?;

        // Root events: work-area property changes and RandR screen changes.
        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
        )?;
        if let Err(e) = conn.randr_select_input(root, randr::NotifyMask::SCREEN_CHANGE) {
            warn!("RandR unavailable, monitor changes will not be tracked: {}", e);
        }
        conn.flush()?;

        info!("Connected to X server (screen {})", screen_num);
        Ok(Self {
            conn: Arc::new(conn),
            screen_num,
            root,
            atoms,
            structure_filter: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn connection(&self) -> Arc<RustConnection> {
        Arc::clone(&self.conn)
    }

    pub fn screen_num(&self) -> usize {
        self.screen_num
    }

    pub fn root(&self) -> Window {
        self.root
    }

    /// Monitor rectangles in RandR order. Falls back to the whole screen.
    pub fn monitors(&self) -> Vec<Rect> {
        match self.randr_monitors() {
            Ok(monitors) if !monitors.is_empty() => monitors,
            Ok(_) => vec![self.screen_rect()],
            Err(e) => {
                debug!("RandR monitor query failed, using screen size: {}", e);
                vec![self.screen_rect()]
            }
        }
    }

    /// Usable area of every monitor, panels excluded.
    pub fn work_areas(&self) -> Vec<Rect> {
        let monitors = self.monitors();
        match self.net_workarea() {
            Ok(Some(workarea)) => clip_to_workarea(&monitors, workarea),
            Ok(None) => monitors,
            Err(e) => {
                debug!("Could not read _NET_WORKAREA: {}", e);
                monitors
            }
        }
    }

    /// Start the blocking event reader. Translated events go to `sender`
    /// until it is dropped or the connection fails.
    pub fn spawn_event_thread(
        &self,
        sender: mpsc::Sender<NativeEvent>,
    ) -> std::io::Result<JoinHandle<()>> {
        let conn = Arc::clone(&self.conn);
        let filter = Arc::clone(&self.structure_filter);
        let root = self.root;
        let net_workarea = self.atoms.net_workarea;

        std::thread::Builder::new()
            .name("x11-events".to_string())
            .spawn(move || loop {
                let event = match conn.wait_for_event() {
                    Ok(event) => event,
                    Err(e) => {
                        error!("Error receiving X11 event: {}", e);
                        let _ = sender.send(NativeEvent::ConnectionLost);
                        break;
                    }
                };
                let Some(native) = translate_event(&event, root, net_workarea) else {
                    continue;
                };
                if is_filtered(native, filter.load(Ordering::Relaxed)) {
                    continue;
                }
                if sender.send(native).is_err() {
                    debug!("Event receiver dropped, stopping X11 event thread");
                    break;
                }
            })
    }

    fn screen_rect(&self) -> Rect {
        let screen = &self.conn.setup().roots[self.screen_num];
        Rect::new(
            0,
            0,
            i32::from(screen.width_in_pixels),
            i32::from(screen.height_in_pixels),
        )
    }

    fn randr_monitors(&self) -> Result<Vec<Rect>, X11Error> {
        let reply = self.conn.randr_get_monitors(self.root, true)?.reply()?;
        Ok(reply
            .monitors
            .iter()
            .map(|m| {
                Rect::new(
                    i32::from(m.x),
                    i32::from(m.y),
                    i32::from(m.width),
                    i32::from(m.height),
                )
            })
            .collect())
    }

    /// `_NET_WORKAREA` for the current desktop, if the WM publishes it.
    fn net_workarea(&self) -> Result<Option<Rect>, X11Error> {
        let desktop = self
            .conn
            .get_property(
                false,
                self.root,
                self.atoms.net_current_desktop,
                AtomEnum::CARDINAL,
                0,
                1,
            )?
            .reply()?
            .value32()
            .and_then(|mut v| v.next())
            .unwrap_or(0);

        let reply = self
            .conn
            .get_property(
                false,
                self.root,
                self.atoms.net_workarea,
                AtomEnum::CARDINAL,
                desktop * 4,
                4,
            )?
            .reply()?;
        let values: Vec<u32> = match reply.value32() {
            Some(v) => v.collect(),
            None => return Ok(None),
        };
        match values[..] {
            [x, y, w, h] if w > 0 && h > 0 => Ok(Some(Rect::new(
                x as i32, y as i32, w as i32, h as i32,
            ))),
            _ => Ok(None),
        }
    }

    fn pointer_position(&self) -> Result<Point, X11Error> {
        let reply = self.conn.query_pointer(self.root)?.reply()?;
        Ok(Point::new(
            i32::from(reply.root_x),
            i32::from(reply.root_y),
        ))
    }

    fn set_event_mask(&self, window: NativeWindowId, mask: EventMask) {
        let result = self
            .conn
            .change_window_attributes(window, &ChangeWindowAttributesAux::new().event_mask(mask))
            .map(|_| ())
            .and_then(|_| self.conn.flush());
        if let Err(e) = result {
            debug!("Failed to change event mask on {:#x}: {}", window, e);
        }
    }
}

impl WindowSystem for X11Display {
    fn query_tree(&mut self, window: NativeWindowId) -> Result<TreeLinks, NativeError> {
        let reply = self
            .conn
            .query_tree(window)
            .map_err(|e| NativeError::RequestFailed(e.to_string()))?
            .reply()
            .map_err(|e| native_error(window, e))?;
        Ok(TreeLinks {
            parent: reply.parent,
            root: reply.root,
        })
    }

    fn watch_structure(&mut self, window: NativeWindowId) {
        self.set_event_mask(window, EventMask::STRUCTURE_NOTIFY);
    }

    fn unwatch_structure(&mut self, window: NativeWindowId) {
        self.set_event_mask(window, EventMask::NO_EVENT);
    }

    fn install_structure_filter(&mut self) {
        debug!("Installing structure event filter");
        self.structure_filter.store(true, Ordering::Relaxed);
    }

    fn remove_structure_filter(&mut self) {
        debug!("Removing structure event filter");
        self.structure_filter.store(false, Ordering::Relaxed);
    }

    fn root_geometry(&mut self, window: NativeWindowId) -> Result<Rect, NativeError> {
        let geometry = self
            .conn
            .get_geometry(window)
            .map_err(|e| NativeError::RequestFailed(e.to_string()))?
            .reply()
            .map_err(|e| native_error(window, e))?;
        let origin = self
            .conn
            .translate_coordinates(window, self.root, 0, 0)
            .map_err(|e| NativeError::RequestFailed(e.to_string()))?
            .reply()
            .map_err(|e| native_error(window, e))?;
        Ok(Rect::new(
            i32::from(origin.dst_x),
            i32::from(origin.dst_y),
            i32::from(geometry.width),
            i32::from(geometry.height),
        ))
    }

    fn monitor_at_pointer(&mut self) -> Option<usize> {
        let pointer = match self.pointer_position() {
            Ok(p) => p,
            Err(e) => {
                debug!("Pointer query failed: {}", e);
                return None;
            }
        };
        monitor_index_at(&self.monitors(), pointer)
    }

    fn screensaver_active(&mut self) -> bool {
        let reply = match self.conn.screensaver_query_info(self.root) {
            Ok(cookie) => cookie.reply(),
            Err(e) => {
                debug!("Screensaver query failed: {}", e);
                return false;
            }
        };
        match reply {
            Ok(info) => u32::from(info.state) == u32::from(screensaver::State::ON),
            Err(e) => {
                debug!("Screensaver query failed: {}", e);
                false
            }
        }
    }

    fn fullscreen_window_active(&mut self) -> bool {
        match self.active_window_is_fullscreen() {
            Ok(fullscreen) => fullscreen,
            Err(e) => {
                debug!("Fullscreen check failed: {}", e);
                false
            }
        }
    }
}

impl X11Display {
    fn active_window_is_fullscreen(&self) -> Result<bool, X11Error> {
        let active = self
            .conn
            .get_property(
                false,
                self.root,
                self.atoms.net_active_window,
                AtomEnum::WINDOW,
                0,
                1,
            )?
            .reply()?
            .value32()
            .and_then(|mut v| v.next());
        let Some(active) = active.filter(|&w| w != 0) else {
            return Ok(false);
        };

        let state = self
            .conn
            .get_property(false, active, self.atoms.net_wm_state, AtomEnum::ATOM, 0, 64)?
            .reply()?;
        Ok(state
            .value32()
            .is_some_and(|mut atoms| atoms.any(|a| a == self.atoms.net_wm_state_fullscreen)))
    }
}

fn native_error(window: NativeWindowId, error: ReplyError) -> NativeError {
    match &error {
        ReplyError::X11Error(e)
            if matches!(e.error_kind, ErrorKind::Window | ErrorKind::Drawable) =>
        {
            NativeError::WindowGone(window)
        }
        _ => NativeError::RequestFailed(error.to_string()),
    }
}

/// Translate a raw event into the daemon's vocabulary.
fn translate_event(event: &Event, root: Window, net_workarea: Atom) -> Option<NativeEvent> {
    let native = match event {
        Event::ConfigureNotify(e) => NativeEvent::Structure(StructureEvent::Configure(e.window)),
        Event::MapNotify(e) => NativeEvent::Structure(StructureEvent::Map(e.window)),
        Event::ReparentNotify(e) => NativeEvent::Structure(StructureEvent::Reparent(e.window)),
        Event::DestroyNotify(e) => NativeEvent::Structure(StructureEvent::Destroy(e.window)),
        Event::Expose(e) if e.count == 0 => NativeEvent::Expose(e.window),
        // Crossings into or out of a child window are not pointer enter/leave.
        Event::EnterNotify(e) if e.detail != NotifyDetail::INFERIOR => {
            NativeEvent::PointerEntered(e.event)
        }
        Event::LeaveNotify(e) if e.detail != NotifyDetail::INFERIOR => {
            NativeEvent::PointerLeft(e.event)
        }
        Event::ButtonRelease(e) => NativeEvent::Clicked {
            window: e.event,
            position: Point::new(i32::from(e.event_x), i32::from(e.event_y)),
        },
        Event::RandrScreenChangeNotify(_) => NativeEvent::ScreenChanged,
        Event::PropertyNotify(e) if e.window == root && e.atom == net_workarea => {
            NativeEvent::WorkAreaChanged
        }
        Event::Error(e) => {
            debug!("X11 error event: {:?}", e.error_kind);
            return None;
        }
        _ => return None,
    };
    Some(native)
}

/// Geometry events for foreign windows are only forwarded while the
/// structure filter is installed. Destroy is always forwarded: popups
/// need it too.
fn is_filtered(event: NativeEvent, filter_installed: bool) -> bool {
    matches!(
        event,
        NativeEvent::Structure(
            StructureEvent::Configure(_) | StructureEvent::Map(_) | StructureEvent::Reparent(_)
        )
    ) && !filter_installed
}

/// Intersect every monitor with the desktop work area. Monitors the work
/// area does not touch keep their full rectangle.
pub fn clip_to_workarea(monitors: &[Rect], workarea: Rect) -> Vec<Rect> {
    monitors
        .iter()
        .map(|m| m.intersection(&workarea).unwrap_or(*m))
        .collect()
}

/// Index of the monitor containing `point`.
pub fn monitor_index_at(monitors: &[Rect], point: Point) -> Option<usize> {
    monitors.iter().position(|m| m.contains(point))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_to_workarea() {
        let monitors = [Rect::new(0, 0, 1920, 1080), Rect::new(1920, 0, 1280, 1024)];
        // A bottom panel on the first monitor only.
        let workarea = Rect::new(0, 0, 1920, 1040);
        let areas = clip_to_workarea(&monitors, workarea);
        assert_eq!(areas[0], Rect::new(0, 0, 1920, 1040));
        assert_eq!(areas[1], Rect::new(1920, 0, 1280, 1024));
    }

    #[test]
    fn test_monitor_index_at() {
        let monitors = [Rect::new(0, 0, 1920, 1080), Rect::new(1920, 0, 1280, 1024)];
        assert_eq!(monitor_index_at(&monitors, Point::new(10, 10)), Some(0));
        assert_eq!(monitor_index_at(&monitors, Point::new(2000, 500)), Some(1));
        assert_eq!(monitor_index_at(&monitors, Point::new(2000, 1050)), None);
    }

    #[test]
    fn test_structure_filter() {
        let configure = NativeEvent::Structure(StructureEvent::Configure(5));
        let destroy = NativeEvent::Structure(StructureEvent::Destroy(5));
        assert!(is_filtered(configure, false));
        assert!(!is_filtered(configure, true));
        assert!(!is_filtered(destroy, false));
        assert!(!is_filtered(NativeEvent::Expose(5), false));
    }
}

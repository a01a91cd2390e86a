//! Popup windows.
//!
//! Each notification is an override-redirect window drawn with the core
//! `fixed` font: summary line, wrapped body, a row of action buttons and a
//! countdown bar along the bottom edge. Body links are underlined and can be
//! clicked. Window ids double as popup handles.

use crate::icon;
use crate::X11Error;
use image::RgbaImage;
use notifyd_core::backend::Renderer;
use notifyd_core::hints::{HintValue, IconSource};
use notifyd_core::{NativeWindowId, Point, PopupHandle, Rect, Size};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    self, AtomEnum, ChangeGCAux, ConfigureWindowAux, ConnectionExt as _, CoordMode, CreateGCAux,
    CreateWindowAux, EventMask, Font, Gcontext, ImageFormat, PolyShape, PropMode, Rectangle,
    StackMode, Window, WindowClass,
};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

const POPUP_WIDTH: i32 = 320;
const PADDING: i32 = 8;
const ICON_SIZE: i32 = icon::ICON_SIZE as i32;
const MAX_BODY_LINES: usize = 6;
const BUTTON_SPACING: i32 = 6;
const BAR_HEIGHT: i32 = 3;
/// Gap between an anchor point and the popup's top edge.
const ARROW_HEIGHT: i32 = 8;

const BACKGROUND: u32 = 0x2b2b2b;
const FOREGROUND: u32 = 0xeeeeee;
const BORDER: u32 = 0x444444;
const ACCENT: u32 = 0x5294e2;
const CRITICAL: u32 = 0xd64937;

/// Where a click landed on a popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupHit {
    Body,
    Action(String),
    /// A link in the body, with its target.
    Link(String),
}

/// Glyph metrics of the popup font.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontMetrics {
    pub ascent: i32,
    pub descent: i32,
    pub char_width: i32,
}

impl FontMetrics {
    pub fn line_height(&self) -> i32 {
        self.ascent + self.descent + 2
    }
}

impl Default for FontMetrics {
    /// The classic 6x13 `fixed` font.
    fn default() -> Self {
        Self {
            ascent: 11,
            descent: 2,
            char_width: 6,
        }
    }
}

/// Text content of one popup.
#[derive(Debug, Clone, Default)]
struct Content {
    summary: String,
    body: String,
    actions: Vec<(String, String)>,
    has_icon: bool,
}

/// Computed geometry of one popup.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub size: Size,
    pub text_x: i32,
    pub body_lines: Vec<String>,
    /// Button rectangles in action order, window coordinates.
    pub buttons: Vec<Rect>,
    pub links: Vec<LinkArea>,
}

/// Clickable part of a body line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkArea {
    pub rect: Rect,
    pub href: String,
}

impl Layout {
    /// What a click at `position` hits. Buttons win over links.
    pub fn hit(&self, actions: &[(String, String)], position: Point) -> PopupHit {
        if let Some((_, (key, _))) = self
            .buttons
            .iter()
            .zip(actions)
            .find(|(rect, _)| rect.contains(position))
        {
            return PopupHit::Action(key.clone());
        }
        self.links
            .iter()
            .find(|link| link.rect.contains(position))
            .map(|link| PopupHit::Link(link.href.clone()))
            .unwrap_or(PopupHit::Body)
    }
}

fn compute_layout(metrics: FontMetrics, content: &Content) -> Layout {
    let line = metrics.line_height();
    let text_x = if content.has_icon {
        PADDING * 2 + ICON_SIZE
    } else {
        PADDING
    };
    let columns = ((POPUP_WIDTH - text_x - PADDING) / metrics.char_width.max(1)).max(1) as usize;
    let body = parse_markup(&content.body);
    let (body_lines, pieces) = wrap_pieces(&body.text, columns, MAX_BODY_LINES);
    let links = link_areas(&body.links, &pieces, metrics, text_x);

    let mut height = PADDING + line + body_lines.len() as i32 * line;
    if content.has_icon {
        height = height.max(PADDING + ICON_SIZE);
    }

    let mut buttons = Vec::with_capacity(content.actions.len());
    if !content.actions.is_empty() {
        let button_height = line + 4;
        let top = height + PADDING;
        let mut x = PADDING;
        for (_, label) in &content.actions {
            let width = label.chars().count() as i32 * metrics.char_width + PADDING * 2;
            buttons.push(Rect::new(x, top, width, button_height));
            x += width + BUTTON_SPACING;
        }
        height = top + button_height;
    }
    height += PADDING + BAR_HEIGHT;

    Layout {
        size: Size::new(POPUP_WIDTH, height),
        text_x,
        body_lines,
        buttons,
        links,
    }
}

/// Pixel rectangles of every link fragment that made it into the wrapped
/// lines. Fragments of one link on the same line are merged.
fn link_areas(links: &[Link], pieces: &[Piece], metrics: FontMetrics, text_x: i32) -> Vec<LinkArea> {
    let mut spans: Vec<(usize, usize, usize, usize)> = Vec::new();
    for piece in pieces {
        let piece_end = piece.src + piece.len;
        for (index, link) in links.iter().enumerate() {
            if link.start >= piece_end || link.end <= piece.src {
                continue;
            }
            let start = piece.col + link.start.max(piece.src) - piece.src;
            let end = piece.col + link.end.min(piece_end) - piece.src;
            match spans.last_mut() {
                Some(last) if last.0 == piece.line && last.3 == index && last.2 + 1 >= start => {
                    last.2 = end;
                }
                _ => spans.push((piece.line, start, end, index)),
            }
        }
    }

    let line = metrics.line_height();
    spans
        .into_iter()
        .map(|(row, start, end, index)| LinkArea {
            rect: Rect::new(
                text_x + start as i32 * metrics.char_width,
                PADDING + (row as i32 + 1) * line,
                (end - start) as i32 * metrics.char_width,
                line,
            ),
            href: links[index].href.clone(),
        })
        .collect()
}

struct PopupWindow {
    content: Content,
    layout: Layout,
    icon: Option<RgbaImage>,
    critical: bool,
    anchor: Option<Point>,
    total: Option<Duration>,
    remaining: Option<Duration>,
    mapped: bool,
}

/// Owns every popup window and renders them.
pub struct PopupManager {
    conn: Arc<RustConnection>,
    root: Window,
    depth: u8,
    screen: Rect,
    font: Font,
    gc: Gcontext,
    metrics: FontMetrics,
    window_type: xproto::Atom,
    window_type_notification: xproto::Atom,
    icon_roots: Vec<PathBuf>,
    popups: HashMap<Window, PopupWindow>,
}

impl PopupManager {
    pub fn new(conn: Arc<RustConnection>, screen_num: usize) -> Result<Self, X11Error> {
        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let depth = screen.root_depth;
        let screen_rect = Rect::new(
            0,
            0,
            i32::from(screen.width_in_pixels),
            i32::from(screen.height_in_pixels),
        );

        let font = conn.generate_id()?;
        conn.open_font(font, b"fixed")?;
        let metrics = match conn.query_font(font)?.reply() {
            Ok(info) => FontMetrics {
                ascent: i32::from(info.font_ascent),
                descent: i32::from(info.font_descent),
                char_width: i32::from(info.max_bounds.character_width).max(1),
            },
            Err(e) => {
                warn!("Could not query font metrics, assuming 6x13: {}", e);
                FontMetrics::default()
            }
        };

        let gc = conn.generate_id()?;
        conn.create_gc(
            gc,
            root,
            &CreateGCAux::new()
                .font(font)
                .foreground(FOREGROUND)
                .background(BACKGROUND)
                .graphics_exposures(0),
        )?;

        let window_type = crate::intern_atom(&conn, b"_NET_WM_WINDOW_TYPE")?;
        let window_type_notification =
            crate::intern_atom(&conn, b"_NET_WM_WINDOW_TYPE_NOTIFICATION")?;
        conn.flush()?;

        Ok(Self {
            conn,
            root,
            depth,
            screen: screen_rect,
            font,
            gc,
            metrics,
            window_type,
            window_type_notification,
            icon_roots: icon::icon_roots(),
            popups: HashMap::new(),
        })
    }

    /// Popup whose window is `window`, if any.
    pub fn handle_for(&self, window: NativeWindowId) -> Option<PopupHandle> {
        self.popups
            .contains_key(&window)
            .then_some(PopupHandle(u64::from(window)))
    }

    /// Resolve a click position on a popup window.
    pub fn hit_test(&self, window: NativeWindowId, position: Point) -> Option<(PopupHandle, PopupHit)> {
        let popup = self.popups.get(&window)?;
        let handle = PopupHandle(u64::from(window));
        Some((handle, popup.layout.hit(&popup.content.actions, position)))
    }

    /// Drop bookkeeping for a window someone else destroyed.
    pub fn forget_destroyed(&mut self, popup: PopupHandle) {
        if let Some(window) = window_of(popup) {
            self.popups.remove(&window);
        }
    }

    /// Repaint after an expose.
    pub fn redraw(&self, popup: PopupHandle) {
        if let Some(window) = window_of(popup) {
            self.log_err(self.draw(window), "redraw");
        }
    }

    /// Release every window and the shared drawing resources.
    pub fn close_all(&mut self) {
        for (window, _) in self.popups.drain() {
            let _ = self.conn.destroy_window(window);
        }
        let _ = self.conn.free_gc(self.gc);
        let _ = self.conn.close_font(self.font);
        let _ = self.conn.flush();
    }

    fn create_window(&self) -> Result<Window, X11Error> {
        let window = self.conn.generate_id()?;
        self.conn.create_window(
            self.depth,
            window,
            self.root,
            0,
            0,
            POPUP_WIDTH as u16,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            0,
            &CreateWindowAux::new()
                .background_pixel(BACKGROUND)
                .override_redirect(1)
                .event_mask(
                    EventMask::EXPOSURE
                        | EventMask::ENTER_WINDOW
                        | EventMask::LEAVE_WINDOW
                        | EventMask::BUTTON_PRESS
                        | EventMask::BUTTON_RELEASE
                        | EventMask::STRUCTURE_NOTIFY,
                ),
        )?;
        self.conn.change_property32(
            PropMode::REPLACE,
            window,
            self.window_type,
            AtomEnum::ATOM,
            &[self.window_type_notification],
        )?;
        self.conn.flush()?;
        Ok(window)
    }

    fn relayout(&mut self, window: Window) {
        let metrics = self.metrics;
        let Some(popup) = self.popups.get_mut(&window) else {
            return;
        };
        let layout = compute_layout(metrics, &popup.content);
        let resized = layout.size != popup.layout.size;
        popup.layout = layout;
        if resized {
            let size = popup.layout.size;
            let result = self.conn.configure_window(
                window,
                &ConfigureWindowAux::new()
                    .width(size.width as u32)
                    .height(size.height as u32),
            );
            self.log_err(result.map(|_| ()), "resize");
        }
        self.log_err(self.draw(window), "draw");
    }

    fn draw(&self, window: Window) -> Result<(), X11Error> {
        let Some(popup) = self.popups.get(&window) else {
            return Ok(());
        };
        if !popup.mapped {
            return Ok(());
        }
        let conn = &self.conn;
        let size = popup.layout.size;
        let accent = if popup.critical { CRITICAL } else { ACCENT };
        let line = self.metrics.line_height();

        self.set_foreground(BACKGROUND)?;
        conn.poly_fill_rectangle(window, self.gc, &[rectangle(Rect::new(0, 0, size.width, size.height))])?;

        self.set_foreground(if popup.critical { CRITICAL } else { BORDER })?;
        conn.poly_rectangle(
            window,
            self.gc,
            &[rectangle(Rect::new(0, 0, size.width - 1, size.height - 1))],
        )?;

        if popup.anchor.is_some() {
            self.set_foreground(accent)?;
            let mid = (size.width / 2) as i16;
            conn.fill_poly(
                window,
                self.gc,
                PolyShape::CONVEX,
                CoordMode::ORIGIN,
                &[
                    xproto::Point { x: mid - 6, y: 0 },
                    xproto::Point { x: mid + 6, y: 0 },
                    xproto::Point { x: mid, y: 6 },
                ],
            )?;
        }

        if let Some(icon) = &popup.icon {
            self.draw_icon(window, icon)?;
        }

        self.set_foreground(FOREGROUND)?;
        let x = popup.layout.text_x as i16;
        let mut baseline = PADDING + self.metrics.ascent;
        conn.image_text8(window, self.gc, x, baseline as i16, &to_latin1(&popup.content.summary))?;
        for text in &popup.layout.body_lines {
            baseline += line;
            conn.image_text8(window, self.gc, x, baseline as i16, &to_latin1(text))?;
        }

        if !popup.layout.links.is_empty() {
            self.set_foreground(accent)?;
            let underlines: Vec<Rectangle> = popup
                .layout
                .links
                .iter()
                .map(|link| {
                    rectangle(Rect::new(
                        link.rect.x,
                        link.rect.y + self.metrics.ascent + 1,
                        link.rect.width,
                        1,
                    ))
                })
                .collect();
            conn.poly_fill_rectangle(window, self.gc, &underlines)?;
        }

        for (rect, (_, label)) in popup.layout.buttons.iter().zip(&popup.content.actions) {
            self.set_foreground(accent)?;
            conn.poly_rectangle(
                window,
                self.gc,
                &[rectangle(Rect::new(rect.x, rect.y, rect.width - 1, rect.height - 1))],
            )?;
            self.set_foreground(FOREGROUND)?;
            conn.image_text8(
                window,
                self.gc,
                (rect.x + PADDING) as i16,
                (rect.y + 2 + self.metrics.ascent) as i16,
                &to_latin1(label),
            )?;
        }

        self.draw_countdown(window, popup)?;
        conn.flush()?;
        Ok(())
    }

    fn draw_countdown(&self, window: Window, popup: &PopupWindow) -> Result<(), X11Error> {
        let size = popup.layout.size;
        let bar = Rect::new(1, size.height - BAR_HEIGHT - 1, size.width - 2, BAR_HEIGHT);
        self.set_foreground(BACKGROUND)?;
        self.conn.poly_fill_rectangle(window, self.gc, &[rectangle(bar)])?;

        let (Some(total), Some(remaining)) = (popup.total, popup.remaining) else {
            return Ok(());
        };
        let width = countdown_width(bar.width, total, remaining);
        if width > 0 {
            self.set_foreground(if popup.critical { CRITICAL } else { ACCENT })?;
            self.conn.poly_fill_rectangle(
                window,
                self.gc,
                &[rectangle(Rect::new(bar.x, bar.y, width, bar.height))],
            )?;
        }
        Ok(())
    }

    fn draw_icon(&self, window: Window, icon: &RgbaImage) -> Result<(), X11Error> {
        if self.depth != 24 && self.depth != 32 {
            return Ok(());
        }
        let (width, height) = icon.dimensions();
        // Centered in the icon box.
        let x = PADDING + (ICON_SIZE - width as i32) / 2;
        let y = PADDING + (ICON_SIZE - height as i32) / 2;
        self.conn.put_image(
            ImageFormat::Z_PIXMAP,
            window,
            self.gc,
            width as u16,
            height as u16,
            x as i16,
            y as i16,
            0,
            self.depth,
            &to_bgrx(icon, BACKGROUND),
        )?;
        Ok(())
    }

    fn set_foreground(&self, pixel: u32) -> Result<(), X11Error> {
        self.conn
            .change_gc(self.gc, &ChangeGCAux::new().foreground(pixel))?;
        Ok(())
    }

    fn log_err<E: std::fmt::Display>(&self, result: Result<(), E>, what: &str) {
        if let Err(e) = result {
            debug!("Popup {} failed: {}", what, e);
        }
    }

    fn with_popup(&mut self, popup: PopupHandle, f: impl FnOnce(&mut PopupWindow)) -> Option<Window> {
        let window = window_of(popup)?;
        let state = self.popups.get_mut(&window)?;
        f(state);
        Some(window)
    }
}

impl Renderer for PopupManager {
    fn create_popup(&mut self) -> Result<PopupHandle, String> {
        let window = self.create_window().map_err(|e| e.to_string())?;
        let content = Content::default();
        let layout = compute_layout(self.metrics, &content);
        self.popups.insert(
            window,
            PopupWindow {
                content,
                layout: Layout {
                    size: Size::new(POPUP_WIDTH, 1),
                    ..layout
                },
                icon: None,
                critical: false,
                anchor: None,
                total: None,
                remaining: None,
                mapped: false,
            },
        );
        self.relayout(window);
        debug!("Created popup window {:#x}", window);
        Ok(PopupHandle(u64::from(window)))
    }

    fn destroy_popup(&mut self, popup: PopupHandle) {
        let Some(window) = window_of(popup) else {
            return;
        };
        if self.popups.remove(&window).is_none() {
            return;
        }
        let result = self
            .conn
            .destroy_window(window)
            .map(|_| ())
            .and_then(|_| self.conn.flush());
        self.log_err(result, "destroy");
    }

    fn set_text(&mut self, popup: PopupHandle, summary: &str, body: &str) {
        if let Some(window) = self.with_popup(popup, |p| {
            p.content.summary = summary.to_string();
            p.content.body = body.to_string();
        }) {
            self.relayout(window);
        }
    }

    fn set_hints(&mut self, popup: PopupHandle, hints: &HashMap<String, HintValue>) {
        let critical = matches!(hints.get("urgency"), Some(HintValue::Byte(2)));
        if let Some(window) = self.with_popup(popup, |p| p.critical = critical) {
            self.relayout(window);
        }
    }

    fn set_icon(&mut self, popup: PopupHandle, icon: &IconSource) {
        let image = icon::load_icon(icon, &self.icon_roots);
        if image.is_none() {
            match icon {
                IconSource::File(path) => debug!("No icon loaded from {}", path.display()),
                IconSource::Name(name) => debug!("No icon found for '{}'", name),
                IconSource::Image(_) => {}
            }
        }
        if let Some(window) = self.with_popup(popup, |p| {
            p.content.has_icon = image.is_some();
            p.icon = image;
        }) {
            self.relayout(window);
        }
    }

    fn clear_actions(&mut self, popup: PopupHandle) {
        if let Some(window) = self.with_popup(popup, |p| p.content.actions.clear()) {
            self.relayout(window);
        }
    }

    fn add_action(&mut self, popup: PopupHandle, key: &str, label: &str) {
        if let Some(window) = self.with_popup(popup, |p| {
            p.content.actions.push((key.to_string(), label.to_string()))
        }) {
            self.relayout(window);
        }
    }

    fn set_arrow(&mut self, popup: PopupHandle, anchor: Option<Point>) {
        if let Some(window) = self.with_popup(popup, |p| p.anchor = anchor) {
            self.log_err(self.draw(window), "draw");
        }
    }

    fn move_popup(&mut self, popup: PopupHandle, position: Point) {
        let Some(window) = window_of(popup) else {
            return;
        };
        let Some(state) = self.popups.get(&window) else {
            return;
        };
        let origin = match state.anchor {
            Some(_) => anchored_origin(position, state.layout.size, self.screen),
            None => position,
        };
        let result = self
            .conn
            .configure_window(window, &ConfigureWindowAux::new().x(origin.x).y(origin.y))
            .map(|_| ())
            .and_then(|_| self.conn.flush());
        self.log_err(result, "move");
    }

    fn show(&mut self, popup: PopupHandle) {
        let Some(window) = self.with_popup(popup, |p| p.mapped = true) else {
            return;
        };
        let result = self
            .conn
            .map_window(window)
            .map(|_| ())
            .and_then(|_| {
                self.conn
                    .configure_window(
                        window,
                        &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
                    )
                    .map(|_| ())
            })
            .and_then(|_| self.conn.flush());
        self.log_err(result, "show");
        self.log_err(self.draw(window), "draw");
    }

    fn hide(&mut self, popup: PopupHandle) {
        let Some(window) = self.with_popup(popup, |p| p.mapped = false) else {
            return;
        };
        let result = self
            .conn
            .unmap_window(window)
            .map(|_| ())
            .and_then(|_| self.conn.flush());
        self.log_err(result, "hide");
    }

    fn set_timeout(&mut self, popup: PopupHandle, total: Duration) {
        if let Some(window) = self.with_popup(popup, |p| {
            p.total = Some(total);
            p.remaining = Some(total);
        }) {
            self.log_err(self.draw(window), "draw");
        }
    }

    fn tick(&mut self, popup: PopupHandle, remaining: Duration) {
        let Some(window) = self.with_popup(popup, |p| p.remaining = Some(remaining)) else {
            return;
        };
        if let Some(state) = self.popups.get(&window).filter(|p| p.mapped) {
            let result = self
                .draw_countdown(window, state)
                .and_then(|_| self.conn.flush().map_err(X11Error::from));
            self.log_err(result, "tick");
        }
    }

    fn popup_size(&self, popup: PopupHandle) -> Size {
        window_of(popup)
            .and_then(|w| self.popups.get(&w))
            .map(|p| p.layout.size)
            .unwrap_or(Size::new(POPUP_WIDTH, 1))
    }
}

fn window_of(popup: PopupHandle) -> Option<Window> {
    u32::try_from(popup.0).ok()
}

fn rectangle(rect: Rect) -> Rectangle {
    Rectangle {
        x: rect.x as i16,
        y: rect.y as i16,
        width: rect.width.max(0) as u16,
        height: rect.height.max(0) as u16,
    }
}

/// Top-left corner for a popup hanging below `anchor`, kept on screen.
fn anchored_origin(anchor: Point, size: Size, screen: Rect) -> Point {
    let x = (anchor.x - size.width / 2).clamp(screen.x, (screen.right() - size.width).max(screen.x));
    let y = (anchor.y + ARROW_HEIGHT).clamp(screen.y, (screen.bottom() - size.height).max(screen.y));
    Point::new(x, y)
}

fn countdown_width(full: i32, total: Duration, remaining: Duration) -> i32 {
    if total.is_zero() {
        return 0;
    }
    let fraction = remaining.as_secs_f64() / total.as_secs_f64();
    (f64::from(full) * fraction.clamp(0.0, 1.0)).round() as i32
}

/// A link inside body text, as character offsets into [`RichText::text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub start: usize,
    pub end: usize,
    pub href: String,
}

/// Body text with markup removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RichText {
    pub text: String,
    pub links: Vec<Link>,
}

const ENTITIES: &[(&str, char)] = &[
    ("&lt;", '<'),
    ("&gt;", '>'),
    ("&quot;", '"'),
    ("&apos;", '\''),
    ("&amp;", '&'),
];

/// Drop markup tags, decode the basic entities and remember `<a href>` spans.
pub fn parse_markup(text: &str) -> RichText {
    let mut out = String::with_capacity(text.len());
    let mut len = 0;
    let mut links = Vec::new();
    let mut open: Option<(usize, String)> = None;

    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        match c {
            '<' => {
                // An unterminated tag swallows the rest of the text.
                let Some(close) = rest.find('>') else {
                    break;
                };
                let tag = rest[1..close].trim();
                if let Some(href) = link_target(tag) {
                    open = Some((len, href));
                } else if tag.eq_ignore_ascii_case("/a") {
                    if let Some((start, href)) = open.take() {
                        links.push(Link { start, end: len, href });
                    }
                }
                rest = &rest[close + 1..];
            }
            '&' => {
                let (decoded, consumed) = ENTITIES
                    .iter()
                    .find(|(entity, _)| rest.starts_with(entity))
                    .map(|(entity, ch)| (*ch, entity.len()))
                    .unwrap_or(('&', 1));
                out.push(decoded);
                len += 1;
                rest = &rest[consumed..];
            }
            _ => {
                out.push(c);
                len += 1;
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    if let Some((start, href)) = open {
        links.push(Link { start, end: len, href });
    }
    links.retain(|link| link.end > link.start);
    RichText { text: out, links }
}

/// Target of an `<a href=...>` opening tag.
fn link_target(tag: &str) -> Option<String> {
    let mut parts = tag.splitn(2, char::is_whitespace);
    if !parts.next()?.eq_ignore_ascii_case("a") {
        return None;
    }
    let attributes = parts.next()?;
    let value = &attributes[attributes.find("href=")? + 5..];
    let href = match value.chars().next()? {
        quote @ ('"' | '\'') => {
            let inner = &value[1..];
            &inner[..inner.find(quote)?]
        }
        _ => value.split_whitespace().next()?,
    };
    let mut decoded = href.to_string();
    for (entity, ch) in ENTITIES {
        decoded = decoded.replace(entity, &ch.to_string());
    }
    (!decoded.is_empty()).then_some(decoded)
}

/// Drop markup tags and decode the basic entities.
pub fn strip_markup(text: &str) -> String {
    parse_markup(text).text
}

/// Where a run of source characters landed after wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Piece {
    line: usize,
    col: usize,
    /// Character offset in the unwrapped text.
    src: usize,
    len: usize,
}

/// Whitespace-separated words of `text` with their character offsets.
fn words(text: &str) -> Vec<(usize, Vec<char>)> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    let mut start = 0;
    for (i, c) in text.chars().enumerate() {
        if c.is_whitespace() {
            if !current.is_empty() {
                out.push((start, std::mem::take(&mut current)));
            }
        } else {
            if current.is_empty() {
                start = i;
            }
            current.push(c);
        }
    }
    if !current.is_empty() {
        out.push((start, current));
    }
    out
}

/// Greedy word wrap to `columns` characters, at most `max_lines` lines.
pub fn wrap_text(text: &str, columns: usize, max_lines: usize) -> Vec<String> {
    wrap_pieces(text, columns, max_lines).0
}

fn wrap_pieces(text: &str, columns: usize, max_lines: usize) -> (Vec<String>, Vec<Piece>) {
    let mut lines = Vec::new();
    let mut pieces = Vec::new();
    let mut offset = 0;
    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_len = 0;
        for (start, mut word) in words(paragraph) {
            let mut src = offset + start;
            // Hard-split words that cannot fit on any line.
            while word.len() > columns {
                if current_len > 0 {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                pieces.push(Piece {
                    line: lines.len(),
                    col: 0,
                    src,
                    len: columns,
                });
                lines.push(word.drain(..columns).collect());
                src += columns;
            }
            let needed = if current_len == 0 {
                word.len()
            } else {
                current_len + 1 + word.len()
            };
            if needed > columns && current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            pieces.push(Piece {
                line: lines.len(),
                col: current_len,
                src,
                len: word.len(),
            });
            current_len += word.len();
            current.extend(word);
        }
        if current_len > 0 {
            lines.push(current);
        }
        offset += paragraph.chars().count() + 1;
    }
    if lines.len() > max_lines {
        lines.truncate(max_lines);
        if let Some(last) = lines.last_mut() {
            last.push_str("...");
        }
        pieces.retain(|piece| piece.line < max_lines);
    }
    (lines, pieces)
}

/// Latin-1 bytes for the core font, at most 255 of them.
pub fn to_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .take(255)
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Blend an RGBA icon over `background` into BGRX rows for `put_image`.
fn to_bgrx(image: &RgbaImage, background: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(image.as_raw().len());
    for px in image.pixels() {
        let [r, g, b, a] = px.0;
        let alpha = u32::from(a);
        let blend = |c: u8, bg: u32| ((u32::from(c) * alpha + bg * (255 - alpha)) / 255) as u8;
        out.extend_from_slice(&[
            blend(b, background & 0xff),
            blend(g, (background >> 8) & 0xff),
            blend(r, (background >> 16) & 0xff),
            0,
        ]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("<b>Build</b> &amp; test"), "Build & test");
        assert_eq!(strip_markup("a &lt;b&gt;"), "a <b>");
        assert_eq!(strip_markup("<a href=\"x\">link</a>"), "link");
    }

    #[test]
    fn test_wrap_text() {
        let lines = wrap_text("the quick brown fox jumps", 10, 10);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps"]);
    }

    #[test]
    fn test_wrap_text_long_word_and_limit() {
        let lines = wrap_text("abcdefghijkl", 5, 10);
        assert_eq!(lines, vec!["abcde", "fghij", "kl"]);

        let lines = wrap_text("a\nb\nc\nd", 5, 2);
        assert_eq!(lines, vec!["a", "b..."]);
    }

    #[test]
    fn test_to_latin1() {
        assert_eq!(to_latin1("café"), vec![b'c', b'a', b'f', 0xe9]);
        assert_eq!(to_latin1("→"), vec![b'?']);
        assert_eq!(to_latin1(&"x".repeat(300)).len(), 255);
    }

    #[test]
    fn test_layout_grows_with_content() {
        let metrics = FontMetrics::default();
        let empty = compute_layout(metrics, &Content::default());
        let with_body = compute_layout(
            metrics,
            &Content {
                summary: "s".into(),
                body: "one\ntwo".into(),
                ..Default::default()
            },
        );
        assert_eq!(with_body.body_lines.len(), 2);
        assert_eq!(
            with_body.size.height - empty.size.height,
            2 * metrics.line_height()
        );
        assert_eq!(with_body.size.width, POPUP_WIDTH);
    }

    #[test]
    fn test_layout_buttons_in_order() {
        let metrics = FontMetrics::default();
        let layout = compute_layout(
            metrics,
            &Content {
                summary: "s".into(),
                actions: vec![("yes".into(), "Yes".into()), ("no".into(), "No".into())],
                ..Default::default()
            },
        );
        assert_eq!(layout.buttons.len(), 2);
        assert!(layout.buttons[0].right() < layout.buttons[1].x);
        assert!(layout.buttons[0].bottom() < layout.size.height);
    }

    #[test]
    fn test_anchored_origin_stays_on_screen() {
        let screen = Rect::new(0, 0, 1920, 1080);
        let size = Size::new(320, 100);
        assert_eq!(
            anchored_origin(Point::new(960, 500), size, screen),
            Point::new(800, 508)
        );
        assert_eq!(
            anchored_origin(Point::new(5, 1070), size, screen),
            Point::new(0, 980)
        );
    }

    #[test]
    fn test_countdown_width() {
        let total = Duration::from_secs(10);
        assert_eq!(countdown_width(100, total, Duration::from_secs(5)), 50);
        assert_eq!(countdown_width(100, total, Duration::ZERO), 0);
        assert_eq!(countdown_width(100, Duration::ZERO, Duration::ZERO), 0);
    }

    #[test]
    fn test_to_bgrx_blends_alpha() {
        let image = RgbaImage::from_raw(2, 1, vec![0x10, 0x20, 0x30, 255, 0xff, 0xff, 0xff, 0]).unwrap();
        let pixels = to_bgrx(&image, 0x2b2b2b);
        assert_eq!(pixels, vec![0x30, 0x20, 0x10, 0, 0x2b, 0x2b, 0x2b, 0]);
    }

    #[test]
    fn test_parse_markup_keeps_links() {
        let rich = parse_markup("See <a href=\"https://example.org/?a=1&amp;b=2\">the docs</a> now");
        assert_eq!(rich.text, "See the docs now");
        assert_eq!(
            rich.links,
            vec![Link {
                start: 4,
                end: 12,
                href: "https://example.org/?a=1&b=2".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_markup_link_variants() {
        let rich = parse_markup("<a href='x'>one</a> <A HREF=y>two</A>");
        assert_eq!(rich.text, "one two");
        assert_eq!(rich.links.len(), 1);
        assert_eq!(rich.links[0].href, "x");

        let rich = parse_markup("<a>plain</a> <a href=\"u\"></a> <a href=\"open\">tail");
        assert_eq!(rich.text, "plain  tail");
        assert_eq!(
            rich.links,
            vec![Link {
                start: 7,
                end: 11,
                href: "open".to_string(),
            }]
        );
    }

    #[test]
    fn test_link_area_and_hit() {
        let metrics = FontMetrics::default();
        let content = Content {
            summary: "s".into(),
            body: "read <a href=\"https://example.org\">more here</a>".into(),
            actions: vec![("ok".into(), "OK".into())],
            ..Default::default()
        };
        let layout = compute_layout(metrics, &content);
        let line = metrics.line_height();
        assert_eq!(
            layout.links,
            vec![LinkArea {
                rect: Rect::new(PADDING + 5 * 6, PADDING + line, 9 * 6, line),
                href: "https://example.org".to_string(),
            }]
        );

        let on_link = Point::new(PADDING + 6 * 6, PADDING + line + 2);
        assert_eq!(
            layout.hit(&content.actions, on_link),
            PopupHit::Link("https://example.org".to_string())
        );
        let before_link = Point::new(PADDING + 6, PADDING + line + 2);
        assert_eq!(layout.hit(&content.actions, before_link), PopupHit::Body);
        let button = layout.buttons[0];
        assert_eq!(
            layout.hit(&content.actions, Point::new(button.x + 1, button.y + 1)),
            PopupHit::Action("ok".to_string())
        );
    }

    #[test]
    fn test_link_split_across_lines() {
        let metrics = FontMetrics::default();
        // 10 columns of text with the default metrics.
        let columns = 10;
        let rich = parse_markup("go <a href=\"u\">aaaa bbbbbbb</a>");
        let (lines, pieces) = wrap_pieces(&rich.text, columns, 10);
        assert_eq!(lines, vec!["go aaaa", "bbbbbbb"]);
        let areas = link_areas(&rich.links, &pieces, metrics, 0);
        assert_eq!(areas.len(), 2);
        assert_eq!(areas[0].rect.x, 3 * 6);
        assert_eq!(areas[0].rect.width, 4 * 6);
        assert_eq!(areas[1].rect.x, 0);
        assert_eq!(areas[1].rect.width, 7 * 6);
        assert!(areas[1].rect.y > areas[0].rect.y);
    }
}

//! Per-monitor popup stacks.
//!
//! Each monitor owns an ordered stack of popups anchored to one corner of
//! its work area. Index 0 is the popup nearest the corner (the newest).

use crate::backend::Renderer;
use crate::{Point, PopupHandle, Rect};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Gap between the work-area edge and the first popup.
pub const WORKAREA_PADDING: i32 = 6;

/// Gap between consecutive popups.
pub const STACK_SPACING: i32 = 2;

/// Work area assumed when no monitor is detected.
const FALLBACK_WORK_AREA: Rect = Rect {
    x: 0,
    y: 0,
    width: 1920,
    height: 1040,
};

/// Screen corner the stacks grow from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackLocation {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

impl StackLocation {
    pub const ALL: [StackLocation; 4] = [
        StackLocation::TopLeft,
        StackLocation::TopRight,
        StackLocation::BottomLeft,
        StackLocation::BottomRight,
    ];

    /// Settings identifier, e.g. `"top_left"`.
    pub fn identifier(self) -> &'static str {
        match self {
            StackLocation::TopLeft => "top_left",
            StackLocation::TopRight => "top_right",
            StackLocation::BottomLeft => "bottom_left",
            StackLocation::BottomRight => "bottom_right",
        }
    }

    /// Parse a settings identifier. Empty or unknown strings give the default.
    pub fn from_identifier(s: &str) -> Self {
        match StackLocation::ALL.iter().find(|l| l.identifier() == s) {
            Some(location) => *location,
            None => {
                if !s.is_empty() {
                    warn!("Unknown popup location '{}', using {}", s, StackLocation::default().identifier());
                }
                StackLocation::default()
            }
        }
    }

    fn is_top(self) -> bool {
        matches!(self, StackLocation::TopLeft | StackLocation::TopRight)
    }

    fn is_left(self) -> bool {
        matches!(self, StackLocation::TopLeft | StackLocation::BottomLeft)
    }
}

/// Popups placed on one monitor.
#[derive(Debug, Clone)]
pub struct MonitorStack {
    location: StackLocation,
    work_area: Rect,
    popups: Vec<PopupHandle>,
}

impl MonitorStack {
    fn new(location: StackLocation, work_area: Rect) -> Self {
        Self {
            location,
            work_area,
            popups: Vec::new(),
        }
    }

    pub fn popups(&self) -> &[PopupHandle] {
        &self.popups
    }

    pub fn work_area(&self) -> Rect {
        self.work_area
    }

    fn contains(&self, popup: PopupHandle) -> bool {
        self.popups.contains(&popup)
    }

    fn remove(&mut self, popup: PopupHandle) -> bool {
        match self.popups.iter().position(|&p| p == popup) {
            Some(pos) => {
                self.popups.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Move every popup to its slot, walking away from the corner.
    fn relayout(&self, renderer: &mut impl Renderer) {
        let area = self.work_area;
        let mut offset = WORKAREA_PADDING;

        for &popup in &self.popups {
            let size = renderer.popup_size(popup);
            let x = if self.location.is_left() {
                area.x + WORKAREA_PADDING
            } else {
                area.right() - WORKAREA_PADDING - size.width
            };
            let y = if self.location.is_top() {
                area.y + offset
            } else {
                area.bottom() - offset - size.height
            };
            renderer.move_popup(popup, Point::new(x, y));
            offset += size.height + STACK_SPACING;
        }
    }
}

/// All monitor stacks, indexed by monitor number.
#[derive(Debug)]
pub struct StackManager {
    stacks: Vec<MonitorStack>,
    location: StackLocation,
}

impl StackManager {
    /// One stack per work area. With no monitors a single fallback stack is used.
    pub fn new(location: StackLocation, work_areas: &[Rect]) -> Self {
        let stacks = if work_areas.is_empty() {
            warn!("No monitors reported, using a fallback work area");
            vec![MonitorStack::new(location, FALLBACK_WORK_AREA)]
        } else {
            work_areas
                .iter()
                .map(|&area| MonitorStack::new(location, area))
                .collect()
        };
        Self { stacks, location }
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn location(&self) -> StackLocation {
        self.location
    }

    pub fn stack(&self, index: usize) -> Option<&MonitorStack> {
        self.stacks.get(index)
    }

    pub fn stack_of(&self, popup: PopupHandle) -> Option<usize> {
        self.stacks.iter().position(|s| s.contains(popup))
    }

    pub fn total_popups(&self) -> usize {
        self.stacks.iter().map(|s| s.popups.len()).sum()
    }

    /// Clamp a requested monitor index to an existing stack.
    pub fn clamp_monitor(&self, monitor: usize) -> usize {
        if monitor >= self.stacks.len() {
            debug!(
                "Monitor {} out of range ({} stacks), using the last one",
                monitor,
                self.stacks.len()
            );
            self.stacks.len().saturating_sub(1)
        } else {
            monitor
        }
    }

    /// Put a popup into the stack for `monitor`.
    ///
    /// A new popup goes nearest the corner. An existing popup keeps its slot
    /// when it is already in the target stack and is moved otherwise.
    pub fn place(
        &mut self,
        renderer: &mut impl Renderer,
        popup: PopupHandle,
        monitor: usize,
        is_new: bool,
    ) -> usize {
        let target = self.clamp_monitor(monitor);
        let current = self.stack_of(popup);

        if !is_new && current == Some(target) {
            self.stacks[target].relayout(renderer);
            return target;
        }

        if let Some(old) = current {
            self.stacks[old].remove(popup);
            self.stacks[old].relayout(renderer);
        }
        self.stacks[target].popups.insert(0, popup);
        self.stacks[target].relayout(renderer);
        target
    }

    /// Drop a popup from whichever stack holds it.
    pub fn remove(&mut self, renderer: &mut impl Renderer, popup: PopupHandle) -> bool {
        for stack in &mut self.stacks {
            if stack.remove(popup) {
                stack.relayout(renderer);
                return true;
            }
        }
        false
    }

    /// React to a new monitor layout.
    ///
    /// Growing adds stacks for the new indices only. Shrinking moves every
    /// popup of a removed stack into the new last stack before the removed
    /// stacks are dropped, each one entering nearest the corner as if it were
    /// new. Surviving stacks take their new work areas.
    pub fn monitors_changed(&mut self, renderer: &mut impl Renderer, work_areas: &[Rect]) {
        if work_areas.is_empty() {
            warn!("Monitor change reported zero monitors, keeping current stacks");
            return;
        }

        let old_count = self.stacks.len();
        let new_count = work_areas.len();

        if new_count > old_count {
            info!("Monitors added: {} -> {}", old_count, new_count);
            for &area in &work_areas[old_count..] {
                self.stacks.push(MonitorStack::new(self.location, area));
            }
        } else if new_count < old_count {
            info!("Monitors removed: {} -> {}", old_count, new_count);
            let removed: Vec<MonitorStack> = self.stacks.drain(new_count..).collect();
            let last = &mut self.stacks[new_count - 1];
            let transferred: Vec<PopupHandle> =
                removed.iter().flat_map(|s| s.popups.iter().copied()).collect();
            debug!("Transferring {} popups to stack {}", transferred.len(), new_count - 1);
            for popup in transferred {
                last.popups.insert(0, popup);
            }
        }

        for (stack, &area) in self.stacks.iter_mut().zip(work_areas) {
            stack.work_area = area;
        }
        self.relayout_all(renderer);
    }

    /// Change the corner on every stack and move visible popups.
    pub fn set_location(&mut self, renderer: &mut impl Renderer, location: StackLocation) {
        if self.location == location {
            return;
        }
        info!("Popup location changed to {}", location.identifier());
        self.location = location;
        for stack in &mut self.stacks {
            stack.location = location;
        }
        self.relayout_all(renderer);
    }

    pub fn relayout_all(&self, renderer: &mut impl Renderer) {
        for stack in &self.stacks {
            stack.relayout(renderer);
        }
    }
}

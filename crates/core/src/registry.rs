//! Notification registry: the single owner of live entries.

use crate::backend::Timers;
use crate::expiration::Countdown;
use crate::idle::IdleExit;
use crate::{NativeWindowId, NotificationId, PopupHandle};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from id allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("No free notification ids left")]
    IdSpaceExhausted,
}

/// One live notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEntry {
    pub id: NotificationId,
    pub popup: PopupHandle,
    pub countdown: Countdown,
    /// Native window this popup is anchored to.
    pub source_window: Option<NativeWindowId>,
    /// Client that issued the latest request for this id.
    pub sender: String,
}

/// id → entry, plus the id allocator.
///
/// Emptiness drives the idle-exit timer: the transition to empty arms it,
/// the transition away from empty disarms it.
#[derive(Debug)]
pub struct Registry {
    entries: HashMap<NotificationId, NotificationEntry>,
    next_id: NotificationId,
    idle: IdleExit,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
            idle: IdleExit::new(),
        }
    }

    /// Next unused id. Starts at 1, wraps past `u32::MAX` back to 1 and
    /// skips ids that are still live.
    pub fn allocate_id(&mut self) -> Result<NotificationId, RegistryError> {
        if self.entries.len() >= (u32::MAX as usize) {
            return Err(RegistryError::IdSpaceExhausted);
        }
        loop {
            let candidate = self.next_id;
            self.next_id = self.next_id.checked_add(1).unwrap_or(1);
            if !self.entries.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
    }

    /// Insert or replace an entry.
    pub fn put(&mut self, entry: NotificationEntry, timers: &mut impl Timers) {
        self.entries.insert(entry.id, entry);
        self.idle.disarm(timers);
    }

    pub fn get(&self, id: NotificationId) -> Option<&NotificationEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: NotificationId) -> Option<&mut NotificationEntry> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: NotificationId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Take an entry out. The caller runs teardown after this returns, so
    /// anything observing the registry during teardown sees it gone.
    pub fn remove(
        &mut self,
        id: NotificationId,
        timers: &mut impl Timers,
    ) -> Option<NotificationEntry> {
        let entry = self.entries.remove(&id);
        if entry.is_some() && self.entries.is_empty() {
            self.idle.arm(timers);
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<NotificationId> {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn entries(&self) -> impl Iterator<Item = &NotificationEntry> {
        self.entries.values()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut NotificationEntry> {
        self.entries.values_mut()
    }

    pub fn find_by_popup(&self, popup: PopupHandle) -> Option<NotificationId> {
        self.entries.values().find(|e| e.popup == popup).map(|e| e.id)
    }

    /// Arm idle exit if nothing is live (used at startup).
    pub fn arm_idle_if_empty(&mut self, timers: &mut impl Timers) {
        if self.entries.is_empty() {
            self.idle.arm(timers);
        }
    }

    pub fn idle(&self) -> &IdleExit {
        &self.idle
    }

    pub fn idle_mut(&mut self) -> &mut IdleExit {
        &mut self.idle
    }

    #[cfg(test)]
    pub(crate) fn set_next_id(&mut self, next: NotificationId) {
        self.next_id = next;
    }
}

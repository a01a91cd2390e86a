//! Debounced reposition requests.

use crate::backend::Timers;
use crate::{NotificationId, REPOSITION_DELAY};
use std::collections::HashSet;

/// Coalesces bursts of geometry changes into one delayed reposition per id.
#[derive(Debug, Default)]
pub struct RepositionQueue {
    pending: HashSet<NotificationId>,
}

impl RepositionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a reposition unless one is already pending for `id`.
    /// Returns true if a timer was started.
    pub fn schedule(&mut self, timers: &mut impl Timers, id: NotificationId) -> bool {
        if !self.pending.insert(id) {
            return false;
        }
        timers.schedule_reposition(id, REPOSITION_DELAY);
        true
    }

    /// The timer for `id` fired. Clears the pending mark.
    pub fn fire(&mut self, id: NotificationId) -> bool {
        self.pending.remove(&id)
    }

    pub fn is_pending(&self, id: NotificationId) -> bool {
        self.pending.contains(&id)
    }
}

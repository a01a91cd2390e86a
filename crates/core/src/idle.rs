//! Idle-exit timer state.

use crate::backend::Timers;
use tracing::debug;

/// Tracks whether the one-shot idle-exit timer is armed.
///
/// Arming twice or disarming while unarmed never reaches the timer backend.
#[derive(Debug, Default)]
pub struct IdleExit {
    armed: bool,
}

impl IdleExit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn arm(&mut self, timers: &mut impl Timers) {
        if self.armed {
            return;
        }
        debug!("Arming idle exit");
        timers.arm_idle_exit();
        self.armed = true;
    }

    pub fn disarm(&mut self, timers: &mut impl Timers) {
        if !self.armed {
            return;
        }
        debug!("Disarming idle exit");
        timers.disarm_idle_exit();
        self.armed = false;
    }

    /// The timer fired; it is one-shot, so it is no longer armed.
    pub fn fired(&mut self) {
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeHost};

    #[test]
    fn test_arm_is_idempotent() {
        let mut host = FakeHost::new();
        let mut idle = IdleExit::new();
        idle.arm(&mut host);
        idle.arm(&mut host);
        assert!(idle.is_armed());
        assert_eq!(host.calls, vec![Call::ArmIdle]);
    }

    #[test]
    fn test_disarm_when_unarmed_is_noop() {
        let mut host = FakeHost::new();
        let mut idle = IdleExit::new();
        idle.disarm(&mut host);
        assert!(host.calls.is_empty());

        idle.arm(&mut host);
        idle.disarm(&mut host);
        assert!(!idle.is_armed());
        assert_eq!(host.calls, vec![Call::ArmIdle, Call::DisarmIdle]);
    }

    #[test]
    fn test_fired_allows_rearm() {
        let mut host = FakeHost::new();
        let mut idle = IdleExit::new();
        idle.arm(&mut host);
        idle.fired();
        assert!(!idle.is_armed());
        idle.arm(&mut host);
        assert_eq!(host.count(|c| *c == Call::ArmIdle), 2);
    }
}

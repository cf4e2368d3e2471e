//! # When a dead worker is forked again.
//!
//! Only consulted by the opt-in [`Respawner`](crate::Respawner); the supervisor
//! itself never respawns.
//!
//! ```text
//! RespawnPolicy::Never    → dead workers stay dead
//! RespawnPolicy::OnCrash  → respawn workers that died without a disconnect (default)
//! RespawnPolicy::Always   → respawn every exit
//! ```
//!
//! Workers retired through [`Respawner::stop`](crate::Respawner::stop) or a
//! cluster shutdown are never respawned, whatever the policy.

use crate::workers::WorkerHandle;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RespawnPolicy {
    Never,
    #[default]
    OnCrash,
    Always,
}

impl RespawnPolicy {
    /// Whether the `dead` worker qualifies for a respawn.
    pub fn should_respawn(self, dead: &WorkerHandle) -> bool {
        match self {
            RespawnPolicy::Never => false,
            RespawnPolicy::OnCrash => dead.crashed(),
            RespawnPolicy::Always => dead.is_dead(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::{Signal, WorkerId};

    fn dead(voluntary: bool, code: Option<i32>, signal: Option<Signal>) -> WorkerHandle {
        let mut h = WorkerHandle::new(WorkerId::new(1));
        h.exited_after_disconnect = voluntary;
        h.record_exit(code, signal);
        h
    }

    #[test]
    fn on_crash_skips_voluntary_exits() {
        let p = RespawnPolicy::OnCrash;
        assert!(p.should_respawn(&dead(false, Some(1), None)));
        assert!(p.should_respawn(&dead(false, None, Some(Signal::Kill))));
        assert!(!p.should_respawn(&dead(true, Some(0), None)));
    }

    #[test]
    fn always_and_never() {
        let voluntary = dead(true, Some(0), None);
        assert!(RespawnPolicy::Always.should_respawn(&voluntary));
        assert!(!RespawnPolicy::Never.should_respawn(&dead(false, Some(1), None)));
        assert!(!RespawnPolicy::Always.should_respawn(&WorkerHandle::new(WorkerId::new(2))));
    }
}

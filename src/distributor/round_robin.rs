//! Round-robin rotation over worker ids.
//!
//! Members are kept in ascending id order. The cursor is the last chosen id;
//! the next pick is the first eligible member after it, wrapping around. A call
//! looks at each member at most once, so an empty eligible set is detected in
//! one pass. Ids are assigned monotonically, so a new worker always lands after
//! the current maximum and never reorders the rotation.

use std::collections::BTreeSet;
use std::ops::Bound::{Excluded, Unbounded};

use crate::workers::WorkerId;

#[derive(Debug, Default)]
pub(crate) struct RoundRobin {
    members: BTreeSet<WorkerId>,
    last: Option<WorkerId>,
}

impl RoundRobin {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, id: WorkerId) {
        self.members.insert(id);
    }

    /// Removing the cursor's id keeps the cursor position: the next pick is
    /// still the member after it.
    pub(crate) fn remove(&mut self, id: WorkerId) {
        self.members.remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: WorkerId) -> bool {
        self.members.contains(&id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    /// Picks the next eligible member and advances the cursor to it.
    pub(crate) fn next(&mut self, mut eligible: impl FnMut(WorkerId) -> bool) -> Option<WorkerId> {
        let picked = match self.last {
            Some(last) => self
                .members
                .range((Excluded(last), Unbounded))
                .chain(self.members.range(..=last))
                .copied()
                .find(|id| eligible(*id)),
            None => self.members.iter().copied().find(|id| eligible(*id)),
        }?;
        self.last = Some(picked);
        Some(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<WorkerId> {
        raw.iter().copied().map(WorkerId::new).collect()
    }

    fn rotation(raw: &[u64]) -> RoundRobin {
        let mut rr = RoundRobin::new();
        for id in ids(raw) {
            rr.insert(id);
        }
        rr
    }

    #[test]
    fn k_calls_visit_each_member_once() {
        let mut rr = rotation(&[1, 2, 3, 4]);
        let picked: Vec<_> = (0..4).filter_map(|_| rr.next(|_| true)).collect();
        assert_eq!(picked, ids(&[1, 2, 3, 4]));
        assert_eq!(rr.next(|_| true), Some(WorkerId::new(1)));
    }

    #[test]
    fn skips_ineligible_members() {
        let mut rr = rotation(&[1, 2, 3]);
        let listening = |id: WorkerId| id != WorkerId::new(2);
        let picked: Vec<_> = (0..4).filter_map(|_| rr.next(listening)).collect();
        assert_eq!(picked, ids(&[1, 3, 1, 3]));
    }

    #[test]
    fn member_leaving_mid_sequence_is_never_picked() {
        let mut rr = rotation(&[1, 2, 3]);
        assert_eq!(rr.next(|_| true), Some(WorkerId::new(1)));
        let gone = WorkerId::new(2);
        for _ in 0..6 {
            assert_ne!(rr.next(|id| id != gone), Some(gone));
        }
    }

    #[test]
    fn nothing_eligible_returns_none_and_keeps_cursor() {
        let mut rr = rotation(&[1, 2]);
        assert_eq!(rr.next(|_| true), Some(WorkerId::new(1)));
        let mut looked = 0;
        assert_eq!(
            rr.next(|_| {
                looked += 1;
                false
            }),
            None
        );
        assert_eq!(looked, 2);
        assert_eq!(rr.next(|_| true), Some(WorkerId::new(2)));
    }

    #[test]
    fn new_members_append_after_maximum() {
        let mut rr = rotation(&[1, 2]);
        assert_eq!(rr.next(|_| true), Some(WorkerId::new(1)));
        rr.insert(WorkerId::new(3));
        let picked: Vec<_> = (0..3).filter_map(|_| rr.next(|_| true)).collect();
        assert_eq!(picked, ids(&[2, 3, 1]));
    }

    #[test]
    fn removing_cursor_member_continues_after_it() {
        let mut rr = rotation(&[1, 2, 3]);
        rr.next(|_| true);
        rr.next(|_| true);
        rr.remove(WorkerId::new(2));
        assert!(!rr.contains(WorkerId::new(2)));
        assert_eq!(rr.next(|_| true), Some(WorkerId::new(3)));
    }

    #[test]
    fn empty_rotation() {
        let mut rr = RoundRobin::new();
        assert_eq!(rr.len(), 0);
        assert_eq!(rr.next(|_| true), None);
    }
}

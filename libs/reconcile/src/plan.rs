//! List-switch reconciliation plans.

use std::collections::BTreeSet;

use crate::SpaceId;

/// What must happen remotely when the active entity set is replaced.
///
/// Spaces held by both sets are left alone by the clear step; the push step
/// re-sends every target space so the incoming list's data wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Spaces occupied now but not by the target set.
    pub to_clear: BTreeSet<SpaceId>,

    /// Spaces the target set occupies.
    pub to_push: BTreeSet<SpaceId>,

    /// Spaces occupied by both sets.
    pub retained: BTreeSet<SpaceId>,
}

impl ReconcilePlan {
    /// Diff the currently assigned spaces against the target's.
    pub fn between<C, T>(current: C, target: T) -> Self
    where
        C: IntoIterator<Item = SpaceId>,
        T: IntoIterator<Item = SpaceId>,
    {
        let current: BTreeSet<SpaceId> = current.into_iter().filter(|s| !s.is_blank()).collect();
        let target: BTreeSet<SpaceId> = target.into_iter().filter(|s| !s.is_blank()).collect();

        Self {
            to_clear: current.difference(&target).cloned().collect(),
            retained: current.intersection(&target).cloned().collect(),
            to_push: target,
        }
    }

    /// Returns true if nothing needs to be sent.
    pub fn is_noop(&self) -> bool {
        self.to_clear.is_empty() && self.to_push.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[u32]) -> BTreeSet<SpaceId> {
        ids.iter().copied().map(SpaceId::from).collect()
    }

    #[test]
    fn test_overlapping_lists() {
        let plan = ReconcilePlan::between(set(&[1, 2, 3]), set(&[2, 3, 4]));
        assert_eq!(plan.to_clear, set(&[1]));
        assert_eq!(plan.to_push, set(&[2, 3, 4]));
        assert_eq!(plan.retained, set(&[2, 3]));
    }

    #[test]
    fn test_disjoint_lists() {
        let plan = ReconcilePlan::between(set(&[1, 2]), set(&[5]));
        assert_eq!(plan.to_clear, set(&[1, 2]));
        assert_eq!(plan.to_push, set(&[5]));
        assert!(plan.retained.is_empty());
    }

    #[test]
    fn test_empty_target_clears_everything() {
        let plan = ReconcilePlan::between(set(&[3, 1]), set(&[]));
        assert_eq!(plan.to_clear, set(&[1, 3]));
        assert!(plan.to_push.is_empty());
    }

    #[test]
    fn test_blank_ids_ignored() {
        let plan = ReconcilePlan::between(vec![SpaceId::from("")], vec![SpaceId::from(" ")]);
        assert!(plan.is_noop());
    }
}

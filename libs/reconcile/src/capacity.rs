//! Capacity pool model.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::SpaceId;

/// Capacity errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapacityError {
    /// More spaces were requested than are free.
    #[error("capacity exceeded: requested {requested}, available {available}")]
    Exceeded { requested: u32, available: u32 },
}

/// A bounded pool of numbered spaces `1..=total_spaces`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityPool {
    total_spaces: u32,
}

/// Point-in-time view of a pool against an entity set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub total_spaces: u32,
    pub assigned_spaces: u32,
    pub available_spaces: u32,
}

impl CapacityPool {
    pub const fn new(total_spaces: u32) -> Self {
        Self { total_spaces }
    }

    pub const fn total_spaces(&self) -> u32 {
        self.total_spaces
    }

    /// True when `space` is one of the pool's numbered slots.
    pub fn contains(&self, space: &SpaceId) -> bool {
        space
            .number()
            .is_some_and(|n| n >= 1 && n <= self.total_spaces)
    }

    /// Count assignments and derive availability.
    ///
    /// `assignments` yields one item per entity: its assigned space, if any.
    pub fn snapshot<'a, I>(&self, assignments: I) -> PoolSnapshot
    where
        I: IntoIterator<Item = Option<&'a SpaceId>>,
    {
        let assigned = assignments.into_iter().flatten().count();
        let assigned_spaces = u32::try_from(assigned).unwrap_or(u32::MAX);

        PoolSnapshot {
            total_spaces: self.total_spaces,
            assigned_spaces,
            available_spaces: self.total_spaces.saturating_sub(assigned_spaces),
        }
    }

    /// Reject a request for `additional` new assignments that does not fit.
    pub fn ensure_room(&self, snapshot: &PoolSnapshot, additional: usize) -> Result<(), CapacityError> {
        let requested = u32::try_from(additional).unwrap_or(u32::MAX);
        if requested > snapshot.available_spaces {
            return Err(CapacityError::Exceeded {
                requested,
                available: snapshot.available_spaces,
            });
        }
        Ok(())
    }

    /// The `count` lowest-numbered spaces not present in `taken`.
    ///
    /// Fails without a partial result when fewer than `count` are free.
    pub fn next_available_space_ids<'a, I>(
        &self,
        taken: I,
        count: usize,
    ) -> Result<Vec<SpaceId>, CapacityError>
    where
        I: IntoIterator<Item = &'a SpaceId>,
    {
        let taken: HashSet<u32> = taken.into_iter().filter_map(SpaceId::number).collect();

        let free: Vec<SpaceId> = (1..=self.total_spaces)
            .filter(|n| !taken.contains(n))
            .take(count)
            .map(SpaceId::from)
            .collect();

        if free.len() < count {
            return Err(CapacityError::Exceeded {
                requested: u32::try_from(count).unwrap_or(u32::MAX),
                available: u32::try_from(free.len()).unwrap_or(u32::MAX),
            });
        }

        Ok(free)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn spaces(ids: &[u32]) -> Vec<SpaceId> {
        ids.iter().copied().map(SpaceId::from).collect()
    }

    #[test]
    fn test_snapshot_counts_assigned_entities() {
        let pool = CapacityPool::new(5);
        let held = spaces(&[1, 4]);
        let assignments = vec![Some(&held[0]), None, Some(&held[1]), None];

        let snapshot = pool.snapshot(assignments);
        assert_eq!(snapshot.assigned_spaces, 2);
        assert_eq!(snapshot.available_spaces, 3);
    }

    #[test]
    fn test_snapshot_never_underflows() {
        let pool = CapacityPool::new(1);
        let held = spaces(&[1, 2]);
        let snapshot = pool.snapshot(held.iter().map(Some));
        assert_eq!(snapshot.available_spaces, 0);
    }

    #[rstest]
    #[case(&[], 3, &[1, 2, 3])]
    #[case(&[1, 3], 2, &[2, 4])]
    #[case(&[2, 5], 3, &[1, 3, 4])]
    #[case(&[1, 2, 3], 0, &[])]
    fn test_next_available_ascending(
        #[case] taken: &[u32],
        #[case] count: usize,
        #[case] expected: &[u32],
    ) {
        let pool = CapacityPool::new(6);
        let taken = spaces(taken);
        let free = pool.next_available_space_ids(&taken, count).unwrap();
        assert_eq!(free, spaces(expected));
    }

    #[test]
    fn test_next_available_ignores_foreign_ids() {
        let pool = CapacityPool::new(2);
        let taken = vec![SpaceId::from("POOL-1"), SpaceId::from(1u32)];
        let free = pool.next_available_space_ids(&taken, 1).unwrap();
        assert_eq!(free, spaces(&[2]));
    }

    #[test]
    fn test_next_available_exceeded() {
        let pool = CapacityPool::new(3);
        let taken = spaces(&[1, 2]);
        let err = pool.next_available_space_ids(&taken, 2).unwrap_err();
        assert_eq!(
            err,
            CapacityError::Exceeded {
                requested: 2,
                available: 1
            }
        );
    }

    #[test]
    fn test_ensure_room() {
        let pool = CapacityPool::new(3);
        let held = spaces(&[1, 2]);
        let snapshot = pool.snapshot(held.iter().map(Some));
        assert!(pool.ensure_room(&snapshot, 1).is_ok());
        assert!(pool.ensure_room(&snapshot, 2).is_err());
    }

    #[rstest]
    #[case("1", true)]
    #[case("4", true)]
    #[case("0", false)]
    #[case("5", false)]
    #[case("A", false)]
    fn test_contains(#[case] raw: &str, #[case] expected: bool) {
        assert_eq!(CapacityPool::new(4).contains(&SpaceId::from(raw)), expected);
    }
}

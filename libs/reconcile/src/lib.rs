//! Capacity and reconciliation primitives for space assignment.
//!
//! Everything in this crate is pure: no I/O, no clocks, no async. The sync
//! engine feeds it the current entity set and acts on what it returns.
//!
//! - **Spaces**: numbered label slots, `1..=total_spaces`.
//! - **Capacity pool**: how many slots exist, how many are held, which are
//!   free next.
//! - **Reconcile plan**: which spaces must be vacated and which pushed when one
//!   saved list replaces another.
//!
//! # Invariants
//!
//! - `available_spaces` never underflows; over-commit is rejected up front
//! - Free-space allocation is deterministic (ascending numeric order)
//! - Plans are computed from sets, so overlapping lists never clear a space
//!   the incoming list still occupies

mod capacity;
mod plan;
mod space;

pub use capacity::{CapacityError, CapacityPool, PoolSnapshot};
pub use plan::ReconcilePlan;
pub use space::SpaceId;

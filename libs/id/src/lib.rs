//! # slotsync-id
//!
//! Typed identifiers for the records the sync engine owns locally.
//!
//! Ids are generated on this side and never by the remote label service, so
//! they stay stable across pulls, list loads and restarts. The canonical form
//! is `{prefix}_{ulid}`:
//!
//! - `ent_01HV4Z2WQXKJNM8GPQY6VBKC3D` for an assignable entity
//! - `lst_01HV4Z3MXNKPQR9HSTZ7WCLD4E` for a saved list
//!
//! ULIDs sort by creation time, which gives entity tables a natural order.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;

//! slotsync engine library
//!
//! Keeps a local, optimistic view of which entity occupies which space and
//! converges a remote label service towards it.
//!
//! ## Architecture
//!
//! ```text
//! caller ─▶ AssignmentController ─▶ AssignmentStore (optimistic mutation)
//!                   │
//!                   ├─▶ LabelService (push / clear / fetch, with retry)
//!                   │        └─▶ TokenManager (bearer token)
//!                   └─▶ AssignmentStore (per-entity sync status)
//! ```
//!
//! ## Modules
//!
//! - `store`: in-memory entity table with change events
//! - `client`: remote article API and the [`LabelService`] seam
//! - `token`: bearer token lifecycle
//! - `controller`: assignment, bulk, list and pull operations
//! - `persist`: key-value persistence (SQLite or in-memory)
//! - `worker`: background pull loop

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod lists;
pub mod mock;
pub mod model;
pub mod persist;
pub mod retry;
pub mod store;
pub mod token;
pub mod worker;

pub use client::{Article, HttpAuthClient, HttpLabelClient, LabelService, RemoteConfig, RemoteError};
pub use config::EngineConfig;
pub use controller::{AssignOutcome, AssignmentController, BulkOutcome, ControllerConfig, LoadOutcome};
pub use error::{CleanupReport, CleanupStep, CleanupWarning, SyncError};
pub use lists::SavedList;
pub use model::{Attributes, Entity, ListMembership, SyncStatus};
pub use persist::{EngineState, KvError, KvStore, MemoryKv, SqliteKv};
pub use store::{AssignmentStore, StoreEvent};
pub use token::{Session, TokenManager, TokenPhase};
pub use worker::{SyncRequester, SyncSource};

pub use slotsync_id::{EntityId, ListId};
pub use slotsync_reconcile::{PoolSnapshot, SpaceId};

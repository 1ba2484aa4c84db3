//! Engine errors and cleanup reports.
//!
//! Two channels, kept apart by type:
//! - [`SyncError`] fails the operation the caller asked for.
//! - [`CleanupReport`] collects failures of best-effort side steps (vacating
//!   an old space, clearing another list's spaces). Those never fail the
//!   primary operation.

use slotsync_reconcile::{CapacityError, SpaceId};
use thiserror::Error;

use crate::client::RemoteError;
use crate::persist::KvError;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Allocation beyond the free spaces in the pool. Nothing was changed.
    #[error("capacity exceeded: requested {requested}, available {available}")]
    CapacityExceeded { requested: u32, available: u32 },

    /// The remote service could not be reached or rejected the request.
    /// Local state is kept and affected entities are marked `error`.
    #[error("remote service unavailable: {0}")]
    RemoteUnavailable(#[source] RemoteError),

    /// No usable bearer token; the request was not attempted.
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    /// Input violates a data-model rule. Nothing was changed.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] KvError),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::RemoteUnavailable(_) => "remote_unavailable",
            Self::AuthExpired(_) => "auth_expired",
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Returns true if the error came from talking to the remote service.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_) | Self::AuthExpired(_))
    }
}

impl From<CapacityError> for SyncError {
    fn from(err: CapacityError) -> Self {
        match err {
            CapacityError::Exceeded {
                requested,
                available,
            } => Self::CapacityExceeded {
                requested,
                available,
            },
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::AuthExpired(message) => Self::AuthExpired(message),
            RemoteError::Unaddressable(id) => {
                Self::Validation(format!("entity {id} has no space or virtual pool id"))
            }
            other => Self::RemoteUnavailable(other),
        }
    }
}

/// Best-effort step that produced a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    /// Vacating the space an entity held before a reassignment.
    ClearPreviousSpace,
    /// Vacating spaces the incoming list does not use.
    ClearObsoleteSpaces,
    /// Blanking every assigned space during a mass cancel.
    BlankAssignments,
    /// Writing the local snapshot to durable storage.
    PersistState,
}

impl CleanupStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClearPreviousSpace => "clear_previous_space",
            Self::ClearObsoleteSpaces => "clear_obsolete_spaces",
            Self::BlankAssignments => "blank_assignments",
            Self::PersistState => "persist_state",
        }
    }
}

/// One failed best-effort step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub step: CleanupStep,
    pub spaces: Vec<SpaceId>,
    pub message: String,
}

/// Warnings collected while running best-effort steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    warnings: Vec<CleanupWarning>,
}

impl CleanupReport {
    pub fn warn(&mut self, step: CleanupStep, spaces: Vec<SpaceId>, message: impl Into<String>) {
        self.warnings.push(CleanupWarning {
            step,
            spaces,
            message: message.into(),
        });
    }

    pub fn merge(&mut self, other: CleanupReport) {
        self.warnings.extend(other.warnings);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn warnings(&self) -> &[CleanupWarning] {
        &self.warnings
    }
}

//! Entity data model.
//!
//! An entity is anything that can occupy a space: usually a person. Its
//! attributes are an open string map whose keys come from operator field
//! configuration, so the engine never interprets them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slotsync_id::EntityId;
use slotsync_reconcile::SpaceId;

/// Open attribute map carried to and from the remote service.
pub type Attributes = BTreeMap<String, String>;

/// Per-entity convergence with the remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Changed locally and not yet sent.
    #[default]
    Unsynced,
    /// A push is in flight.
    Pending,
    /// Last push was confirmed.
    Synced,
    /// Last push failed; stays here until an operation is retried.
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsynced => "unsynced",
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership of an entity in a named list, with that list's own space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMembership {
    pub list_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<SpaceId>,
}

/// An assignable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredEntity")]
pub struct Entity {
    pub id: EntityId,
    pub attributes: Attributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_space_id: Option<SpaceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_pool_id: Option<String>,
    pub sync_status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    list_memberships: Vec<ListMembership>,
}

impl Entity {
    /// Create an unassigned, unsynced entity with a fresh id.
    pub fn new(attributes: Attributes) -> Self {
        Self::with_id(EntityId::new(), attributes)
    }

    pub fn with_id(id: EntityId, attributes: Attributes) -> Self {
        Self {
            id,
            attributes,
            assigned_space_id: None,
            virtual_pool_id: None,
            sync_status: SyncStatus::Unsynced,
            last_synced_at: None,
            list_memberships: Vec::new(),
        }
    }

    /// Builder-style space assignment, mostly for fixtures.
    #[must_use]
    pub fn assigned_to(mut self, space: SpaceId) -> Self {
        self.assigned_space_id = Some(space);
        self
    }

    /// Identifier the remote service addresses this entity by.
    ///
    /// A physical space wins over the virtual pool slot.
    pub fn remote_key(&self) -> Option<&str> {
        self.assigned_space_id
            .as_ref()
            .map(SpaceId::as_str)
            .or(self.virtual_pool_id.as_deref())
            .filter(|key| !key.is_empty())
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned_space_id.is_some()
    }

    pub fn memberships(&self) -> &[ListMembership] {
        &self.list_memberships
    }

    pub fn membership(&self, list_name: &str) -> Option<&ListMembership> {
        self.list_memberships
            .iter()
            .find(|m| m.list_name == list_name)
    }

    /// Record membership in `list_name`, replacing any existing entry for it.
    pub fn set_membership(&mut self, list_name: &str, space_id: Option<SpaceId>) {
        match self
            .list_memberships
            .iter_mut()
            .find(|m| m.list_name == list_name)
        {
            Some(existing) => existing.space_id = space_id,
            None => self.list_memberships.push(ListMembership {
                list_name: list_name.to_string(),
                space_id,
            }),
        }
    }

    /// Returns true if a membership was removed.
    pub fn remove_membership(&mut self, list_name: &str) -> bool {
        let before = self.list_memberships.len();
        self.list_memberships.retain(|m| m.list_name != list_name);
        before != self.list_memberships.len()
    }
}

/// On-disk entity shape, including fields written by older versions.
///
/// Older snapshots stored a single `listName`/`listSpaceId` pair next to the
/// membership array. Deserialization folds that pair into the array once, so
/// the rest of the engine only ever sees `list_memberships`.
#[derive(Debug, Deserialize)]
struct StoredEntity {
    id: EntityId,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    assigned_space_id: Option<SpaceId>,
    #[serde(default)]
    virtual_pool_id: Option<String>,
    #[serde(default)]
    sync_status: SyncStatus,
    #[serde(default)]
    last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    list_memberships: Vec<ListMembership>,
    #[serde(default, alias = "listName")]
    list_name: Option<String>,
    #[serde(default, alias = "listSpaceId")]
    list_space_id: Option<SpaceId>,
}

impl From<StoredEntity> for Entity {
    fn from(stored: StoredEntity) -> Self {
        let mut entity = Entity {
            id: stored.id,
            attributes: stored.attributes,
            assigned_space_id: stored.assigned_space_id.filter(|s| !s.is_blank()),
            virtual_pool_id: stored.virtual_pool_id.filter(|v| !v.is_empty()),
            sync_status: stored.sync_status,
            last_synced_at: stored.last_synced_at,
            list_memberships: Vec::with_capacity(stored.list_memberships.len()),
        };

        // Later entries for the same list win.
        for membership in stored.list_memberships {
            entity.set_membership(&membership.list_name, membership.space_id);
        }

        if let Some(list_name) = stored.list_name.filter(|n| !n.is_empty()) {
            if entity.membership(&list_name).is_none() {
                let space = stored.list_space_id.filter(|s| !s.is_blank());
                entity.set_membership(&list_name, space);
            }
        }

        entity
    }
}

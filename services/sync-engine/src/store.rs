//! In-memory assignment table.
//!
//! The store is the authoritative local view. It performs no I/O: every
//! mutation happens under one write lock and is then announced on a broadcast
//! channel, so readers never observe a half-applied batch.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use slotsync_id::EntityId;
use slotsync_reconcile::SpaceId;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::error::SyncError;
use crate::model::{Attributes, Entity, SyncStatus};

const EVENT_CAPACITY: usize = 256;

/// Change notifications published after each mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The whole entity set was replaced.
    EntitiesReplaced { count: usize },
    EntitiesUpserted { ids: Vec<EntityId> },
    EntitiesRemoved { ids: Vec<EntityId> },
    /// Space assignments changed for these entities.
    AssignmentsChanged { ids: Vec<EntityId> },
    SyncStatusChanged { ids: Vec<EntityId>, status: SyncStatus },
}

/// Observable table of entities keyed by id.
pub struct AssignmentStore {
    entities: RwLock<BTreeMap<EntityId, Entity>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for AssignmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AssignmentStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entities: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    pub fn with_entities(entities: Vec<Entity>) -> Self {
        let mut store = Self::new();
        store.entities = RwLock::new(entities.into_iter().map(|e| (e.id, e)).collect());
        store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Snapshot of all entities, ordered by id.
    pub async fn entities(&self) -> Vec<Entity> {
        self.entities.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: EntityId) -> Option<Entity> {
        self.entities.read().await.get(&id).cloned()
    }

    /// Assigned spaces of the current entity set.
    pub async fn assigned_spaces(&self) -> Vec<SpaceId> {
        self.entities
            .read()
            .await
            .values()
            .filter_map(|e| e.assigned_space_id.clone())
            .collect()
    }

    /// Entity holding `space`, if any.
    pub async fn holder_of(&self, space: &SpaceId) -> Option<Entity> {
        self.entities
            .read()
            .await
            .values()
            .find(|e| e.assigned_space_id.as_ref() == Some(space))
            .cloned()
    }

    /// Insert or replace one entity.
    pub async fn insert(&self, entity: Entity) {
        let id = entity.id;
        self.entities.write().await.insert(id, entity);
        self.publish(StoreEvent::EntitiesUpserted { ids: vec![id] });
    }

    /// Replace an entity's attributes. The entity becomes `unsynced`.
    pub async fn update_attributes(
        &self,
        id: EntityId,
        attributes: Attributes,
    ) -> Result<Entity, SyncError> {
        let updated = {
            let mut entities = self.entities.write().await;
            let entity = entities
                .get_mut(&id)
                .ok_or_else(|| SyncError::not_found(format!("entity {id}")))?;
            entity.attributes = attributes;
            entity.sync_status = SyncStatus::Unsynced;
            entity.clone()
        };
        self.publish(StoreEvent::EntitiesUpserted { ids: vec![id] });
        Ok(updated)
    }

    pub async fn remove(&self, id: EntityId) -> Result<Entity, SyncError> {
        let removed = self
            .entities
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| SyncError::not_found(format!("entity {id}")))?;
        self.publish(StoreEvent::EntitiesRemoved { ids: vec![id] });
        Ok(removed)
    }

    /// Replace the whole entity set with one notification.
    pub async fn set_entities(&self, entities: Vec<Entity>) -> usize {
        let count = {
            let mut map = self.entities.write().await;
            *map = entities.into_iter().map(|e| (e.id, e)).collect();
            map.len()
        };
        debug!(count, "Entity set replaced");
        self.publish(StoreEvent::EntitiesReplaced { count });
        count
    }

    /// Assign `space` to an entity and return the space it held before.
    ///
    /// Pure local mutation; the entity becomes `unsynced`.
    pub async fn assign_space(
        &self,
        id: EntityId,
        space: SpaceId,
    ) -> Result<Option<SpaceId>, SyncError> {
        let previous = {
            let mut entities = self.entities.write().await;
            let entity = entities
                .get_mut(&id)
                .ok_or_else(|| SyncError::not_found(format!("entity {id}")))?;
            let previous = entity.assigned_space_id.replace(space);
            entity.sync_status = SyncStatus::Unsynced;
            previous
        };
        self.publish(StoreEvent::AssignmentsChanged { ids: vec![id] });
        Ok(previous)
    }

    /// Clear an entity's space and return it.
    pub async fn unassign_space(&self, id: EntityId) -> Result<Option<SpaceId>, SyncError> {
        let previous = {
            let mut entities = self.entities.write().await;
            let entity = entities
                .get_mut(&id)
                .ok_or_else(|| SyncError::not_found(format!("entity {id}")))?;
            let previous = entity.assigned_space_id.take();
            entity.sync_status = SyncStatus::Unsynced;
            previous
        };
        self.publish(StoreEvent::AssignmentsChanged { ids: vec![id] });
        Ok(previous)
    }

    /// Apply ordered `(entity, space)` pairs atomically.
    ///
    /// Every id is checked before anything is written. Returns the spaces the
    /// entities held before, in pair order.
    pub async fn assign_many(
        &self,
        pairs: &[(EntityId, SpaceId)],
    ) -> Result<Vec<Option<SpaceId>>, SyncError> {
        let previous = {
            let mut entities = self.entities.write().await;
            if let Some((missing, _)) = pairs.iter().find(|(id, _)| !entities.contains_key(id)) {
                return Err(SyncError::not_found(format!("entity {missing}")));
            }

            let mut previous = Vec::with_capacity(pairs.len());
            for (id, space) in pairs {
                if let Some(entity) = entities.get_mut(id) {
                    previous.push(entity.assigned_space_id.replace(space.clone()));
                    entity.sync_status = SyncStatus::Unsynced;
                }
            }
            previous
        };

        self.publish(StoreEvent::AssignmentsChanged {
            ids: pairs.iter().map(|(id, _)| *id).collect(),
        });
        Ok(previous)
    }

    /// Clear the spaces of every listed entity atomically.
    ///
    /// Returns the spaces that were released.
    pub async fn unassign_many(&self, ids: &[EntityId]) -> Result<Vec<SpaceId>, SyncError> {
        let released = {
            let mut entities = self.entities.write().await;
            if let Some(missing) = ids.iter().find(|id| !entities.contains_key(*id)) {
                return Err(SyncError::not_found(format!("entity {missing}")));
            }

            let mut released = Vec::new();
            for id in ids {
                if let Some(entity) = entities.get_mut(id) {
                    released.extend(entity.assigned_space_id.take());
                    entity.sync_status = SyncStatus::Unsynced;
                }
            }
            released
        };

        self.publish(StoreEvent::AssignmentsChanged { ids: ids.to_vec() });
        Ok(released)
    }

    /// Set the sync status of the listed entities and nothing else.
    ///
    /// Unknown ids are skipped; an entity may have been removed while its
    /// push was in flight.
    pub async fn update_sync_status(&self, ids: &[EntityId], status: SyncStatus) {
        let mut changed = Vec::with_capacity(ids.len());
        {
            let mut entities = self.entities.write().await;
            for id in ids {
                if let Some(entity) = entities.get_mut(id) {
                    entity.sync_status = status;
                    changed.push(*id);
                }
            }
        }

        if !changed.is_empty() {
            self.publish(StoreEvent::SyncStatusChanged {
                ids: changed,
                status,
            });
        }
    }

    /// Mark entities `synced` as of `at`.
    pub async fn mark_synced(&self, ids: &[EntityId], at: DateTime<Utc>) {
        let mut changed = Vec::with_capacity(ids.len());
        {
            let mut entities = self.entities.write().await;
            for id in ids {
                if let Some(entity) = entities.get_mut(id) {
                    entity.sync_status = SyncStatus::Synced;
                    entity.last_synced_at = Some(at);
                    changed.push(*id);
                }
            }
        }

        if !changed.is_empty() {
            self.publish(StoreEvent::SyncStatusChanged {
                ids: changed,
                status: SyncStatus::Synced,
            });
        }
    }

    /// Record every entity as a member of `list_name` at its current space.
    pub async fn record_membership(&self, list_name: &str) -> Vec<Entity> {
        let snapshot: Vec<Entity> = {
            let mut entities = self.entities.write().await;
            for entity in entities.values_mut() {
                let space = entity.assigned_space_id.clone();
                entity.set_membership(list_name, space);
            }
            entities.values().cloned().collect()
        };

        self.publish(StoreEvent::EntitiesUpserted {
            ids: snapshot.iter().map(|e| e.id).collect(),
        });
        snapshot
    }

    /// Drop `list_name` from every entity's memberships.
    pub async fn remove_membership(&self, list_name: &str) {
        let changed: Vec<EntityId> = {
            let mut entities = self.entities.write().await;
            entities
                .values_mut()
                .filter_map(|e| e.remove_membership(list_name).then_some(e.id))
                .collect()
        };

        if !changed.is_empty() {
            self.publish(StoreEvent::EntitiesUpserted { ids: changed });
        }
    }

    /// Number of entities per sync status.
    pub async fn status_counts(&self) -> HashMap<SyncStatus, usize> {
        let mut counts = HashMap::new();
        for entity in self.entities.read().await.values() {
            *counts.entry(entity.sync_status).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str) -> Entity {
        let mut attributes = Attributes::new();
        attributes.insert("name".to_string(), name.to_string());
        Entity::new(attributes)
    }

    #[tokio::test]
    async fn test_assign_returns_previous_space() {
        let entity = person("Dana");
        let id = entity.id;
        let store = AssignmentStore::with_entities(vec![entity]);

        assert_eq!(store.assign_space(id, SpaceId::from(1u32)).await.unwrap(), None);
        assert_eq!(
            store.assign_space(id, SpaceId::from(2u32)).await.unwrap(),
            Some(SpaceId::from(1u32))
        );
        assert_eq!(store.assigned_spaces().await, vec![SpaceId::from(2u32)]);
        assert_eq!(store.get(id).await.unwrap().sync_status, SyncStatus::Unsynced);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_not_found() {
        let store = AssignmentStore::new();
        let err = store
            .assign_space(EntityId::new(), SpaceId::from(1u32))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_assign_many_validates_before_writing() {
        let known = person("Avi");
        let known_id = known.id;
        let store = AssignmentStore::with_entities(vec![known]);
        let mut events = store.subscribe();

        let pairs = vec![
            (known_id, SpaceId::from(1u32)),
            (EntityId::new(), SpaceId::from(2u32)),
        ];
        assert!(store.assign_many(&pairs).await.is_err());

        assert!(store.assigned_spaces().await.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_sync_status_changes_only_status() {
        let entity = person("Noa").assigned_to(SpaceId::from(3u32));
        let id = entity.id;
        let store = AssignmentStore::with_entities(vec![entity.clone()]);
        let mut events = store.subscribe();

        store.update_sync_status(&[id], SyncStatus::Error).await;

        let after = store.get(id).await.unwrap();
        assert_eq!(after.sync_status, SyncStatus::Error);
        assert_eq!(after.attributes, entity.attributes);
        assert_eq!(after.assigned_space_id, entity.assigned_space_id);
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::SyncStatusChanged {
                ids: vec![id],
                status: SyncStatus::Error
            }
        );
    }

    #[tokio::test]
    async fn test_set_entities_publishes_once() {
        let store = AssignmentStore::new();
        let mut events = store.subscribe();

        store
            .set_entities(vec![person("a"), person("b"), person("c")])
            .await;

        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::EntitiesReplaced { count: 3 }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_record_and_remove_membership() {
        let a = person("a").assigned_to(SpaceId::from(1u32));
        let b = person("b");
        let store = AssignmentStore::with_entities(vec![a.clone(), b.clone()]);

        store.record_membership("morning").await;
        let a_after = store.get(a.id).await.unwrap();
        assert_eq!(
            a_after.membership("morning").unwrap().space_id,
            Some(SpaceId::from(1u32))
        );
        assert!(store.get(b.id).await.unwrap().membership("morning").is_some());

        store.remove_membership("morning").await;
        assert!(store.get(a.id).await.unwrap().memberships().is_empty());
    }
}

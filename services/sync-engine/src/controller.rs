//! Assignment controller.
//!
//! Orchestrates every operation that touches both the local store and the
//! remote service:
//!
//! 1. validate (capacity, pool membership, conflicts) with nothing mutated
//! 2. mutate the store optimistically
//! 3. mark affected entities `pending` and push, with retry
//! 4. settle each entity at `synced` or `error`
//!
//! Vacating old spaces is best-effort and reported through [`CleanupReport`];
//! only the primary push decides whether an operation failed. Blanks that
//! fail stay pending until a retry or a mass cancel re-issues them.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use slotsync_id::{EntityId, ListId};
use slotsync_reconcile::{CapacityPool, PoolSnapshot, ReconcilePlan, SpaceId};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::client::{article_to_entity, LabelService};
use crate::error::{CleanupReport, CleanupStep, SyncError};
use crate::lists::{validate_list_name, SavedList};
use crate::model::{Attributes, Entity, SyncStatus};
use crate::persist::EngineState;
use crate::retry::RetryPolicy;
use crate::store::{AssignmentStore, StoreEvent};

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub total_spaces: u32,
    pub page_size: u32,
    pub virtual_pool_prefix: String,
    /// Attribute keys that mark a remote article as occupied.
    pub identifying_fields: Vec<String>,
    pub retry: RetryPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            total_spaces: 0,
            page_size: 100,
            virtual_pool_prefix: "POOL-".to_string(),
            identifying_fields: vec!["name".to_string()],
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a single assignment.
#[derive(Debug, Clone)]
pub struct AssignOutcome {
    pub entity: Entity,
    pub cleanup: CleanupReport,
}

/// Result of a bulk assignment.
#[derive(Debug, Clone, Default)]
pub struct BulkOutcome {
    pub assigned: Vec<(EntityId, SpaceId)>,
    pub cleanup: CleanupReport,
}

/// Result of switching to a saved list.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub plan: ReconcilePlan,
    /// Entities pushed after the switch.
    pub pushed: usize,
    pub cleanup: CleanupReport,
}

/// Owns the assignment state and keeps the remote service in step with it.
pub struct AssignmentController {
    store: AssignmentStore,
    remote: Arc<dyn LabelService>,
    pool: RwLock<CapacityPool>,
    lists: RwLock<Vec<SavedList>>,
    active_list: RwLock<Option<ListId>>,
    /// Spaces whose remote blank failed and has not been re-issued yet.
    pending_clears: RwLock<BTreeSet<SpaceId>>,
    state: Option<EngineState>,
    config: ControllerConfig,
}

impl AssignmentController {
    /// Controller with an empty entity set and no durable state.
    pub fn new(remote: Arc<dyn LabelService>, config: ControllerConfig) -> Self {
        Self {
            store: AssignmentStore::new(),
            remote,
            pool: RwLock::new(CapacityPool::new(config.total_spaces)),
            lists: RwLock::new(Vec::new()),
            active_list: RwLock::new(None),
            pending_clears: RwLock::new(BTreeSet::new()),
            state: None,
            config,
        }
    }

    /// Controller restored from durable state, writing back to it.
    pub fn restore(
        remote: Arc<dyn LabelService>,
        config: ControllerConfig,
        state: EngineState,
    ) -> Result<Self, SyncError> {
        let persisted = state.load()?;
        info!(
            entities = persisted.entities.len(),
            lists = persisted.lists.len(),
            active_list_id = ?persisted.active_list_id,
            pending_clears = persisted.pending_clears.len(),
            "Restored engine state"
        );

        Ok(Self {
            store: AssignmentStore::with_entities(persisted.entities),
            remote,
            pool: RwLock::new(CapacityPool::new(config.total_spaces)),
            lists: RwLock::new(persisted.lists),
            active_list: RwLock::new(persisted.active_list_id),
            pending_clears: RwLock::new(persisted.pending_clears.into_iter().collect()),
            state: Some(state),
            config,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub async fn entities(&self) -> Vec<Entity> {
        self.store.entities().await
    }

    pub async fn entity(&self, id: EntityId) -> Option<Entity> {
        self.store.get(id).await
    }

    pub async fn lists(&self) -> Vec<SavedList> {
        self.lists.read().await.clone()
    }

    pub async fn active_list_id(&self) -> Option<ListId> {
        *self.active_list.read().await
    }

    /// Current totals for the active entity set.
    pub async fn capacity(&self) -> PoolSnapshot {
        let pool = *self.pool.read().await;
        let entities = self.store.entities().await;
        pool.snapshot(entities.iter().map(|e| e.assigned_space_id.as_ref()))
    }

    /// Spaces still waiting for a remote blank, in space order.
    pub async fn pending_clears(&self) -> Vec<SpaceId> {
        self.pending_clears.read().await.iter().cloned().collect()
    }

    /// Number of entities per sync status.
    pub async fn status_counts(&self) -> HashMap<SyncStatus, usize> {
        self.store.status_counts().await
    }

    /// Resize the pool. Shrinking below what is assigned is rejected.
    pub async fn set_total_spaces(&self, total_spaces: u32) -> Result<PoolSnapshot, SyncError> {
        let assigned = self.store.assigned_spaces().await;
        let resized = CapacityPool::new(total_spaces);

        let assigned_count = u32::try_from(assigned.len()).unwrap_or(u32::MAX);
        if assigned_count > total_spaces {
            return Err(SyncError::CapacityExceeded {
                requested: assigned_count,
                available: total_spaces,
            });
        }
        if let Some(outside) = assigned.iter().find(|s| !resized.contains(s)) {
            return Err(SyncError::validation(format!(
                "space {outside} is assigned and outside 1..={total_spaces}"
            )));
        }

        *self.pool.write().await = resized;
        info!(total_spaces, "Capacity pool resized");
        Ok(self.capacity().await)
    }

    /// Add a local entity. It starts unassigned and `unsynced`.
    pub async fn add_entity(&self, attributes: Attributes) -> Entity {
        let entity = Entity::new(attributes);
        self.store.insert(entity.clone()).await;
        debug!(entity_id = %entity.id, "Entity added");
        self.persist_entities_best_effort(&mut CleanupReport::default())
            .await;
        entity
    }

    /// Replace an entity's attributes. The entity becomes `unsynced`.
    pub async fn update_attributes(
        &self,
        id: EntityId,
        attributes: Attributes,
    ) -> Result<Entity, SyncError> {
        let entity = self.store.update_attributes(id, attributes).await?;
        self.persist_entities_best_effort(&mut CleanupReport::default())
            .await;
        Ok(entity)
    }

    /// Delete an entity, vacating its space remotely on a best-effort basis.
    pub async fn delete_entity(&self, id: EntityId) -> Result<CleanupReport, SyncError> {
        let entity = self.require(id).await?;
        let mut cleanup = CleanupReport::default();

        if let Some(space) = &entity.assigned_space_id {
            self.clear_previous(space, &entity, &mut cleanup).await;
        }

        self.store.remove(id).await?;
        info!(entity_id = %id, "Entity deleted");
        self.persist_entities_best_effort(&mut cleanup).await;
        Ok(cleanup)
    }

    /// Assign `space` to one entity.
    ///
    /// A different space the entity held before is vacated first on a
    /// best-effort basis. With `push` unset the change stays local and the
    /// entity ends `unsynced`. A failed push leaves the local assignment in
    /// place, marks the entity `error` and returns the error.
    pub async fn assign_space_to_person(
        &self,
        id: EntityId,
        space: SpaceId,
        push: bool,
    ) -> Result<AssignOutcome, SyncError> {
        let entity = self.require(id).await?;
        let pool = *self.pool.read().await;
        self.check_space(&pool, &space, &[id]).await?;

        if entity.assigned_space_id.is_none() {
            let snapshot = self.capacity().await;
            pool.ensure_room(&snapshot, 1)?;
        }

        let mut cleanup = CleanupReport::default();
        let previous = entity
            .assigned_space_id
            .clone()
            .filter(|held| *held != space);

        if push {
            if let Some(previous) = &previous {
                self.clear_previous(previous, &entity, &mut cleanup).await;
            }
        }

        self.store.assign_space(id, space.clone()).await?;
        info!(entity_id = %id, space_id = %space, previous = ?previous, push, "Space assigned");

        let pushed = if push {
            self.push_tracked(&[id], false).await
        } else {
            Ok(())
        };

        self.persist_entities_best_effort(&mut cleanup).await;
        pushed?;

        let entity = self.require(id).await?;
        Ok(AssignOutcome { entity, cleanup })
    }

    /// Clear one entity's space.
    ///
    /// The entity is `synced` when the remote clear succeeded and `unsynced`
    /// otherwise. A failed clear stays pending until [`Self::retry_failed`]
    /// or [`Self::cancel_all_assignments`] re-issues it.
    pub async fn unassign_space(&self, id: EntityId, push: bool) -> Result<CleanupReport, SyncError> {
        let entity = self.require(id).await?;
        let mut cleanup = CleanupReport::default();

        let Some(space) = entity.assigned_space_id.clone() else {
            return Ok(cleanup);
        };

        let cleared = push && self.clear_previous(&space, &entity, &mut cleanup).await;

        self.store.unassign_space(id).await?;
        if cleared {
            self.store.mark_synced(&[id], Utc::now()).await;
        }
        info!(entity_id = %id, space_id = %space, cleared, "Space unassigned");

        self.persist_entities_best_effort(&mut cleanup).await;
        Ok(cleanup)
    }

    /// Apply ordered `(entity, space)` pairs as one batch.
    ///
    /// Capacity is checked first; a shortfall aborts with nothing changed.
    /// All pairs are applied together and pushed with a single batch call,
    /// so every entity ends `synced` or every entity ends `error`.
    pub async fn bulk_assign_spaces(
        &self,
        pairs: Vec<(EntityId, SpaceId)>,
        push: bool,
    ) -> Result<BulkOutcome, SyncError> {
        if pairs.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let pool = *self.pool.read().await;
        let current: HashMap<EntityId, Entity> = self
            .store
            .entities()
            .await
            .into_iter()
            .map(|e| (e.id, e))
            .collect();

        let newly_assigned = pairs
            .iter()
            .filter(|(id, _)| current.get(id).is_none_or(|e| e.assigned_space_id.is_none()))
            .count();
        let snapshot = pool.snapshot(current.values().map(|e| e.assigned_space_id.as_ref()));
        pool.ensure_room(&snapshot, newly_assigned)?;

        let batch_ids: Vec<EntityId> = pairs.iter().map(|(id, _)| *id).collect();
        self.validate_batch(&pool, &pairs, &current)?;

        let targets: HashSet<&SpaceId> = pairs.iter().map(|(_, space)| space).collect();
        let vacated: Vec<SpaceId> = batch_ids
            .iter()
            .filter_map(|id| current.get(id)?.assigned_space_id.clone())
            .filter(|held| !targets.contains(held))
            .collect();

        let mut cleanup = CleanupReport::default();
        if push && !vacated.is_empty() {
            match self.remote.clear_many(&vacated).await {
                Ok(()) => self.settle_clears(&vacated, &mut cleanup).await,
                Err(e) => {
                    warn!(spaces = ?vacated, error = %e, "Failed to vacate previous spaces");
                    cleanup.warn(CleanupStep::ClearPreviousSpace, vacated.clone(), e.to_string());
                    self.defer_clears(&vacated, &mut cleanup).await;
                }
            }
        }

        self.store.assign_many(&pairs).await?;
        info!(count = pairs.len(), push, "Bulk assignment applied");

        let pushed = if push {
            self.push_tracked(&batch_ids, true).await
        } else {
            Ok(())
        };

        self.persist_entities_best_effort(&mut cleanup).await;
        pushed?;

        Ok(BulkOutcome {
            assigned: pairs,
            cleanup,
        })
    }

    /// Give each listed entity without a space the lowest free space.
    pub async fn assign_next_available(
        &self,
        ids: &[EntityId],
        push: bool,
    ) -> Result<BulkOutcome, SyncError> {
        let entities = self.store.entities().await;
        let known: HashMap<EntityId, &Entity> = entities.iter().map(|e| (e.id, e)).collect();

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for id in ids {
            let entity = known
                .get(id)
                .ok_or_else(|| SyncError::not_found(format!("entity {id}")))?;
            if entity.assigned_space_id.is_none() && seen.insert(*id) {
                targets.push(*id);
            }
        }

        if targets.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let pool = *self.pool.read().await;
        let spaces = pool.next_available_space_ids(
            entities.iter().filter_map(|e| e.assigned_space_id.as_ref()),
            targets.len(),
        )?;

        let pairs = targets.into_iter().zip(spaces).collect();
        self.bulk_assign_spaces(pairs, push).await
    }

    /// Blank every assigned space remotely, then clear all assignments locally.
    ///
    /// Spaces whose earlier blank failed are blanked in the same call. The
    /// local clear happens whatever the remote outcome. Entities end `synced`
    /// when the remote blanking succeeded and `error` otherwise; the failed
    /// spaces stay pending.
    pub async fn cancel_all_assignments(&self) -> Result<CleanupReport, SyncError> {
        let mut cleanup = CleanupReport::default();
        let (ids, assigned): (Vec<EntityId>, Vec<SpaceId>) = self
            .store
            .entities()
            .await
            .into_iter()
            .filter_map(|e| Some((e.id, e.assigned_space_id?)))
            .unzip();

        let mut spaces: BTreeSet<SpaceId> = assigned.into_iter().collect();
        spaces.extend(self.pending_clears.read().await.iter().cloned());
        if spaces.is_empty() {
            return Ok(cleanup);
        }
        let spaces: Vec<SpaceId> = spaces.into_iter().collect();

        let remote_ok = match self.remote.clear_many(&spaces).await {
            Ok(()) => {
                self.settle_clears(&spaces, &mut cleanup).await;
                true
            }
            Err(e) => {
                warn!(count = spaces.len(), error = %e, "Failed to blank assigned spaces");
                cleanup.warn(CleanupStep::BlankAssignments, spaces.clone(), e.to_string());
                self.defer_clears(&spaces, &mut cleanup).await;
                false
            }
        };

        if !ids.is_empty() {
            self.store.unassign_many(&ids).await?;
        }
        if remote_ok {
            self.store.mark_synced(&ids, Utc::now()).await;
            self.settle_stranded().await;
        } else {
            self.store.update_sync_status(&ids, SyncStatus::Error).await;
        }
        info!(count = ids.len(), spaces = spaces.len(), remote_ok, "All assignments cancelled");

        self.persist_entities_best_effort(&mut cleanup).await;
        Ok(cleanup)
    }

    /// Replace the local entity set with the remote one.
    ///
    /// Pages are fetched until a short page. Nothing local changes unless
    /// every page arrived. List memberships of entities that survive the pull
    /// are kept. Articles sharing an entity id are split so every id is
    /// stored once. Returns the number of entities stored.
    pub async fn sync_from_remote(&self) -> Result<usize, SyncError> {
        let page_size = self.config.page_size.max(1);
        let mut articles = Vec::new();
        let mut cursor = 0u32;

        loop {
            let page = self
                .config
                .retry
                .run("fetch_page", || self.remote.fetch_page(cursor, page_size))
                .await?;
            let received = page.len();
            articles.extend(page);

            if received < page_size as usize {
                break;
            }
            cursor += 1;
        }

        let now = Utc::now();
        let previous: HashMap<EntityId, Entity> = self
            .store
            .entities()
            .await
            .into_iter()
            .map(|e| (e.id, e))
            .collect();

        let pulled: Vec<Entity> = articles
            .into_iter()
            .filter_map(|article| {
                article_to_entity(
                    article,
                    &self.config.identifying_fields,
                    &self.config.virtual_pool_prefix,
                    now,
                )
            })
            .collect();

        let entities: Vec<Entity> = split_duplicate_ids(pulled, &previous)
            .into_iter()
            .map(|mut entity| {
                if let Some(before) = previous.get(&entity.id) {
                    for membership in before.memberships() {
                        entity.set_membership(&membership.list_name, membership.space_id.clone());
                    }
                }
                entity
            })
            .collect();

        let count = self.store.set_entities(entities).await;
        *self.active_list.write().await = None;
        info!(count, pages = cursor + 1, "Pulled entities from remote");

        let mut cleanup = CleanupReport::default();
        self.persist_entities_best_effort(&mut cleanup).await;
        if let Some(state) = &self.state {
            if let Err(e) = state.save_active_list(None) {
                warn!(error = %e, "Failed to persist active list");
            }
        }
        Ok(count)
    }

    /// Re-issue blanks that never reached the remote, then push every
    /// addressable entity in `error` again.
    ///
    /// Unassigned entities left in `error` by a failed blank return to
    /// `synced` once no blank is pending. Returns how many entities were
    /// retried or settled.
    pub async fn retry_failed(&self) -> Result<usize, SyncError> {
        let mut cleanup = CleanupReport::default();
        let flushed = self.flush_pending_clears(&mut cleanup).await;

        let ids: Vec<EntityId> = self
            .store
            .entities()
            .await
            .into_iter()
            .filter(|e| e.sync_status == SyncStatus::Error && e.remote_key().is_some())
            .map(|e| e.id)
            .collect();

        let pushed = self.push_tracked(&ids, true).await;
        let settled = if flushed.is_ok() {
            self.settle_stranded().await
        } else {
            0
        };

        self.persist_entities_best_effort(&mut cleanup).await;
        flushed?;
        pushed?;
        Ok(ids.len() + settled)
    }

    /// Save the active entity set as a new list and make it active.
    pub async fn save_list(&self, display_name: &str) -> Result<SavedList, SyncError> {
        let display_name = validate_list_name(display_name)?;
        let storage_name = crate::lists::storage_name(&display_name);

        if self
            .lists
            .read()
            .await
            .iter()
            .any(|l| l.storage_name == storage_name)
        {
            return Err(SyncError::validation(format!(
                "a list named {display_name:?} already exists"
            )));
        }

        let snapshot = self.store.record_membership(&storage_name).await;
        let list = SavedList::new(&display_name, snapshot, Utc::now())?;

        self.lists.write().await.push(list.clone());
        *self.active_list.write().await = Some(list.id);
        info!(list_id = %list.id, name = %list.display_name, entities = list.entities.len(), "List saved");

        self.persist_lists().await?;
        Ok(list)
    }

    /// Overwrite a saved list with the active entity set.
    pub async fn update_list(&self, list_id: ListId) -> Result<SavedList, SyncError> {
        let storage_name = self.require_list(list_id).await?.storage_name;
        let snapshot = self.store.record_membership(&storage_name).await;

        let updated = {
            let mut lists = self.lists.write().await;
            let list = lists
                .iter_mut()
                .find(|l| l.id == list_id)
                .ok_or_else(|| SyncError::not_found(format!("list {list_id}")))?;
            list.entities = snapshot;
            list.updated_at = Some(Utc::now());
            list.clone()
        };
        info!(list_id = %list_id, entities = updated.entities.len(), "List updated");

        self.persist_lists().await?;
        Ok(updated)
    }

    /// Delete a saved list and drop its memberships from the active set.
    pub async fn delete_list(&self, list_id: ListId) -> Result<(), SyncError> {
        let removed = {
            let mut lists = self.lists.write().await;
            let index = lists
                .iter()
                .position(|l| l.id == list_id)
                .ok_or_else(|| SyncError::not_found(format!("list {list_id}")))?;
            lists.remove(index)
        };

        self.store.remove_membership(&removed.storage_name).await;
        {
            let mut active = self.active_list.write().await;
            if *active == Some(list_id) {
                *active = None;
            }
        }
        info!(list_id = %list_id, "List deleted");

        self.persist_lists().await
    }

    /// Make a saved list the active entity set and reconcile the remote.
    ///
    /// Spaces held now but not by the list are blanked (best-effort), the
    /// local set is replaced, then every assigned list entity is pushed.
    pub async fn load_list(&self, list_id: ListId) -> Result<LoadOutcome, SyncError> {
        let list = self.require_list(list_id).await?;

        let pool = *self.pool.read().await;
        let incoming = list.entities.iter().filter(|e| e.is_assigned()).count();
        pool.ensure_room(&pool.snapshot(std::iter::empty::<Option<&SpaceId>>()), incoming)?;
        if let Some(outside) = list.assigned_spaces().find(|s| !pool.contains(s)) {
            return Err(SyncError::validation(format!(
                "list {} holds space {outside}, outside 1..={}",
                list.display_name,
                pool.total_spaces()
            )));
        }

        let current = self.store.assigned_spaces().await;
        let plan = ReconcilePlan::between(current, list.assigned_spaces());
        debug!(
            to_clear = plan.to_clear.len(),
            to_push = plan.to_push.len(),
            retained = plan.retained.len(),
            "List reconciliation planned"
        );

        let mut cleanup = CleanupReport::default();
        let to_clear: Vec<SpaceId> = plan.to_clear.iter().cloned().collect();
        if !to_clear.is_empty() {
            match self.remote.clear_many(&to_clear).await {
                Ok(()) => self.settle_clears(&to_clear, &mut cleanup).await,
                Err(e) => {
                    warn!(spaces = ?to_clear, error = %e, "Failed to clear spaces not used by list");
                    cleanup.warn(CleanupStep::ClearObsoleteSpaces, to_clear.clone(), e.to_string());
                    self.defer_clears(&to_clear, &mut cleanup).await;
                }
            }
        }

        let push_ids: Vec<EntityId> = list
            .entities
            .iter()
            .filter(|e| e.is_assigned())
            .map(|e| e.id)
            .collect();

        self.store.set_entities(list.entities.clone()).await;
        *self.active_list.write().await = Some(list_id);
        info!(list_id = %list_id, entities = list.entities.len(), "List loaded");

        let pushed = self.push_tracked(&push_ids, true).await;

        self.persist_entities_best_effort(&mut cleanup).await;
        if let Some(state) = &self.state {
            if let Err(e) = state.save_active_list(Some(list_id)) {
                warn!(error = %e, "Failed to persist active list");
                cleanup.warn(CleanupStep::PersistState, Vec::new(), e.to_string());
            }
        }
        pushed?;

        Ok(LoadOutcome {
            plan,
            pushed: push_ids.len(),
            cleanup,
        })
    }

    async fn require(&self, id: EntityId) -> Result<Entity, SyncError> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| SyncError::not_found(format!("entity {id}")))
    }

    async fn require_list(&self, id: ListId) -> Result<SavedList, SyncError> {
        self.lists
            .read()
            .await
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("list {id}")))
    }

    /// Reject a space outside the pool or held by an entity not in `movers`.
    async fn check_space(
        &self,
        pool: &CapacityPool,
        space: &SpaceId,
        movers: &[EntityId],
    ) -> Result<(), SyncError> {
        if !pool.contains(space) {
            return Err(SyncError::validation(format!(
                "space {space} is outside 1..={}",
                pool.total_spaces()
            )));
        }
        if let Some(holder) = self.store.holder_of(space).await {
            if !movers.contains(&holder.id) {
                return Err(SyncError::validation(format!(
                    "space {space} is held by {}",
                    holder.id
                )));
            }
        }
        Ok(())
    }

    fn validate_batch(
        &self,
        pool: &CapacityPool,
        pairs: &[(EntityId, SpaceId)],
        current: &HashMap<EntityId, Entity>,
    ) -> Result<(), SyncError> {
        let batch: HashSet<EntityId> = pairs.iter().map(|(id, _)| *id).collect();
        if batch.len() != pairs.len() {
            return Err(SyncError::validation("an entity appears twice in the batch"));
        }

        let mut spaces = HashSet::new();
        for (id, space) in pairs {
            if !current.contains_key(id) {
                return Err(SyncError::not_found(format!("entity {id}")));
            }
            if !pool.contains(space) {
                return Err(SyncError::validation(format!(
                    "space {space} is outside 1..={}",
                    pool.total_spaces()
                )));
            }
            if !spaces.insert(space) {
                return Err(SyncError::validation(format!(
                    "space {space} appears twice in the batch"
                )));
            }
        }

        for holder in current.values() {
            if let Some(held) = &holder.assigned_space_id {
                if spaces.contains(held) && !batch.contains(&holder.id) {
                    return Err(SyncError::validation(format!(
                        "space {held} is held by {}",
                        holder.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Best-effort clear of a space an entity is leaving. Returns true on
    /// success.
    async fn clear_previous(&self, space: &SpaceId, entity: &Entity, cleanup: &mut CleanupReport) -> bool {
        match self.remote.clear_one(space, Some(entity)).await {
            Ok(()) => {
                self.settle_clears(std::slice::from_ref(space), cleanup).await;
                true
            }
            Err(e) => {
                warn!(entity_id = %entity.id, space_id = %space, error = %e, "Failed to clear previous space");
                cleanup.warn(CleanupStep::ClearPreviousSpace, vec![space.clone()], e.to_string());
                self.defer_clears(std::slice::from_ref(space), cleanup).await;
                false
            }
        }
    }

    /// Remember spaces whose blank did not reach the remote.
    async fn defer_clears(&self, spaces: &[SpaceId], cleanup: &mut CleanupReport) {
        self.pending_clears
            .write()
            .await
            .extend(spaces.iter().cloned());
        self.persist_pending_best_effort(cleanup).await;
    }

    /// Forget spaces the remote has confirmed blank.
    async fn settle_clears(&self, spaces: &[SpaceId], cleanup: &mut CleanupReport) {
        let changed = {
            let mut pending = self.pending_clears.write().await;
            spaces.iter().fold(false, |changed, space| pending.remove(space) || changed)
        };
        if changed {
            self.persist_pending_best_effort(cleanup).await;
        }
    }

    /// Blank every pending space that is not assigned again, with retry.
    async fn flush_pending_clears(&self, cleanup: &mut CleanupReport) -> Result<(), SyncError> {
        let assigned: HashSet<SpaceId> = self.store.assigned_spaces().await.into_iter().collect();
        let spaces: Vec<SpaceId> = {
            let mut pending = self.pending_clears.write().await;
            // The next push to an assigned space overwrites it.
            pending.retain(|space| !assigned.contains(space));
            pending.iter().cloned().collect()
        };
        if spaces.is_empty() {
            self.persist_pending_best_effort(cleanup).await;
            return Ok(());
        }

        info!(count = spaces.len(), "Re-issuing pending clears");
        if let Err(e) = self
            .config
            .retry
            .run("clear_many", || self.remote.clear_many(&spaces))
            .await
        {
            error!(count = spaces.len(), error = %e, "Pending clears failed again");
            self.persist_pending_best_effort(cleanup).await;
            return Err(e.into());
        }

        self.settle_clears(&spaces, cleanup).await;
        Ok(())
    }

    /// Mark unassigned entities left in `error` by a failed blank as `synced`.
    /// Does nothing while a blank is still pending.
    async fn settle_stranded(&self) -> usize {
        if !self.pending_clears.read().await.is_empty() {
            return 0;
        }

        let ids: Vec<EntityId> = self
            .store
            .entities()
            .await
            .into_iter()
            .filter(|e| e.sync_status == SyncStatus::Error && e.remote_key().is_none())
            .map(|e| e.id)
            .collect();
        if !ids.is_empty() {
            self.store.mark_synced(&ids, Utc::now()).await;
            info!(count = ids.len(), "Settled entities after pending clears");
        }
        ids.len()
    }

    /// Mark `ids` pending, push them with retry, and settle their status.
    ///
    /// `batch` selects one `push_many` call instead of `push_one`.
    async fn push_tracked(&self, ids: &[EntityId], batch: bool) -> Result<(), SyncError> {
        if ids.is_empty() {
            return Ok(());
        }

        self.store.update_sync_status(ids, SyncStatus::Pending).await;

        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            entities.push(self.require(*id).await?);
        }

        let result = match (batch, entities.as_slice()) {
            (false, [entity]) => {
                self.config
                    .retry
                    .run("push_one", || self.remote.push_one(entity))
                    .await
            }
            _ => {
                self.config
                    .retry
                    .run("push_many", || self.remote.push_many(&entities))
                    .await
            }
        };

        match result {
            Ok(()) => {
                self.store.mark_synced(ids, Utc::now()).await;
                Ok(())
            }
            Err(e) => {
                error!(count = ids.len(), error = %e, "Push failed");
                self.store.update_sync_status(ids, SyncStatus::Error).await;
                Err(e.into())
            }
        }
    }

    async fn persist_entities_best_effort(&self, cleanup: &mut CleanupReport) {
        let Some(state) = &self.state else {
            return;
        };
        let entities = self.store.entities().await;
        if let Err(e) = state.save_entities(&entities) {
            warn!(error = %e, "Failed to persist entities");
            cleanup.warn(CleanupStep::PersistState, Vec::new(), e.to_string());
        }
    }

    async fn persist_pending_best_effort(&self, cleanup: &mut CleanupReport) {
        let Some(state) = &self.state else {
            return;
        };
        let spaces: Vec<SpaceId> = self.pending_clears.read().await.iter().cloned().collect();
        if let Err(e) = state.save_pending_clears(&spaces) {
            warn!(error = %e, "Failed to persist pending clears");
            cleanup.warn(CleanupStep::PersistState, Vec::new(), e.to_string());
        }
    }

    async fn persist_lists(&self) -> Result<(), SyncError> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        state.save_lists(&self.lists.read().await)?;
        state.save_active_list(*self.active_list.read().await)?;
        state.save_entities(&self.store.entities().await)?;
        Ok(())
    }
}

/// Keep one article per entity id and give every other copy a fresh id.
///
/// The kept copy is the one at the entity's current local space, otherwise
/// the first in fetch order. Re-keyed copies end `error` so the next
/// [`AssignmentController::retry_failed`] writes their new id back.
fn split_duplicate_ids(mut pulled: Vec<Entity>, previous: &HashMap<EntityId, Entity>) -> Vec<Entity> {
    let mut kept: HashMap<EntityId, usize> = HashMap::new();

    for index in 0..pulled.len() {
        let id = pulled[index].id;
        let Some(&first) = kept.get(&id) else {
            kept.insert(id, index);
            continue;
        };

        let local_key = previous.get(&id).and_then(Entity::remote_key);
        let duplicate = if local_key.is_some()
            && pulled[index].remote_key() == local_key
            && pulled[first].remote_key() != local_key
        {
            kept.insert(id, index);
            first
        } else {
            index
        };

        let entity = &mut pulled[duplicate];
        entity.id = EntityId::new();
        entity.sync_status = SyncStatus::Error;
        warn!(
            entity_id = %id,
            remote_key = ?entity.remote_key(),
            new_entity_id = %entity.id,
            "Article repeats an entity id, re-keyed"
        );
    }

    pulled
}

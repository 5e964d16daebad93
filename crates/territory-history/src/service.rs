//! The history service: public entry points of the engine.
//!
//! Every mutating call opens one store transaction, locks the area, does
//! its read-compute-write, and commits. Any error before the commit drops
//! the transaction, so no partial change to entities, log, stacks, or
//! versions is ever visible.

use std::collections::BTreeMap;

use chrono::Utc;
use territory_types::{
    Area, AreaId, AreaState, ChangeInput, ChangeRecord, HistoryFilter, NewArea, RestoreOptions,
    RestoreResult, UndoRedoStatus, VersionDiff, VersionInput, VersionSnapshot,
};
use tracing::{debug, info, warn};

use crate::applier::{self, Direction};
use crate::change_log;
use crate::error::HistoryError;
use crate::stack::UndoRedoStack;
use crate::state::{EntityMutation, WorkingState};
use crate::store::{self, HistoryStore, StoreTx};
use crate::version;

/// Change tracking, undo/redo, and versioning over a [`HistoryStore`].
#[derive(Debug, Clone)]
pub struct HistoryService<S> {
    store: S,
}

impl<S: HistoryStore> HistoryService<S> {
    /// Wrap a store.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Areas
    // -----------------------------------------------------------------------

    /// Create an empty area with no versions.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidInput`] for a blank name or
    /// granularity, or a store error.
    pub async fn create_area(&self, input: NewArea) -> Result<Area, HistoryError> {
        if input.name.trim().is_empty() {
            return Err(HistoryError::InvalidInput(String::from(
                "area name must not be empty",
            )));
        }
        if input.granularity.trim().is_empty() {
            return Err(HistoryError::InvalidInput(String::from(
                "granularity must not be empty",
            )));
        }

        let area = Area::new(input);
        let mut tx = self.store.begin().await?;
        tx.insert_area(&area).await?;
        tx.commit().await?;

        info!(area_id = %area.id, name = %area.name, "Area created");
        Ok(area)
    }

    /// The area with its layers and postal codes.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::AreaNotFound`] or a store error.
    pub async fn area_state(&self, area_id: AreaId) -> Result<AreaState, HistoryError> {
        let mut tx = self.store.begin().await?;
        let area = tx
            .area(area_id)
            .await?
            .ok_or(HistoryError::AreaNotFound(area_id))?;
        let layers = tx.load_layers(area_id).await?;
        Ok(WorkingState::new(area, layers).into_area_state())
    }

    /// Delete an area with its layers, history, stacks, and versions.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::AreaNotFound`] or a store error.
    pub async fn delete_area(&self, area_id: AreaId) -> Result<(), HistoryError> {
        let mut tx = self.store.begin().await?;
        if !tx.delete_area(area_id).await? {
            return Err(HistoryError::AreaNotFound(area_id));
        }
        tx.commit().await?;

        info!(area_id = %area_id, "Area deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Change log
    // -----------------------------------------------------------------------

    /// Append a change whose effect the caller has already applied.
    ///
    /// The record is scoped to the area's active version (or left
    /// unversioned), gets the next sequence number in that scope, and is
    /// pushed on the undo stack, which clears the redo stack.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidInput`], [`HistoryError::AreaNotFound`],
    /// or a store error.
    pub async fn record_change(
        &self,
        area_id: AreaId,
        input: ChangeInput,
    ) -> Result<ChangeRecord, HistoryError> {
        applier::validate(area_id, &input.payload)?;

        let mut tx = self.store.begin().await?;
        let area = tx
            .lock_area(area_id)
            .await?
            .ok_or(HistoryError::AreaNotFound(area_id))?;
        let record = append(&mut tx, &area, input).await?;
        tx.commit().await?;

        debug!(
            area_id = %area_id,
            change_id = %record.id,
            change_type = %record.change_type(),
            sequence = record.sequence_number,
            "Change recorded"
        );
        Ok(record)
    }

    /// Apply a change's forward effect and record it, in one transaction.
    ///
    /// The recorded reverse data is taken from the live state, not from the
    /// caller's payload, so undo restores exactly what the change replaced.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::LayerNotFound`] when the targeted layer does
    /// not exist, [`HistoryError::InvalidInput`] when the change conflicts
    /// with the live state (e.g. creating a layer that exists, or reusing
    /// another area's layer id), or any error of
    /// [`HistoryService::record_change`].
    pub async fn apply_change(
        &self,
        area_id: AreaId,
        input: ChangeInput,
    ) -> Result<ChangeRecord, HistoryError> {
        applier::validate(area_id, &input.payload)?;

        let mut tx = self.store.begin().await?;
        let state = store::lock_state(&mut tx, area_id).await?;
        let target = input.payload.layer_id();
        let rejected = |e: HistoryError| match target {
            Some(layer_id) if state.layer(layer_id).is_none() => {
                HistoryError::LayerNotFound(layer_id)
            }
            _ => HistoryError::InvalidInput(e.to_string()),
        };

        let payload = applier::with_live_reverse(&state, input.payload).map_err(rejected)?;
        let plan = applier::plan(&state, &payload, Direction::Forward).map_err(rejected)?;
        if let Some(layer_id) = store::foreign_layer(&mut tx, area_id, &plan).await? {
            return Err(HistoryError::InvalidInput(format!(
                "layer id {layer_id} is already used by another area"
            )));
        }
        store::apply_all(&mut tx, area_id, &plan).await?;
        let input = ChangeInput {
            payload,
            created_by: input.created_by,
        };
        let record = append(&mut tx, &state.area, input).await?;
        tx.commit().await?;

        debug!(
            area_id = %area_id,
            change_id = %record.id,
            change_type = %record.change_type(),
            writes = plan.len(),
            "Change applied"
        );
        Ok(record)
    }

    /// Query the area's change log.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::AreaNotFound`] or a store error.
    pub async fn history(
        &self,
        area_id: AreaId,
        filter: &HistoryFilter,
    ) -> Result<Vec<ChangeRecord>, HistoryError> {
        let mut tx = self.store.begin().await?;
        require_area(&mut tx, area_id).await?;
        tx.list_changes(area_id, filter).await
    }

    // -----------------------------------------------------------------------
    // Undo / redo
    // -----------------------------------------------------------------------

    /// Reverse the most recent active change.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoChangesToUndo`] on an empty stack and
    /// [`HistoryError::StaleTarget`] when the inverse no longer applies; in
    /// both cases nothing changes.
    pub async fn undo(&self, area_id: AreaId) -> Result<ChangeRecord, HistoryError> {
        self.step(area_id, Direction::Inverse).await
    }

    /// Re-apply the most recently undone change.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoChangesToRedo`] on an empty stack and
    /// [`HistoryError::StaleTarget`] when the forward effect no longer
    /// applies; in both cases nothing changes.
    pub async fn redo(&self, area_id: AreaId) -> Result<ChangeRecord, HistoryError> {
        self.step(area_id, Direction::Forward).await
    }

    async fn step(
        &self,
        area_id: AreaId,
        direction: Direction,
    ) -> Result<ChangeRecord, HistoryError> {
        let mut tx = self.store.begin().await?;
        let state = store::lock_state(&mut tx, area_id).await?;
        let mut stack = tx.load_stack(area_id).await?;

        let change_id = match direction {
            Direction::Inverse => stack.peek_undo()?,
            Direction::Forward => stack.peek_redo()?,
        };
        let mut record = tx.get_change(area_id, change_id).await?.ok_or_else(|| {
            HistoryError::Inconsistent(format!("stack references missing change {change_id}"))
        })?;

        let plan = applier::plan(&state, &record.payload, direction).map_err(|e| {
            warn!(
                area_id = %area_id,
                change_id = %change_id,
                error = %e,
                "Change no longer applies"
            );
            e.for_change(change_id)
        })?;
        if let Some(layer_id) = store::foreign_layer(&mut tx, area_id, &plan).await? {
            warn!(
                area_id = %area_id,
                change_id = %change_id,
                layer_id = %layer_id,
                "Layer id taken by another area"
            );
            return Err(HistoryError::stale(
                record.change_type(),
                format!("layer id {layer_id} is now used by another area"),
            )
            .for_change(change_id));
        }
        store::apply_all(&mut tx, area_id, &plan).await?;

        let is_undone = direction == Direction::Inverse;
        tx.set_change_undone(change_id, is_undone).await?;
        match direction {
            Direction::Inverse => stack.commit_undo()?,
            Direction::Forward => stack.commit_redo()?,
        };
        tx.save_stack(area_id, &stack).await?;
        tx.commit().await?;

        record.is_undone = is_undone;
        debug!(
            area_id = %area_id,
            change_id = %change_id,
            change_type = %record.change_type(),
            undone = is_undone,
            "Undo/redo step applied"
        );
        Ok(record)
    }

    /// Undo and redo availability.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::AreaNotFound`] or a store error.
    pub async fn undo_redo_status(&self, area_id: AreaId) -> Result<UndoRedoStatus, HistoryError> {
        let mut tx = self.store.begin().await?;
        require_area(&mut tx, area_id).await?;
        Ok(tx.load_stack(area_id).await?.status())
    }

    /// Check that the area's stacks agree with the change log.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Inconsistent`] describing the first mismatch,
    /// [`HistoryError::AreaNotFound`], or a store error.
    pub async fn verify_stack(&self, area_id: AreaId) -> Result<UndoRedoStatus, HistoryError> {
        let mut tx = self.store.begin().await?;
        require_area(&mut tx, area_id).await?;
        let stack = tx.load_stack(area_id).await?;

        let mut flags = BTreeMap::new();
        for id in stack.undo_ids().iter().chain(stack.redo_ids()) {
            if let Some(record) = tx.get_change(area_id, *id).await? {
                flags.insert(*id, record.is_undone);
            }
        }
        stack.verify(|id| flags.get(&id).copied())?;
        Ok(stack.status())
    }

    // -----------------------------------------------------------------------
    // Versions
    // -----------------------------------------------------------------------

    /// Snapshot the area as a new active version.
    ///
    /// Deactivates the previous version, attributes every unversioned change
    /// to the new one, points the area at it, and clears the undo/redo
    /// stacks.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::AreaNotFound`] or a store error.
    pub async fn create_version(
        &self,
        area_id: AreaId,
        input: VersionInput,
    ) -> Result<VersionSnapshot, HistoryError> {
        let mut tx = self.store.begin().await?;
        let state = store::lock_state(&mut tx, area_id).await?;

        let version_number = version::next_version_number(tx.max_version_number(area_id).await?)?;
        let change_count =
            i32::try_from(tx.count_unversioned(area_id).await?).unwrap_or(i32::MAX);

        let snapshot = VersionSnapshot {
            area_id,
            version_number,
            name: input
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| version::default_name(version_number)),
            description: input.description,
            snapshot: version::capture(&state),
            change_count,
            changes_summary: input.changes_summary,
            is_active: true,
            parent_version_area_id: None,
            parent_version_number: None,
            branch_name: None,
            created_by: input.created_by,
            created_at: Utc::now(),
        };

        tx.deactivate_versions(area_id).await?;
        tx.insert_version(&snapshot).await?;
        tx.stamp_unversioned(area_id, version_number).await?;

        let mut area = state.area;
        area.current_version_number = Some(version_number);
        tx.apply_mutation(area_id, &EntityMutation::UpdateArea(area))
            .await?;
        tx.save_stack(area_id, &UndoRedoStack::new()).await?;
        tx.commit().await?;

        info!(
            area_id = %area_id,
            version = version_number,
            change_count,
            layers = snapshot.snapshot.layers.len(),
            "Version created"
        );
        Ok(snapshot)
    }

    /// Replace the live area with a version's snapshot.
    ///
    /// Without a branch the restored version becomes active. With
    /// `create_branch` a new version is created from the snapshot, linked
    /// to the restored one as its parent, and made active. The undo/redo
    /// stacks are cleared either way.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::VersionNotFound`],
    /// [`HistoryError::AreaNotFound`], or a store error.
    pub async fn restore_version(
        &self,
        area_id: AreaId,
        version_number: i32,
        options: RestoreOptions,
    ) -> Result<RestoreResult, HistoryError> {
        let mut tx = self.store.begin().await?;
        let state = store::lock_state(&mut tx, area_id).await?;
        let source = fetch_version(&mut tx, area_id, version_number).await?;

        let new_version_number = if options.create_branch {
            Some(version::next_version_number(tx.max_version_number(area_id).await?)?)
        } else {
            None
        };
        let active = new_version_number.unwrap_or(version_number);

        let plan = version::restore_plan(&state, &source.snapshot, active);
        store::apply_all(&mut tx, area_id, &plan).await?;
        tx.deactivate_versions(area_id).await?;

        if let Some(branch_number) = new_version_number {
            let branch_name = options
                .branch_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| version::default_branch_name(version_number));
            let branch = VersionSnapshot {
                area_id,
                version_number: branch_number,
                name: branch_name.clone(),
                description: None,
                snapshot: source.snapshot,
                change_count: 0,
                changes_summary: None,
                is_active: true,
                parent_version_area_id: Some(area_id),
                parent_version_number: Some(version_number),
                branch_name: Some(branch_name),
                created_by: options.created_by,
                created_at: Utc::now(),
            };
            tx.insert_version(&branch).await?;
        } else {
            tx.activate_version(area_id, version_number).await?;
        }

        tx.save_stack(area_id, &UndoRedoStack::new()).await?;
        tx.commit().await?;

        info!(
            area_id = %area_id,
            restored = version_number,
            branch = ?new_version_number,
            "Version restored"
        );
        Ok(RestoreResult {
            restored_version_number: version_number,
            new_version_number,
        })
    }

    /// Delete an inactive version and the change records scoped to it.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::CannotDeleteActiveVersion`],
    /// [`HistoryError::VersionNotFound`], [`HistoryError::AreaNotFound`], or
    /// a store error.
    pub async fn delete_version(
        &self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<(), HistoryError> {
        let mut tx = self.store.begin().await?;
        require_locked_area(&mut tx, area_id).await?;
        let target = tx
            .get_version(area_id, version_number)
            .await?
            .ok_or(HistoryError::VersionNotFound {
                area_id,
                version_number,
            })?;
        if target.is_active {
            return Err(HistoryError::CannotDeleteActiveVersion(version_number));
        }

        let removed = tx
            .delete_changes_in_version(area_id, version_number)
            .await?;
        tx.delete_version(area_id, version_number).await?;

        let mut stack = tx.load_stack(area_id).await?;
        stack.retain(|id| !removed.contains(id));
        tx.save_stack(area_id, &stack).await?;
        tx.commit().await?;

        info!(
            area_id = %area_id,
            version = version_number,
            changes_removed = removed.len(),
            "Version deleted"
        );
        Ok(())
    }

    /// All versions of the area, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::AreaNotFound`] or a store error.
    pub async fn list_versions(
        &self,
        area_id: AreaId,
    ) -> Result<Vec<VersionSnapshot>, HistoryError> {
        let mut tx = self.store.begin().await?;
        require_area(&mut tx, area_id).await?;
        tx.list_versions(area_id).await
    }

    /// One version of the area.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::VersionNotFound`] or a store error.
    pub async fn get_version(
        &self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<VersionSnapshot, HistoryError> {
        let mut tx = self.store.begin().await?;
        fetch_version(&mut tx, area_id, version_number).await
    }

    /// Diff two stored versions of the area, `a` as the older side.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::VersionNotFound`] for either number, or a
    /// store error.
    pub async fn compare_stored_versions(
        &self,
        area_id: AreaId,
        a: i32,
        b: i32,
    ) -> Result<VersionDiff, HistoryError> {
        let mut tx = self.store.begin().await?;
        let older = fetch_version(&mut tx, area_id, a).await?;
        let newer = fetch_version(&mut tx, area_id, b).await?;
        Ok(version::compare_versions(&older, &newer))
    }
}

/// Append a record in the area's current scope and push it for undo.
async fn append<T: StoreTx>(
    tx: &mut T,
    area: &Area,
    input: ChangeInput,
) -> Result<ChangeRecord, HistoryError> {
    let scope = area.current_version_number;
    let sequence = change_log::next_sequence(tx.max_sequence(area.id, scope).await?)?;
    let record = change_log::new_record(area.id, scope, sequence, input);
    tx.insert_change(&record).await?;

    let mut stack = tx.load_stack(area.id).await?;
    stack.push_new(record.id);
    tx.save_stack(area.id, &stack).await?;

    if let Some(version_number) = scope {
        tx.increment_change_count(area.id, version_number).await?;
    }
    Ok(record)
}

async fn require_area<T: StoreTx>(tx: &mut T, area_id: AreaId) -> Result<Area, HistoryError> {
    tx.area(area_id)
        .await?
        .ok_or(HistoryError::AreaNotFound(area_id))
}

async fn require_locked_area<T: StoreTx>(
    tx: &mut T,
    area_id: AreaId,
) -> Result<Area, HistoryError> {
    tx.lock_area(area_id)
        .await?
        .ok_or(HistoryError::AreaNotFound(area_id))
}

async fn fetch_version<T: StoreTx>(
    tx: &mut T,
    area_id: AreaId,
    version_number: i32,
) -> Result<VersionSnapshot, HistoryError> {
    tx.get_version(area_id, version_number)
        .await?
        .ok_or(HistoryError::VersionNotFound {
            area_id,
            version_number,
        })
}

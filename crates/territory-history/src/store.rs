//! Storage seam for the history engine.
//!
//! [`HistoryStore`] hands out transactions; every history operation runs
//! inside exactly one [`StoreTx`] and either commits all of its writes
//! (entities, change records, stacks, versions) or none of them. Dropping a
//! transaction without calling [`StoreTx::commit`] rolls it back.
//!
//! [`StoreTx::lock_area`] serializes writers per area. Every mutating
//! operation takes the lock before reading sequence numbers, stacks, or
//! version numbers, so two concurrent writers on one area never observe the
//! same maximum.
//!
//! Two implementations exist: the in-memory store in this crate and the
//! `PostgreSQL` store in `territory-db`.

use territory_types::{
    Area, AreaId, ChangeId, ChangeRecord, HistoryFilter, Layer, LayerId, VersionSnapshot,
};

use crate::error::HistoryError;
use crate::stack::UndoRedoStack;
use crate::state::{EntityMutation, WorkingState};

/// A source of transactions.
pub trait HistoryStore: Send + Sync {
    /// The transaction type.
    type Tx: StoreTx;

    /// Open a transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, HistoryError>> + Send;
}

/// One atomic unit of work against the store.
pub trait StoreTx: Send + Sized {
    // -- areas and entities -------------------------------------------------

    /// Read an area without locking it.
    fn area(
        &mut self,
        area_id: AreaId,
    ) -> impl Future<Output = Result<Option<Area>, HistoryError>> + Send;

    /// Read an area and hold its write lock until the transaction ends.
    fn lock_area(
        &mut self,
        area_id: AreaId,
    ) -> impl Future<Output = Result<Option<Area>, HistoryError>> + Send;

    /// Insert a new area.
    fn insert_area(&mut self, area: &Area)
    -> impl Future<Output = Result<(), HistoryError>> + Send;

    /// Delete an area and everything it owns. Returns whether it existed.
    fn delete_area(
        &mut self,
        area_id: AreaId,
    ) -> impl Future<Output = Result<bool, HistoryError>> + Send;

    /// Load an area's layers with their postal codes.
    fn load_layers(
        &mut self,
        area_id: AreaId,
    ) -> impl Future<Output = Result<Vec<Layer>, HistoryError>> + Send;

    /// The area owning a layer id, looked up across all areas.
    fn layer_area(
        &mut self,
        layer_id: LayerId,
    ) -> impl Future<Output = Result<Option<AreaId>, HistoryError>> + Send;

    /// Execute one entity write.
    fn apply_mutation(
        &mut self,
        area_id: AreaId,
        mutation: &EntityMutation,
    ) -> impl Future<Output = Result<(), HistoryError>> + Send;

    // -- change log ---------------------------------------------------------

    /// Highest sequence number in a version scope (`None` = unversioned).
    fn max_sequence(
        &mut self,
        area_id: AreaId,
        version_number: Option<i32>,
    ) -> impl Future<Output = Result<Option<i64>, HistoryError>> + Send;

    /// Append a change record.
    fn insert_change(
        &mut self,
        record: &ChangeRecord,
    ) -> impl Future<Output = Result<(), HistoryError>> + Send;

    /// Fetch a change record of the area.
    fn get_change(
        &mut self,
        area_id: AreaId,
        change_id: ChangeId,
    ) -> impl Future<Output = Result<Option<ChangeRecord>, HistoryError>> + Send;

    /// Set a record's undone flag.
    fn set_change_undone(
        &mut self,
        change_id: ChangeId,
        is_undone: bool,
    ) -> impl Future<Output = Result<(), HistoryError>> + Send;

    /// Query the area's change log.
    fn list_changes(
        &mut self,
        area_id: AreaId,
        filter: &HistoryFilter,
    ) -> impl Future<Output = Result<Vec<ChangeRecord>, HistoryError>> + Send;

    /// Number of records not yet attributed to a version.
    fn count_unversioned(
        &mut self,
        area_id: AreaId,
    ) -> impl Future<Output = Result<i64, HistoryError>> + Send;

    /// Attribute all unversioned records to a version.
    fn stamp_unversioned(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> impl Future<Output = Result<(), HistoryError>> + Send;

    // -- undo/redo stacks ---------------------------------------------------

    /// Load the area's stacks (empty when none are stored).
    fn load_stack(
        &mut self,
        area_id: AreaId,
    ) -> impl Future<Output = Result<UndoRedoStack, HistoryError>> + Send;

    /// Persist the area's stacks.
    fn save_stack(
        &mut self,
        area_id: AreaId,
        stack: &UndoRedoStack,
    ) -> impl Future<Output = Result<(), HistoryError>> + Send;

    // -- versions -----------------------------------------------------------

    /// Highest version number of the area.
    fn max_version_number(
        &mut self,
        area_id: AreaId,
    ) -> impl Future<Output = Result<Option<i32>, HistoryError>> + Send;

    /// Fetch one version.
    fn get_version(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> impl Future<Output = Result<Option<VersionSnapshot>, HistoryError>> + Send;

    /// All versions of the area, newest first.
    fn list_versions(
        &mut self,
        area_id: AreaId,
    ) -> impl Future<Output = Result<Vec<VersionSnapshot>, HistoryError>> + Send;

    /// Insert a version.
    fn insert_version(
        &mut self,
        version: &VersionSnapshot,
    ) -> impl Future<Output = Result<(), HistoryError>> + Send;

    /// Clear the active flag on every version of the area.
    fn deactivate_versions(
        &mut self,
        area_id: AreaId,
    ) -> impl Future<Output = Result<(), HistoryError>> + Send;

    /// Set the active flag on one version.
    fn activate_version(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> impl Future<Output = Result<(), HistoryError>> + Send;

    /// Add one to a version's change count.
    fn increment_change_count(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> impl Future<Output = Result<(), HistoryError>> + Send;

    /// Delete a version row.
    fn delete_version(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> impl Future<Output = Result<(), HistoryError>> + Send;

    /// Delete the change records scoped to a version. Returns their ids.
    fn delete_changes_in_version(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> impl Future<Output = Result<Vec<ChangeId>, HistoryError>> + Send;

    // -- lifecycle ----------------------------------------------------------

    /// Make every write of this transaction durable.
    fn commit(self) -> impl Future<Output = Result<(), HistoryError>> + Send;
}

/// Load an area with its layers, taking the area lock.
///
/// # Errors
///
/// Returns [`HistoryError::AreaNotFound`] if the area does not exist, or the
/// store's error.
pub async fn lock_state<T: StoreTx>(
    tx: &mut T,
    area_id: AreaId,
) -> Result<WorkingState, HistoryError> {
    let area = tx
        .lock_area(area_id)
        .await?
        .ok_or(HistoryError::AreaNotFound(area_id))?;
    let layers = tx.load_layers(area_id).await?;
    Ok(WorkingState::new(area, layers))
}

/// The first layer a plan inserts whose id another area already uses.
///
/// # Errors
///
/// Propagates the store's error.
pub async fn foreign_layer<T: StoreTx>(
    tx: &mut T,
    area_id: AreaId,
    mutations: &[EntityMutation],
) -> Result<Option<LayerId>, HistoryError> {
    for mutation in mutations {
        let EntityMutation::InsertLayer(layer) = mutation else {
            continue;
        };
        if tx
            .layer_area(layer.id)
            .await?
            .is_some_and(|owner| owner != area_id)
        {
            return Ok(Some(layer.id));
        }
    }
    Ok(None)
}

/// Execute planned writes in order.
///
/// # Errors
///
/// Propagates the first store error.
pub async fn apply_all<T: StoreTx>(
    tx: &mut T,
    area_id: AreaId,
    mutations: &[EntityMutation],
) -> Result<(), HistoryError> {
    for mutation in mutations {
        tx.apply_mutation(area_id, mutation).await?;
    }
    Ok(())
}

//! [`HistoryStore`] implementation backed by `PostgreSQL`.
//!
//! Each engine transaction is one `PostgreSQL` transaction. The area lock
//! is the area row's `FOR UPDATE` lock, so writers on different areas never
//! block each other. Dropping a [`PgTx`] without committing rolls back.

use sqlx::{PgPool, Postgres, Transaction};
use territory_history::{EntityMutation, HistoryError, HistoryStore, StoreTx, UndoRedoStack};
use territory_types::{
    Area, AreaId, ChangeId, ChangeRecord, HistoryFilter, Layer, LayerId, VersionSnapshot,
};

use crate::error::DbError;
use crate::{area_store, change_store, stack_store, version_store};

/// `PostgreSQL` history store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a store over a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl HistoryStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, HistoryError> {
        let tx = self.pool.begin().await.map_err(DbError::from)?;
        Ok(PgTx { tx })
    }
}

/// An open `PostgreSQL` transaction.
#[derive(Debug)]
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl StoreTx for PgTx {
    async fn area(&mut self, area_id: AreaId) -> Result<Option<Area>, HistoryError> {
        Ok(area_store::get_area(&mut self.tx, area_id, false).await?)
    }

    async fn lock_area(&mut self, area_id: AreaId) -> Result<Option<Area>, HistoryError> {
        Ok(area_store::get_area(&mut self.tx, area_id, true).await?)
    }

    async fn insert_area(&mut self, area: &Area) -> Result<(), HistoryError> {
        Ok(area_store::insert_area(&mut self.tx, area).await?)
    }

    async fn delete_area(&mut self, area_id: AreaId) -> Result<bool, HistoryError> {
        Ok(area_store::delete_area(&mut self.tx, area_id).await?)
    }

    async fn load_layers(&mut self, area_id: AreaId) -> Result<Vec<Layer>, HistoryError> {
        Ok(area_store::load_layers(&mut self.tx, area_id).await?)
    }

    async fn layer_area(&mut self, layer_id: LayerId) -> Result<Option<AreaId>, HistoryError> {
        Ok(area_store::layer_area(&mut self.tx, layer_id).await?)
    }

    async fn apply_mutation(
        &mut self,
        area_id: AreaId,
        mutation: &EntityMutation,
    ) -> Result<(), HistoryError> {
        Ok(area_store::apply_mutation(&mut self.tx, area_id, mutation).await?)
    }

    async fn max_sequence(
        &mut self,
        area_id: AreaId,
        version_number: Option<i32>,
    ) -> Result<Option<i64>, HistoryError> {
        Ok(change_store::max_sequence(&mut self.tx, area_id, version_number).await?)
    }

    async fn insert_change(&mut self, record: &ChangeRecord) -> Result<(), HistoryError> {
        Ok(change_store::insert(&mut self.tx, record).await?)
    }

    async fn get_change(
        &mut self,
        area_id: AreaId,
        change_id: ChangeId,
    ) -> Result<Option<ChangeRecord>, HistoryError> {
        Ok(change_store::get(&mut self.tx, area_id, change_id).await?)
    }

    async fn set_change_undone(
        &mut self,
        change_id: ChangeId,
        is_undone: bool,
    ) -> Result<(), HistoryError> {
        Ok(change_store::set_undone(&mut self.tx, change_id, is_undone).await?)
    }

    async fn list_changes(
        &mut self,
        area_id: AreaId,
        filter: &HistoryFilter,
    ) -> Result<Vec<ChangeRecord>, HistoryError> {
        Ok(change_store::list(&mut self.tx, area_id, filter).await?)
    }

    async fn count_unversioned(&mut self, area_id: AreaId) -> Result<i64, HistoryError> {
        Ok(change_store::count_unversioned(&mut self.tx, area_id).await?)
    }

    async fn stamp_unversioned(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<(), HistoryError> {
        Ok(change_store::stamp_unversioned(&mut self.tx, area_id, version_number).await?)
    }

    async fn load_stack(&mut self, area_id: AreaId) -> Result<UndoRedoStack, HistoryError> {
        Ok(stack_store::load(&mut self.tx, area_id).await?)
    }

    async fn save_stack(
        &mut self,
        area_id: AreaId,
        stack: &UndoRedoStack,
    ) -> Result<(), HistoryError> {
        Ok(stack_store::save(&mut self.tx, area_id, stack).await?)
    }

    async fn max_version_number(&mut self, area_id: AreaId) -> Result<Option<i32>, HistoryError> {
        Ok(version_store::max_number(&mut self.tx, area_id).await?)
    }

    async fn get_version(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<Option<VersionSnapshot>, HistoryError> {
        Ok(version_store::get(&mut self.tx, area_id, version_number).await?)
    }

    async fn list_versions(
        &mut self,
        area_id: AreaId,
    ) -> Result<Vec<VersionSnapshot>, HistoryError> {
        Ok(version_store::list(&mut self.tx, area_id).await?)
    }

    async fn insert_version(&mut self, version: &VersionSnapshot) -> Result<(), HistoryError> {
        Ok(version_store::insert(&mut self.tx, version).await?)
    }

    async fn deactivate_versions(&mut self, area_id: AreaId) -> Result<(), HistoryError> {
        Ok(version_store::deactivate_all(&mut self.tx, area_id).await?)
    }

    async fn activate_version(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<(), HistoryError> {
        Ok(version_store::activate(&mut self.tx, area_id, version_number).await?)
    }

    async fn increment_change_count(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<(), HistoryError> {
        Ok(version_store::increment_change_count(&mut self.tx, area_id, version_number).await?)
    }

    async fn delete_version(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<(), HistoryError> {
        Ok(version_store::delete(&mut self.tx, area_id, version_number).await?)
    }

    async fn delete_changes_in_version(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<Vec<ChangeId>, HistoryError> {
        Ok(change_store::delete_in_version(&mut self.tx, area_id, version_number).await?)
    }

    async fn commit(self) -> Result<(), HistoryError> {
        self.tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }
}

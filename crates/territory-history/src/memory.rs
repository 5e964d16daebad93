//! In-memory [`HistoryStore`] for tests and database-less runs.
//!
//! Each area lives behind its own async mutex, the in-process stand-in for
//! the `SELECT ... FOR UPDATE` row lock the `PostgreSQL` store takes. A
//! transaction locks the first area it touches for its whole lifetime and
//! works on a private copy of that area's data; commit writes the copy back
//! and dropping the transaction discards it. Transactions on different
//! areas never wait on each other.
//!
//! Layer ids are unique across areas, as in `PostgreSQL`. A store-wide
//! index maps every committed layer to its area and is updated on commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use territory_types::{
    Area, AreaId, ChangeId, ChangeRecord, HistoryFilter, Layer, LayerId, VersionSnapshot,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::change_log;
use crate::error::HistoryError;
use crate::stack::UndoRedoStack;
use crate::state::EntityMutation;
use crate::store::{HistoryStore, StoreTx};

/// Everything stored for one area. `area` is `None` once deleted.
#[derive(Debug, Clone, Default)]
struct AreaData {
    area: Option<Area>,
    layers: BTreeMap<LayerId, Layer>,
    changes: BTreeMap<ChangeId, ChangeRecord>,
    stack: UndoRedoStack,
    versions: BTreeMap<i32, VersionSnapshot>,
}

type AreaCell = Arc<Mutex<AreaData>>;

/// Shared, cloneable in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    areas: Arc<RwLock<HashMap<AreaId, AreaCell>>>,
    layer_owners: Arc<RwLock<HashMap<LayerId, AreaId>>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, HistoryError> {
        Ok(MemoryTx {
            store: self.clone(),
            held: None,
        })
    }
}

#[derive(Debug)]
struct Held {
    area_id: AreaId,
    guard: OwnedMutexGuard<AreaData>,
    data: AreaData,
    /// Set when the area was created by this transaction.
    new_cell: Option<AreaCell>,
}

/// An open in-memory transaction, bound to at most one area.
#[derive(Debug)]
pub struct MemoryTx {
    store: MemoryStore,
    held: Option<Held>,
}

impl MemoryTx {
    /// The working copy of an area, locking it on first use. `None` when the
    /// area does not exist.
    async fn data(&mut self, area_id: AreaId) -> Result<Option<&mut AreaData>, HistoryError> {
        if self.held.is_none() {
            let cell = self.store.areas.read().await.get(&area_id).cloned();
            let Some(cell) = cell else {
                return Ok(None);
            };
            let guard = cell.lock_owned().await;
            let data = guard.clone();
            self.held = Some(Held {
                area_id,
                guard,
                data,
                new_cell: None,
            });
        }

        let Some(held) = self.held.as_mut() else {
            return Ok(None);
        };
        if held.area_id != area_id {
            return Err(HistoryError::Inconsistent(format!(
                "transaction is bound to area {}, not {area_id}",
                held.area_id
            )));
        }
        if held.data.area.is_none() {
            return Ok(None);
        }
        Ok(Some(&mut held.data))
    }

    async fn require(&mut self, area_id: AreaId) -> Result<&mut AreaData, HistoryError> {
        self.data(area_id)
            .await?
            .ok_or(HistoryError::AreaNotFound(area_id))
    }

    fn held_mut(&mut self) -> Result<&mut AreaData, HistoryError> {
        self.held
            .as_mut()
            .map(|held| &mut held.data)
            .ok_or_else(|| HistoryError::Inconsistent(String::from("no area locked")))
    }
}

fn layer_mut(data: &mut AreaData, id: LayerId) -> Result<&mut Layer, HistoryError> {
    data.layers
        .get_mut(&id)
        .ok_or_else(|| HistoryError::Inconsistent(format!("layer {id} missing")))
}

fn version_mut(
    data: &mut AreaData,
    area_id: AreaId,
    version_number: i32,
) -> Result<&mut VersionSnapshot, HistoryError> {
    data.versions
        .get_mut(&version_number)
        .ok_or(HistoryError::VersionNotFound {
            area_id,
            version_number,
        })
}

impl StoreTx for MemoryTx {
    async fn area(&mut self, area_id: AreaId) -> Result<Option<Area>, HistoryError> {
        Ok(self.data(area_id).await?.and_then(|d| d.area.clone()))
    }

    async fn lock_area(&mut self, area_id: AreaId) -> Result<Option<Area>, HistoryError> {
        // Any access already holds the area's lock.
        self.area(area_id).await
    }

    async fn insert_area(&mut self, area: &Area) -> Result<(), HistoryError> {
        if self.held.is_some() {
            return Err(HistoryError::Inconsistent(String::from(
                "transaction already holds an area",
            )));
        }
        if self.store.areas.read().await.contains_key(&area.id) {
            return Err(HistoryError::Persistence(format!(
                "area {} already exists",
                area.id
            )));
        }
        let cell: AreaCell = Arc::new(Mutex::new(AreaData::default()));
        let guard = Arc::clone(&cell).lock_owned().await;
        self.held = Some(Held {
            area_id: area.id,
            guard,
            data: AreaData {
                area: Some(area.clone()),
                ..AreaData::default()
            },
            new_cell: Some(cell),
        });
        Ok(())
    }

    async fn delete_area(&mut self, area_id: AreaId) -> Result<bool, HistoryError> {
        let Some(data) = self.data(area_id).await? else {
            return Ok(false);
        };
        *data = AreaData::default();
        Ok(true)
    }

    async fn load_layers(&mut self, area_id: AreaId) -> Result<Vec<Layer>, HistoryError> {
        Ok(self
            .data(area_id)
            .await?
            .map(|d| d.layers.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn layer_area(&mut self, layer_id: LayerId) -> Result<Option<AreaId>, HistoryError> {
        let held_area = self.held.as_ref().map(|h| h.area_id);
        if self
            .held
            .as_ref()
            .is_some_and(|h| h.data.layers.contains_key(&layer_id))
        {
            return Ok(held_area);
        }
        let owner = self.store.layer_owners.read().await.get(&layer_id).copied();
        // A layer this transaction deleted is still indexed until commit.
        Ok(owner.filter(|area_id| held_area != Some(*area_id)))
    }

    async fn apply_mutation(
        &mut self,
        area_id: AreaId,
        mutation: &EntityMutation,
    ) -> Result<(), HistoryError> {
        let data = self.require(area_id).await?;
        match mutation {
            EntityMutation::InsertLayer(layer) => {
                if data.layers.contains_key(&layer.id) {
                    return Err(HistoryError::Persistence(format!(
                        "layer {} already exists",
                        layer.id
                    )));
                }
                let mut layer = layer.clone();
                layer.area_id = area_id;
                data.layers.insert(layer.id, layer);
            }
            EntityMutation::UpdateLayer(layer) => {
                let current = layer_mut(data, layer.id)?;
                let codes = std::mem::take(&mut current.postal_codes);
                *current = Layer {
                    area_id,
                    postal_codes: codes,
                    ..layer.clone()
                };
            }
            EntityMutation::DeleteLayer(id) => {
                data.layers
                    .remove(id)
                    .ok_or_else(|| HistoryError::Inconsistent(format!("layer {id} missing")))?;
            }
            EntityMutation::InsertCodes { layer_id, codes } => {
                layer_mut(data, *layer_id)?
                    .postal_codes
                    .extend(codes.iter().cloned());
            }
            EntityMutation::DeleteCodes { layer_id, codes } => {
                layer_mut(data, *layer_id)?
                    .postal_codes
                    .retain(|c| !codes.contains(c));
            }
            EntityMutation::UpdateArea(area) => {
                let current = data
                    .area
                    .as_mut()
                    .ok_or(HistoryError::AreaNotFound(area_id))?;
                *current = Area {
                    id: area_id,
                    created_at: current.created_at,
                    updated_at: Utc::now(),
                    ..area.clone()
                };
            }
        }
        Ok(())
    }

    async fn max_sequence(
        &mut self,
        area_id: AreaId,
        version_number: Option<i32>,
    ) -> Result<Option<i64>, HistoryError> {
        let data = self.require(area_id).await?;
        Ok(data
            .changes
            .values()
            .filter(|c| c.version_number == version_number)
            .map(|c| c.sequence_number)
            .max())
    }

    async fn insert_change(&mut self, record: &ChangeRecord) -> Result<(), HistoryError> {
        let data = self.require(record.area_id).await?;
        let duplicate = data.changes.values().any(|c| {
            c.scope() == record.scope() && c.sequence_number == record.sequence_number
        });
        if duplicate {
            return Err(HistoryError::Persistence(format!(
                "sequence number {} already used",
                record.sequence_number
            )));
        }
        data.changes.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_change(
        &mut self,
        area_id: AreaId,
        change_id: ChangeId,
    ) -> Result<Option<ChangeRecord>, HistoryError> {
        Ok(self
            .data(area_id)
            .await?
            .and_then(|d| d.changes.get(&change_id).cloned()))
    }

    async fn set_change_undone(
        &mut self,
        change_id: ChangeId,
        is_undone: bool,
    ) -> Result<(), HistoryError> {
        let record = self
            .held_mut()?
            .changes
            .get_mut(&change_id)
            .ok_or_else(|| HistoryError::Inconsistent(format!("change {change_id} missing")))?;
        record.is_undone = is_undone;
        Ok(())
    }

    async fn list_changes(
        &mut self,
        area_id: AreaId,
        filter: &HistoryFilter,
    ) -> Result<Vec<ChangeRecord>, HistoryError> {
        Ok(self
            .data(area_id)
            .await?
            .map(|d| change_log::select(d.changes.values(), filter))
            .unwrap_or_default())
    }

    async fn count_unversioned(&mut self, area_id: AreaId) -> Result<i64, HistoryError> {
        let data = self.require(area_id).await?;
        let count = data
            .changes
            .values()
            .filter(|c| c.version_number.is_none())
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn stamp_unversioned(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<(), HistoryError> {
        let data = self.require(area_id).await?;
        for change in data.changes.values_mut() {
            if change.version_number.is_none() {
                change.version_area_id = Some(area_id);
                change.version_number = Some(version_number);
            }
        }
        Ok(())
    }

    async fn load_stack(&mut self, area_id: AreaId) -> Result<UndoRedoStack, HistoryError> {
        Ok(self
            .data(area_id)
            .await?
            .map(|d| d.stack.clone())
            .unwrap_or_default())
    }

    async fn save_stack(
        &mut self,
        area_id: AreaId,
        stack: &UndoRedoStack,
    ) -> Result<(), HistoryError> {
        self.require(area_id).await?.stack = stack.clone();
        Ok(())
    }

    async fn max_version_number(&mut self, area_id: AreaId) -> Result<Option<i32>, HistoryError> {
        Ok(self
            .data(area_id)
            .await?
            .and_then(|d| d.versions.keys().next_back().copied()))
    }

    async fn get_version(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<Option<VersionSnapshot>, HistoryError> {
        Ok(self
            .data(area_id)
            .await?
            .and_then(|d| d.versions.get(&version_number).cloned()))
    }

    async fn list_versions(
        &mut self,
        area_id: AreaId,
    ) -> Result<Vec<VersionSnapshot>, HistoryError> {
        Ok(self
            .data(area_id)
            .await?
            .map(|d| d.versions.values().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_version(&mut self, version: &VersionSnapshot) -> Result<(), HistoryError> {
        let data = self.require(version.area_id).await?;
        if data.versions.contains_key(&version.version_number) {
            return Err(HistoryError::Persistence(format!(
                "version {} already exists",
                version.version_number
            )));
        }
        if version.is_active && data.versions.values().any(|v| v.is_active) {
            return Err(HistoryError::Persistence(String::from(
                "area already has an active version",
            )));
        }
        data.versions
            .insert(version.version_number, version.clone());
        Ok(())
    }

    async fn deactivate_versions(&mut self, area_id: AreaId) -> Result<(), HistoryError> {
        for version in self.require(area_id).await?.versions.values_mut() {
            version.is_active = false;
        }
        Ok(())
    }

    async fn activate_version(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<(), HistoryError> {
        let data = self.require(area_id).await?;
        version_mut(data, area_id, version_number)?.is_active = true;
        Ok(())
    }

    async fn increment_change_count(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<(), HistoryError> {
        let data = self.require(area_id).await?;
        let version = version_mut(data, area_id, version_number)?;
        version.change_count = version.change_count.saturating_add(1);
        Ok(())
    }

    async fn delete_version(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<(), HistoryError> {
        let data = self.require(area_id).await?;
        data.versions.remove(&version_number);
        for child in data.versions.values_mut() {
            if child.parent_version_number == Some(version_number) {
                child.parent_version_area_id = None;
                child.parent_version_number = None;
            }
        }
        Ok(())
    }

    async fn delete_changes_in_version(
        &mut self,
        area_id: AreaId,
        version_number: i32,
    ) -> Result<Vec<ChangeId>, HistoryError> {
        let data = self.require(area_id).await?;
        let ids: Vec<ChangeId> = data
            .changes
            .values()
            .filter(|c| c.version_number == Some(version_number))
            .map(|c| c.id)
            .collect();
        for id in &ids {
            data.changes.remove(id);
        }
        Ok(ids)
    }

    async fn commit(self) -> Result<(), HistoryError> {
        let Some(Held {
            area_id,
            mut guard,
            data,
            new_cell,
        }) = self.held
        else {
            return Ok(());
        };

        let deleted = data.area.is_none();
        {
            let mut owners = self.store.layer_owners.write().await;
            for id in guard.layers.keys() {
                if !data.layers.contains_key(id) {
                    owners.remove(id);
                }
            }
            for id in data.layers.keys() {
                owners.insert(*id, area_id);
            }
        }
        *guard = data;
        match new_cell {
            Some(cell) if !deleted => {
                self.store.areas.write().await.insert(area_id, cell);
            }
            None if deleted => {
                self.store.areas.write().await.remove(&area_id);
            }
            _ => {}
        }
        Ok(())
    }
}

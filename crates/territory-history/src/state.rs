//! Working model of one area's live entities.
//!
//! The applier and the version manager never write to a store directly.
//! They read a [`WorkingState`] loaded inside the current transaction and
//! produce a list of [`EntityMutation`]s, which the store then executes.
//! The same mutations applied to a [`WorkingState`] give the expected
//! post-state, which is how the in-memory store and the tests use it.

use std::collections::{BTreeMap, BTreeSet};

use territory_types::{Area, AreaSnapshot, AreaState, Layer, LayerId, SnapshotData};

use crate::error::HistoryError;

/// One write to the entity store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityMutation {
    /// Insert a layer together with its postal codes.
    InsertLayer(Layer),
    /// Overwrite a layer's scalar fields (codes are left alone).
    UpdateLayer(Layer),
    /// Delete a layer and all of its postal codes.
    DeleteLayer(LayerId),
    /// Insert `(layer, code)` pairs.
    InsertCodes {
        /// Target layer.
        layer_id: LayerId,
        /// Codes to insert.
        codes: BTreeSet<String>,
    },
    /// Delete `(layer, code)` pairs.
    DeleteCodes {
        /// Target layer.
        layer_id: LayerId,
        /// Codes to delete.
        codes: BTreeSet<String>,
    },
    /// Overwrite the area's scalar fields and version pointer.
    UpdateArea(Area),
}

/// An area with its layers, keyed by layer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingState {
    /// The area row.
    pub area: Area,
    /// Layers of the area.
    pub layers: BTreeMap<LayerId, Layer>,
}

impl WorkingState {
    /// Build a working state from an area and its layers.
    pub fn new(area: Area, layers: Vec<Layer>) -> Self {
        let layers = layers.into_iter().map(|l| (l.id, l)).collect();
        Self { area, layers }
    }

    /// Look up a layer.
    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    /// Apply one mutation.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Inconsistent`] if the mutation targets a
    /// layer that is missing (or, for inserts, already present). Planned
    /// mutations are checked before they are produced, so this only fires
    /// when a plan is applied to a state it was not computed from.
    pub fn apply(&mut self, mutation: &EntityMutation) -> Result<(), HistoryError> {
        match mutation {
            EntityMutation::InsertLayer(layer) => {
                if self.layers.contains_key(&layer.id) {
                    return Err(HistoryError::Inconsistent(format!(
                        "layer {} already exists",
                        layer.id
                    )));
                }
                self.layers.insert(layer.id, layer.clone());
            }
            EntityMutation::UpdateLayer(layer) => {
                let current = self.layer_mut(layer.id)?;
                let codes = std::mem::take(&mut current.postal_codes);
                *current = Layer {
                    postal_codes: codes,
                    ..layer.clone()
                };
            }
            EntityMutation::DeleteLayer(id) => {
                self.layers
                    .remove(id)
                    .ok_or_else(|| HistoryError::Inconsistent(format!("layer {id} missing")))?;
            }
            EntityMutation::InsertCodes { layer_id, codes } => {
                let current = self.layer_mut(*layer_id)?;
                current.postal_codes.extend(codes.iter().cloned());
            }
            EntityMutation::DeleteCodes { layer_id, codes } => {
                let current = self.layer_mut(*layer_id)?;
                current.postal_codes.retain(|code| !codes.contains(code));
            }
            EntityMutation::UpdateArea(area) => {
                self.area = area.clone();
            }
        }
        Ok(())
    }

    /// Apply a list of mutations in order.
    ///
    /// # Errors
    ///
    /// Propagates the first failing [`WorkingState::apply`].
    pub fn apply_all(&mut self, mutations: &[EntityMutation]) -> Result<(), HistoryError> {
        mutations.iter().try_for_each(|m| self.apply(m))
    }

    /// Copy the state into an immutable version snapshot.
    ///
    /// Layers are captured in display order.
    pub fn snapshot(&self) -> SnapshotData {
        SnapshotData {
            area: AreaSnapshot {
                name: self.area.name.clone(),
                description: self.area.description.clone(),
                granularity: self.area.granularity.clone(),
            },
            layers: self.ordered_layers().map(Layer::to_snapshot).collect(),
        }
    }

    /// Convert into the public [`AreaState`], layers in display order.
    pub fn into_area_state(self) -> AreaState {
        let layers = self.ordered_layers().cloned().collect();
        AreaState {
            area: self.area,
            layers,
        }
    }

    fn ordered_layers(&self) -> impl Iterator<Item = &Layer> {
        let mut layers: Vec<&Layer> = self.layers.values().collect();
        layers.sort_by(|a, b| {
            a.order_index
                .cmp(&b.order_index)
                .then_with(|| a.name.cmp(&b.name))
        });
        layers.into_iter()
    }

    fn layer_mut(&mut self, id: LayerId) -> Result<&mut Layer, HistoryError> {
        self.layers
            .get_mut(&id)
            .ok_or_else(|| HistoryError::Inconsistent(format!("layer {id} missing")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use territory_types::{AreaId, NewArea};

    use super::*;

    fn state_with_layers(names: &[(&str, i32)]) -> WorkingState {
        let area = Area::new(NewArea {
            name: String::from("Berlin"),
            description: None,
            granularity: String::from("5digit"),
        });
        let layers = names
            .iter()
            .map(|(name, order)| layer(area.id, name, *order))
            .collect();
        WorkingState::new(area, layers)
    }

    fn layer(area_id: AreaId, name: &str, order_index: i32) -> Layer {
        Layer {
            id: LayerId::new(),
            area_id,
            name: name.to_owned(),
            color: String::from("#000000"),
            opacity: 100,
            is_visible: true,
            order_index,
            postal_codes: BTreeSet::new(),
        }
    }

    #[test]
    fn update_layer_keeps_codes() {
        let mut state = state_with_layers(&[("A", 0)]);
        let id = *state.layers.keys().next().unwrap();
        state
            .apply(&EntityMutation::InsertCodes {
                layer_id: id,
                codes: BTreeSet::from([String::from("10115")]),
            })
            .unwrap();

        let mut renamed = state.layer(id).cloned().unwrap();
        renamed.name = String::from("B");
        renamed.postal_codes.clear();
        assert!(state.apply(&EntityMutation::UpdateLayer(renamed)).is_ok());

        let stored = state.layer(id);
        assert_eq!(stored.map(|l| l.name.as_str()), Some("B"));
        assert_eq!(stored.map(|l| l.postal_codes.len()), Some(1));
    }

    #[test]
    fn deleting_missing_layer_is_inconsistent() {
        let mut state = state_with_layers(&[]);
        let result = state.apply(&EntityMutation::DeleteLayer(LayerId::new()));
        assert!(matches!(result, Err(HistoryError::Inconsistent(_))));
    }

    #[test]
    fn snapshot_orders_layers_by_index_then_name() {
        let state = state_with_layers(&[("zeta", 1), ("beta", 0), ("alpha", 1)]);
        let names: Vec<String> = state
            .snapshot()
            .layers
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["beta", "alpha", "zeta"]);
    }
}

//! Forward and inverse effects of change payloads.
//!
//! [`plan`] turns a payload and a direction into the entity writes that
//! realize it against the current [`WorkingState`]. Planning is pure: it
//! reads the state, checks that every targeted entity is where the change
//! expects it, and either returns the full mutation list or a
//! [`HistoryError::StaleTarget`]. Because nothing is written until the whole
//! plan exists, a stale target never leaves a half-applied change behind.
//!
//! Effects per kind:
//!
//! | Kind | Forward | Inverse |
//! |------|---------|---------|
//! | `create_layer` | insert layer + codes | delete layer |
//! | `update_layer` | apply `changes` | apply `previous` |
//! | `delete_layer` | delete layer | re-insert layer + codes |
//! | `add_postal_codes` | insert codes | delete codes not in `previous` |
//! | `remove_postal_codes` | delete codes | re-insert codes that were in `previous` |
//! | `update_area` | apply `changes` | apply `previous` |

use std::collections::BTreeSet;

use territory_types::{
    Area, AreaId, AreaPatch, ChangePayload, ChangeType, Layer, LayerId, LayerPatch, MAX_OPACITY,
};

use crate::error::HistoryError;
use crate::state::{EntityMutation, WorkingState};

/// Which effect of a change to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Re-apply the change (initial apply and redo).
    Forward,
    /// Reverse the change (undo).
    Inverse,
}

/// Compute the entity writes for one direction of a change.
///
/// # Errors
///
/// Returns [`HistoryError::StaleTarget`] when a targeted layer is missing,
/// or already present for an insert.
pub fn plan(
    state: &WorkingState,
    payload: &ChangePayload,
    direction: Direction,
) -> Result<Vec<EntityMutation>, HistoryError> {
    let kind = payload.change_type();
    let mut out = Vec::new();

    match (payload, direction) {
        (ChangePayload::CreateLayer { layer }, Direction::Forward)
        | (ChangePayload::DeleteLayer { layer }, Direction::Inverse) => {
            if state.layer(layer.id).is_some() {
                return Err(HistoryError::stale(
                    kind,
                    format!("layer {} already exists", layer.id),
                ));
            }
            out.push(EntityMutation::InsertLayer(layer.clone()));
        }
        (ChangePayload::CreateLayer { layer }, Direction::Inverse)
        | (ChangePayload::DeleteLayer { layer }, Direction::Forward) => {
            require_layer(state, kind, layer.id)?;
            out.push(EntityMutation::DeleteLayer(layer.id));
        }
        (
            ChangePayload::UpdateLayer {
                layer_id,
                changes,
                previous,
            },
            _,
        ) => {
            let patch = match direction {
                Direction::Forward => changes,
                Direction::Inverse => previous,
            };
            let mut layer = require_layer(state, kind, *layer_id)?.clone();
            patch.apply_to(&mut layer);
            out.push(EntityMutation::UpdateLayer(layer));
        }
        (
            ChangePayload::AddPostalCodes {
                layer_id, codes, ..
            },
            Direction::Forward,
        ) => {
            let current = &require_layer(state, kind, *layer_id)?.postal_codes;
            let missing: BTreeSet<String> = codes.difference(current).cloned().collect();
            push_codes(&mut out, *layer_id, missing, true);
        }
        (
            ChangePayload::AddPostalCodes {
                layer_id,
                codes,
                previous,
            },
            Direction::Inverse,
        ) => {
            let current = &require_layer(state, kind, *layer_id)?.postal_codes;
            let added: BTreeSet<String> = previous.as_ref().map_or_else(
                || codes.clone(),
                |before| codes.difference(before).cloned().collect(),
            );
            let present = added.intersection(current).cloned().collect();
            push_codes(&mut out, *layer_id, present, false);
        }
        (
            ChangePayload::RemovePostalCodes {
                layer_id, codes, ..
            },
            Direction::Forward,
        ) => {
            let current = &require_layer(state, kind, *layer_id)?.postal_codes;
            let present = codes.intersection(current).cloned().collect();
            push_codes(&mut out, *layer_id, present, false);
        }
        (
            ChangePayload::RemovePostalCodes {
                layer_id,
                codes,
                previous,
            },
            Direction::Inverse,
        ) => {
            let current = &require_layer(state, kind, *layer_id)?.postal_codes;
            let removed: BTreeSet<String> = previous.as_ref().map_or_else(
                || codes.clone(),
                |before| codes.intersection(before).cloned().collect(),
            );
            let missing = removed.difference(current).cloned().collect();
            push_codes(&mut out, *layer_id, missing, true);
        }
        (ChangePayload::UpdateArea { changes, previous }, _) => {
            let patch = match direction {
                Direction::Forward => changes,
                Direction::Inverse => previous,
            };
            let mut area = state.area.clone();
            patch.apply_to(&mut area);
            out.push(EntityMutation::UpdateArea(area));
        }
    }

    Ok(out)
}

/// Replace a payload's reverse data with what the live state holds.
///
/// Used when the engine applies a change itself: the caller's copy of the
/// deleted layer or of the previous field values may be out of date, and
/// undo must restore what was actually there. Only fields set in `changes`
/// are captured for updates. Code batches capture the layer's full code
/// set.
///
/// # Errors
///
/// Returns [`HistoryError::StaleTarget`] when the targeted layer is missing.
pub fn with_live_reverse(
    state: &WorkingState,
    payload: ChangePayload,
) -> Result<ChangePayload, HistoryError> {
    let kind = payload.change_type();
    let completed = match payload {
        ChangePayload::CreateLayer { .. } => payload,
        ChangePayload::DeleteLayer { layer } => ChangePayload::DeleteLayer {
            layer: require_layer(state, kind, layer.id)?.clone(),
        },
        ChangePayload::UpdateLayer {
            layer_id, changes, ..
        } => {
            let live = require_layer(state, kind, layer_id)?;
            ChangePayload::UpdateLayer {
                layer_id,
                previous: layer_previous(&changes, live),
                changes,
            }
        }
        ChangePayload::AddPostalCodes {
            layer_id, codes, ..
        } => ChangePayload::AddPostalCodes {
            layer_id,
            codes,
            previous: Some(require_layer(state, kind, layer_id)?.postal_codes.clone()),
        },
        ChangePayload::RemovePostalCodes {
            layer_id, codes, ..
        } => ChangePayload::RemovePostalCodes {
            layer_id,
            codes,
            previous: Some(require_layer(state, kind, layer_id)?.postal_codes.clone()),
        },
        ChangePayload::UpdateArea { changes, .. } => ChangePayload::UpdateArea {
            previous: area_previous(&changes, &state.area),
            changes,
        },
    };
    Ok(completed)
}

fn layer_previous(changes: &LayerPatch, live: &Layer) -> LayerPatch {
    LayerPatch {
        name: changes.name.as_ref().map(|_| live.name.clone()),
        color: changes.color.as_ref().map(|_| live.color.clone()),
        opacity: changes.opacity.map(|_| live.opacity),
        is_visible: changes.is_visible.map(|_| live.is_visible),
        order_index: changes.order_index.map(|_| live.order_index),
    }
}

fn area_previous(changes: &AreaPatch, live: &Area) -> AreaPatch {
    AreaPatch {
        name: changes.name.as_ref().map(|_| live.name.clone()),
        description: changes.description.as_ref().map(|_| live.description.clone()),
        granularity: changes.granularity.as_ref().map(|_| live.granularity.clone()),
    }
}

/// Check that a payload is well formed for the given area.
///
/// # Errors
///
/// Returns [`HistoryError::InvalidInput`] for an opacity above 100, an empty
/// layer name, an empty code batch, or a layer belonging to another area.
pub fn validate(area_id: AreaId, payload: &ChangePayload) -> Result<(), HistoryError> {
    match payload {
        ChangePayload::CreateLayer { layer } | ChangePayload::DeleteLayer { layer } => {
            validate_layer(area_id, layer)
        }
        ChangePayload::UpdateLayer {
            changes, previous, ..
        } => {
            validate_patch(changes)?;
            validate_patch(previous)
        }
        ChangePayload::AddPostalCodes { codes, .. }
        | ChangePayload::RemovePostalCodes { codes, .. } => {
            if codes.is_empty() {
                return Err(HistoryError::InvalidInput(String::from(
                    "postal code batch is empty",
                )));
            }
            if codes.iter().any(|c| c.trim().is_empty()) {
                return Err(HistoryError::InvalidInput(String::from(
                    "postal codes must not be blank",
                )));
            }
            Ok(())
        }
        ChangePayload::UpdateArea { changes, .. } => {
            if changes.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
                return Err(HistoryError::InvalidInput(String::from(
                    "area name must not be empty",
                )));
            }
            Ok(())
        }
    }
}

fn validate_layer(area_id: AreaId, layer: &Layer) -> Result<(), HistoryError> {
    if layer.area_id != area_id {
        return Err(HistoryError::InvalidInput(format!(
            "layer {} belongs to area {}, not {area_id}",
            layer.id, layer.area_id
        )));
    }
    validate_patch(&layer.fields())
}

fn validate_patch(patch: &LayerPatch) -> Result<(), HistoryError> {
    if patch.opacity.is_some_and(|o| o > MAX_OPACITY) {
        return Err(HistoryError::InvalidInput(format!(
            "opacity must be between 0 and {MAX_OPACITY}"
        )));
    }
    if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(HistoryError::InvalidInput(String::from(
            "layer name must not be empty",
        )));
    }
    Ok(())
}

fn require_layer(
    state: &WorkingState,
    kind: ChangeType,
    id: LayerId,
) -> Result<&Layer, HistoryError> {
    state
        .layer(id)
        .ok_or_else(|| HistoryError::stale(kind, format!("layer {id} no longer exists")))
}

fn push_codes(
    out: &mut Vec<EntityMutation>,
    layer_id: LayerId,
    codes: BTreeSet<String>,
    insert: bool,
) {
    if codes.is_empty() {
        return;
    }
    out.push(if insert {
        EntityMutation::InsertCodes { layer_id, codes }
    } else {
        EntityMutation::DeleteCodes { layer_id, codes }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use territory_types::{Area, AreaPatch, NewArea};

    use super::*;

    fn codes(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|c| (*c).to_owned()).collect()
    }

    fn area() -> Area {
        Area::new(NewArea {
            name: String::from("Hamburg"),
            description: None,
            granularity: String::from("5digit"),
        })
    }

    fn layer(area_id: AreaId, postal_codes: &[&str]) -> Layer {
        Layer {
            id: LayerId::new(),
            area_id,
            name: String::from("North"),
            color: String::from("#ff0000"),
            opacity: 80,
            is_visible: true,
            order_index: 0,
            postal_codes: codes(postal_codes),
        }
    }

    fn run(state: &mut WorkingState, payload: &ChangePayload, direction: Direction) {
        let mutations = plan(state, payload, direction).unwrap();
        state.apply_all(&mutations).unwrap();
    }

    /// Forward then inverse must give back the starting state.
    fn assert_roundtrip(mut state: WorkingState, payload: &ChangePayload) {
        let before = state.clone();
        run(&mut state, payload, Direction::Forward);
        assert_ne!(state, before, "forward effect changed nothing");
        run(&mut state, payload, Direction::Inverse);
        assert_eq!(state, before);
    }

    #[test]
    fn create_layer_roundtrip() {
        let area = area();
        let new_layer = layer(area.id, &["20095"]);
        assert_roundtrip(
            WorkingState::new(area, vec![]),
            &ChangePayload::CreateLayer { layer: new_layer },
        );
    }

    #[test]
    fn delete_layer_roundtrip_restores_codes() {
        let area = area();
        let existing = layer(area.id, &["20095", "20097"]);
        assert_roundtrip(
            WorkingState::new(area, vec![existing.clone()]),
            &ChangePayload::DeleteLayer { layer: existing },
        );
    }

    #[test]
    fn update_layer_roundtrip() {
        let area = area();
        let existing = layer(area.id, &[]);
        let payload = ChangePayload::UpdateLayer {
            layer_id: existing.id,
            changes: LayerPatch {
                color: Some(String::from("#0000ff")),
                opacity: Some(40),
                ..LayerPatch::default()
            },
            previous: LayerPatch {
                color: Some(existing.color.clone()),
                opacity: Some(existing.opacity),
                ..LayerPatch::default()
            },
        };
        assert_roundtrip(WorkingState::new(area, vec![existing]), &payload);
    }

    #[test]
    fn update_area_roundtrip() {
        let area = area();
        let payload = ChangePayload::UpdateArea {
            changes: AreaPatch {
                name: Some(String::from("Altona")),
                ..AreaPatch::default()
            },
            previous: AreaPatch {
                name: Some(area.name.clone()),
                ..AreaPatch::default()
            },
        };
        assert_roundtrip(WorkingState::new(area, vec![]), &payload);
    }

    #[test]
    fn add_codes_undo_keeps_codes_that_were_already_there() {
        let area = area();
        let existing = layer(area.id, &["10115"]);
        let id = existing.id;
        let payload = ChangePayload::AddPostalCodes {
            layer_id: id,
            codes: codes(&["10115", "10117"]),
            previous: Some(codes(&["10115"])),
        };
        let mut state = WorkingState::new(area, vec![existing]);

        run(&mut state, &payload, Direction::Forward);
        assert_eq!(state.layer(id).unwrap().postal_codes, codes(&["10115", "10117"]));

        run(&mut state, &payload, Direction::Inverse);
        assert_eq!(state.layer(id).unwrap().postal_codes, codes(&["10115"]));
    }

    #[test]
    fn remove_codes_undo_only_restores_codes_that_were_present() {
        let area = area();
        let existing = layer(area.id, &["10115", "10117"]);
        let id = existing.id;
        let payload = ChangePayload::RemovePostalCodes {
            layer_id: id,
            codes: codes(&["10117", "10119"]),
            previous: Some(codes(&["10115", "10117"])),
        };
        let mut state = WorkingState::new(area, vec![existing]);

        run(&mut state, &payload, Direction::Forward);
        assert_eq!(state.layer(id).unwrap().postal_codes, codes(&["10115"]));

        run(&mut state, &payload, Direction::Inverse);
        assert_eq!(state.layer(id).unwrap().postal_codes, codes(&["10115", "10117"]));
    }

    #[test]
    fn missing_layer_is_stale_and_plans_nothing() {
        let area = area();
        let payload = ChangePayload::AddPostalCodes {
            layer_id: LayerId::new(),
            codes: codes(&["10115"]),
            previous: None,
        };
        let state = WorkingState::new(area, vec![]);
        let result = plan(&state, &payload, Direction::Inverse);
        assert!(matches!(
            result,
            Err(HistoryError::StaleTarget {
                change_type: ChangeType::AddPostalCodes,
                ..
            })
        ));
    }

    #[test]
    fn recreating_existing_layer_is_stale() {
        let area = area();
        let existing = layer(area.id, &[]);
        let state = WorkingState::new(area, vec![existing.clone()]);
        let result = plan(
            &state,
            &ChangePayload::DeleteLayer { layer: existing },
            Direction::Inverse,
        );
        assert!(matches!(result, Err(HistoryError::StaleTarget { .. })));
    }

    #[test]
    fn live_reverse_replaces_caller_copies() {
        let area = area();
        let existing = layer(area.id, &["20095", "20097"]);
        let id = existing.id;
        let state = WorkingState::new(area, vec![existing.clone()]);

        let mut outdated = existing.clone();
        outdated.color = String::from("#000000");
        outdated.postal_codes.clear();
        let deleted = with_live_reverse(&state, ChangePayload::DeleteLayer { layer: outdated })
            .unwrap();
        assert_eq!(deleted, ChangePayload::DeleteLayer { layer: existing });

        let updated = with_live_reverse(
            &state,
            ChangePayload::UpdateLayer {
                layer_id: id,
                changes: LayerPatch {
                    color: Some(String::from("#0000ff")),
                    ..LayerPatch::default()
                },
                previous: LayerPatch::default(),
            },
        )
        .unwrap();
        assert!(matches!(
            updated,
            ChangePayload::UpdateLayer { ref previous, .. }
                if previous.color.as_deref() == Some("#ff0000") && previous.name.is_none()
        ));

        let added = with_live_reverse(
            &state,
            ChangePayload::AddPostalCodes {
                layer_id: id,
                codes: codes(&["20095", "20099"]),
                previous: None,
            },
        )
        .unwrap();
        assert!(matches!(
            added,
            ChangePayload::AddPostalCodes { previous: Some(ref before), .. }
                if *before == codes(&["20095", "20097"])
        ));
    }

    #[test]
    fn live_reverse_on_missing_layer_is_stale() {
        let area = area();
        let ghost = layer(area.id, &[]);
        let state = WorkingState::new(area, vec![]);
        assert!(matches!(
            with_live_reverse(&state, ChangePayload::DeleteLayer { layer: ghost }),
            Err(HistoryError::StaleTarget { .. })
        ));
    }

    #[test]
    fn validation_rejects_bad_input() {
        let area = area();
        let mut bright = layer(area.id, &[]);
        bright.opacity = 101;
        assert!(matches!(
            validate(area.id, &ChangePayload::CreateLayer { layer: bright }),
            Err(HistoryError::InvalidInput(_))
        ));

        let foreign = layer(AreaId::new(), &[]);
        assert!(validate(area.id, &ChangePayload::CreateLayer { layer: foreign }).is_err());

        let empty = ChangePayload::RemovePostalCodes {
            layer_id: LayerId::new(),
            codes: BTreeSet::new(),
            previous: None,
        };
        assert!(validate(area.id, &empty).is_err());

        let ok = layer(area.id, &["10115"]);
        assert!(validate(area.id, &ChangePayload::CreateLayer { layer: ok }).is_ok());
    }
}

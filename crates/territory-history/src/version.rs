//! Version snapshots: capture, restore, and comparison.
//!
//! A version is a full copy of the area's layers and codes. Capturing reads
//! the working state; restoring computes the writes that replace the live
//! layers with the snapshot's; comparing matches layers by name.

use std::collections::{BTreeMap, BTreeSet};

use territory_types::{
    LayerModification, LayerSnapshot, SnapshotData, VersionDiff, VersionSnapshot,
};

use crate::error::HistoryError;
use crate::state::{EntityMutation, WorkingState};

/// The version number following the area's current maximum.
///
/// # Errors
///
/// Returns [`HistoryError::Inconsistent`] if the number would overflow.
pub fn next_version_number(max: Option<i32>) -> Result<i32, HistoryError> {
    max.unwrap_or(0)
        .checked_add(1)
        .ok_or_else(|| HistoryError::Inconsistent(String::from("version number overflow")))
}

/// Default name of a version created without one.
pub fn default_name(version_number: i32) -> String {
    format!("Version {version_number}")
}

/// Default name of a branch created without one.
pub fn default_branch_name(parent_version_number: i32) -> String {
    format!("Branch of version {parent_version_number}")
}

/// Copy the area's live state into snapshot form.
pub fn capture(state: &WorkingState) -> SnapshotData {
    state.snapshot()
}

/// Writes that replace the live area with a snapshot.
///
/// Every live layer is deleted and every snapshot layer is re-inserted under
/// a fresh id. The area's scalar fields are reset and its version pointer is
/// set to `active_version`.
pub fn restore_plan(
    state: &WorkingState,
    snapshot: &SnapshotData,
    active_version: i32,
) -> Vec<EntityMutation> {
    let area_id = state.area.id;
    let mut out: Vec<EntityMutation> = state
        .layers
        .keys()
        .copied()
        .map(EntityMutation::DeleteLayer)
        .collect();

    out.extend(
        snapshot
            .layers
            .iter()
            .map(|layer| EntityMutation::InsertLayer(layer.to_layer(area_id))),
    );

    let mut area = state.area.clone();
    area.name.clone_from(&snapshot.area.name);
    area.description.clone_from(&snapshot.area.description);
    area.granularity.clone_from(&snapshot.area.granularity);
    area.current_version_number = Some(active_version);
    out.push(EntityMutation::UpdateArea(area));

    out
}

/// Compare two versions, `a` as the older side and `b` as the newer.
pub fn compare_versions(a: &VersionSnapshot, b: &VersionSnapshot) -> VersionDiff {
    compare_snapshots(&a.snapshot, &b.snapshot)
}

/// Compare two snapshots, `old` against `new`.
///
/// Layers are matched by name; when a snapshot holds two layers with the
/// same name the first one wins. A matched layer counts as modified when its
/// color, opacity, or codes differ.
pub fn compare_snapshots(old: &SnapshotData, new: &SnapshotData) -> VersionDiff {
    let old_layers = by_name(&old.layers);
    let new_layers = by_name(&new.layers);

    let layers_added = new_layers
        .keys()
        .filter(|name| !old_layers.contains_key(*name))
        .map(|name| (*name).to_owned())
        .collect();
    let layers_removed = old_layers
        .keys()
        .filter(|name| !new_layers.contains_key(*name))
        .map(|name| (*name).to_owned())
        .collect();

    let layers_modified = old_layers
        .iter()
        .filter_map(|(name, before)| {
            let after = new_layers.get(name)?;
            let modification = LayerModification {
                name: (*name).to_owned(),
                color: (before.color != after.color)
                    .then(|| (before.color.clone(), after.color.clone())),
                opacity: (before.opacity != after.opacity)
                    .then_some((before.opacity, after.opacity)),
                codes_added: after
                    .postal_codes
                    .difference(&before.postal_codes)
                    .cloned()
                    .collect(),
                codes_removed: before
                    .postal_codes
                    .difference(&after.postal_codes)
                    .cloned()
                    .collect(),
            };
            let changed = modification.color.is_some()
                || modification.opacity.is_some()
                || !modification.codes_added.is_empty()
                || !modification.codes_removed.is_empty();
            changed.then_some(modification)
        })
        .collect();

    let old_codes = all_codes(old);
    let new_codes = all_codes(new);

    VersionDiff {
        layers_added,
        layers_removed,
        layers_modified,
        codes_added: new_codes.difference(&old_codes).cloned().collect(),
        codes_removed: old_codes.difference(&new_codes).cloned().collect(),
    }
}

fn by_name(layers: &[LayerSnapshot]) -> BTreeMap<&str, &LayerSnapshot> {
    let mut map = BTreeMap::new();
    for layer in layers {
        map.entry(layer.name.as_str()).or_insert(layer);
    }
    map
}

fn all_codes(snapshot: &SnapshotData) -> BTreeSet<String> {
    snapshot
        .layers
        .iter()
        .flat_map(|l| l.postal_codes.iter().cloned())
        .collect()
}

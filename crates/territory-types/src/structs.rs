//! Entity, snapshot, and query structs.
//!
//! Covers the live entities (`Area`, `Layer`), the partial-update patches
//! carried by change records, the immutable version snapshot, and the small
//! DTOs returned by the history entry points.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{AreaId, LayerId};

/// Highest allowed layer opacity.
pub const MAX_OPACITY: u8 = 100;

// ---------------------------------------------------------------------------
// Area
// ---------------------------------------------------------------------------

/// Top-level container of layers and versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Area {
    /// Unique area identifier.
    pub id: AreaId,
    /// Display name.
    pub name: String,
    /// Free-form description (empty when unset).
    pub description: String,
    /// Postal-code granularity tag (e.g. `5digit`, `3digit`).
    pub granularity: String,
    /// Number of the currently active version, `None` before the first
    /// version exists.
    pub current_version_number: Option<i32>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Area {
    /// Build a new area with no versions.
    pub fn new(input: NewArea) -> Self {
        let now = Utc::now();
        Self {
            id: AreaId::new(),
            name: input.name,
            description: input.description.unwrap_or_default(),
            granularity: input.granularity,
            current_version_number: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The area's scalar fields as a patch.
    pub fn fields(&self) -> AreaPatch {
        AreaPatch {
            name: Some(self.name.clone()),
            description: Some(self.description.clone()),
            granularity: Some(self.granularity.clone()),
        }
    }
}

/// Input for creating an area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NewArea {
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Postal-code granularity tag.
    pub granularity: String,
}

/// Partial update of an area's scalar fields.
///
/// `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AreaPatch {
    /// New name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New granularity tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<String>,
}

impl AreaPatch {
    /// Whether the patch changes nothing.
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.granularity.is_none()
    }

    /// Apply the patch to an area in place.
    pub fn apply_to(&self, area: &mut Area) {
        if let Some(name) = &self.name {
            area.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            area.description.clone_from(description);
        }
        if let Some(granularity) = &self.granularity {
            area.granularity.clone_from(granularity);
        }
    }
}

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// A named, styled group of postal-code assignments within an area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Layer {
    /// Unique layer identifier.
    pub id: LayerId,
    /// Owning area.
    pub area_id: AreaId,
    /// Display name.
    pub name: String,
    /// Fill color (e.g. `#ff0000`).
    pub color: String,
    /// Opacity from 0 to 100.
    pub opacity: u8,
    /// Whether the layer is drawn.
    pub is_visible: bool,
    /// Position in the area's layer list.
    pub order_index: i32,
    /// Postal codes assigned to this layer.
    #[serde(default)]
    pub postal_codes: BTreeSet<String>,
}

impl Layer {
    /// Copy this layer into an id-less snapshot.
    pub fn to_snapshot(&self) -> LayerSnapshot {
        LayerSnapshot {
            name: self.name.clone(),
            color: self.color.clone(),
            opacity: self.opacity,
            is_visible: self.is_visible,
            order_index: self.order_index,
            postal_codes: self.postal_codes.clone(),
        }
    }

    /// The layer's scalar fields as a patch.
    pub fn fields(&self) -> LayerPatch {
        LayerPatch {
            name: Some(self.name.clone()),
            color: Some(self.color.clone()),
            opacity: Some(self.opacity),
            is_visible: Some(self.is_visible),
            order_index: Some(self.order_index),
        }
    }
}

/// Partial update of a layer's scalar fields.
///
/// `None` leaves the field untouched. Postal codes are never part of a
/// layer patch; they change through code batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LayerPatch {
    /// New name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// New opacity (0 to 100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<u8>,
    /// New visibility flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_visible: Option<bool>,
    /// New order index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i32>,
}

impl LayerPatch {
    /// Whether the patch changes nothing.
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.color.is_none()
            && self.opacity.is_none()
            && self.is_visible.is_none()
            && self.order_index.is_none()
    }

    /// Apply the patch to a layer in place.
    pub fn apply_to(&self, layer: &mut Layer) {
        if let Some(name) = &self.name {
            layer.name.clone_from(name);
        }
        if let Some(color) = &self.color {
            layer.color.clone_from(color);
        }
        if let Some(opacity) = self.opacity {
            layer.opacity = opacity;
        }
        if let Some(is_visible) = self.is_visible {
            layer.is_visible = is_visible;
        }
        if let Some(order_index) = self.order_index {
            layer.order_index = order_index;
        }
    }
}

/// An area together with its layers, as currently stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AreaState {
    /// The area row.
    pub area: Area,
    /// The area's layers, ordered by `order_index` then name.
    pub layers: Vec<Layer>,
}

// ---------------------------------------------------------------------------
// Version snapshots
// ---------------------------------------------------------------------------

/// Scalar area fields captured in a version snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AreaSnapshot {
    /// Area name at snapshot time.
    pub name: String,
    /// Area description at snapshot time.
    pub description: String,
    /// Granularity tag at snapshot time.
    pub granularity: String,
}

/// A layer as captured in a version snapshot.
///
/// Carries no id: layer ids are reassigned when a snapshot is restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LayerSnapshot {
    /// Layer name.
    pub name: String,
    /// Fill color.
    pub color: String,
    /// Opacity from 0 to 100.
    pub opacity: u8,
    /// Visibility flag.
    pub is_visible: bool,
    /// Position in the layer list.
    pub order_index: i32,
    /// Assigned postal codes.
    pub postal_codes: BTreeSet<String>,
}

impl LayerSnapshot {
    /// Materialize the snapshot as a live layer with a fresh id.
    pub fn to_layer(&self, area_id: AreaId) -> Layer {
        Layer {
            id: LayerId::new(),
            area_id,
            name: self.name.clone(),
            color: self.color.clone(),
            opacity: self.opacity,
            is_visible: self.is_visible,
            order_index: self.order_index,
            postal_codes: self.postal_codes.clone(),
        }
    }
}

/// The full serialized state of an area held by a version.
///
/// This is a copy, not a reference: later edits to live layers never touch
/// a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SnapshotData {
    /// Area scalar fields.
    pub area: AreaSnapshot,
    /// All layers with their postal codes.
    pub layers: Vec<LayerSnapshot>,
}

/// An immutable, named checkpoint of an area.
///
/// Identified by `(area_id, version_number)`. Only `is_active` changes after
/// creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct VersionSnapshot {
    /// Owning area.
    pub area_id: AreaId,
    /// Per-area version number, starting at 1.
    pub version_number: i32,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// The captured state.
    pub snapshot: SnapshotData,
    /// Number of change records attributed to this version.
    pub change_count: i32,
    /// Optional free-form summary of the changes.
    pub changes_summary: Option<String>,
    /// Whether this is the area's active version.
    pub is_active: bool,
    /// Area of the version this one was branched from.
    pub parent_version_area_id: Option<AreaId>,
    /// Number of the version this one was branched from.
    pub parent_version_number: Option<i32>,
    /// Branch name, for versions created by restore-as-branch.
    pub branch_name: Option<String>,
    /// Author.
    pub created_by: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Input for creating a version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct VersionInput {
    /// Version name; defaults to `Version {n}`.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional summary of the changes since the last version.
    #[serde(default)]
    pub changes_summary: Option<String>,
    /// Author.
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Options for restoring a version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RestoreOptions {
    /// Create a new version branched from the restored one.
    #[serde(default)]
    pub create_branch: bool,
    /// Name of the branch (only used with `create_branch`).
    #[serde(default)]
    pub branch_name: Option<String>,
    /// Author of the branch version.
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Outcome of a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RestoreResult {
    /// The version whose snapshot was restored.
    pub restored_version_number: i32,
    /// The branch version created, if one was requested.
    pub new_version_number: Option<i32>,
}

/// Difference between two version snapshots.
///
/// Layers are matched by name, not id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct VersionDiff {
    /// Layer names present only in the newer snapshot.
    pub layers_added: Vec<String>,
    /// Layer names present only in the older snapshot.
    pub layers_removed: Vec<String>,
    /// Layers present in both but differing in style or codes.
    pub layers_modified: Vec<LayerModification>,
    /// Codes present anywhere in the newer snapshot but nowhere in the older.
    pub codes_added: BTreeSet<String>,
    /// Codes present anywhere in the older snapshot but nowhere in the newer.
    pub codes_removed: BTreeSet<String>,
}

impl VersionDiff {
    /// Whether the two snapshots are equivalent.
    pub fn is_empty(&self) -> bool {
        self.layers_added.is_empty()
            && self.layers_removed.is_empty()
            && self.layers_modified.is_empty()
            && self.codes_added.is_empty()
            && self.codes_removed.is_empty()
    }
}

/// How one layer differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LayerModification {
    /// The layer name both snapshots share.
    pub name: String,
    /// `(before, after)` colors when the color changed.
    pub color: Option<(String, String)>,
    /// `(before, after)` opacities when the opacity changed.
    pub opacity: Option<(u8, u8)>,
    /// Codes the layer gained.
    pub codes_added: BTreeSet<String>,
    /// Codes the layer lost.
    pub codes_removed: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// History queries
// ---------------------------------------------------------------------------

/// Undo/redo availability for an area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct UndoRedoStatus {
    /// Whether at least one change can be undone.
    pub can_undo: bool,
    /// Whether at least one change can be redone.
    pub can_redo: bool,
    /// Number of undoable changes.
    pub undo_count: usize,
    /// Number of redoable changes.
    pub redo_count: usize,
}

/// Filter for change-history queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HistoryFilter {
    /// Only records scoped to this version.
    #[serde(default)]
    pub version_number: Option<i32>,
    /// Maximum number of records returned.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Whether undone records are included.
    #[serde(default = "default_include_undone")]
    pub include_undone: bool,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            version_number: None,
            limit: None,
            include_undone: default_include_undone(),
        }
    }
}

const fn default_include_undone() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layer() -> Layer {
        Layer {
            id: LayerId::new(),
            area_id: AreaId::new(),
            name: String::from("North"),
            color: String::from("#ff0000"),
            opacity: 70,
            is_visible: true,
            order_index: 0,
            postal_codes: ["10115", "10117"].into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn layer_patch_only_touches_set_fields() {
        let mut layer = sample_layer();
        let patch = LayerPatch {
            color: Some(String::from("#00ff00")),
            ..LayerPatch::default()
        };
        patch.apply_to(&mut layer);
        assert_eq!(layer.color, "#00ff00");
        assert_eq!(layer.name, "North");
        assert_eq!(layer.opacity, 70);
    }

    #[test]
    fn full_fields_patch_restores_layer() {
        let original = sample_layer();
        let mut edited = original.clone();
        edited.name = String::from("South");
        edited.is_visible = false;
        original.fields().apply_to(&mut edited);
        assert_eq!(edited, original);
    }

    #[test]
    fn snapshot_roundtrip_keeps_content_but_not_id() {
        let layer = sample_layer();
        let restored = layer.to_snapshot().to_layer(layer.area_id);
        assert_ne!(restored.id, layer.id);
        assert_eq!(restored.postal_codes, layer.postal_codes);
        assert_eq!(restored.to_snapshot(), layer.to_snapshot());
    }

    #[test]
    fn history_filter_defaults_include_undone() {
        let filter: Option<HistoryFilter> = serde_json::from_str("{}").ok();
        assert_eq!(filter.as_ref().map(|f| f.include_undone), Some(true));
        assert_eq!(filter.and_then(|f| f.limit), None);
    }

    #[test]
    fn empty_patches_are_detected() {
        assert!(LayerPatch::default().is_empty());
        assert!(AreaPatch::default().is_empty());
        assert!(!AreaPatch {
            granularity: Some(String::from("3digit")),
            ..AreaPatch::default()
        }
        .is_empty());
    }
}

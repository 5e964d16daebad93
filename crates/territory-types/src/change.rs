//! Change records and their payloads.
//!
//! A change record's forward payload (`change_data`) and reverse payload
//! (`previous_data`) are modelled as one closed sum type, [`ChangePayload`],
//! with one variant per change kind. The loosely-typed document form only
//! exists at the storage boundary: [`ChangePayload::to_documents`] splits a
//! payload into its tag and two JSON documents, and
//! [`ChangePayload::from_documents`] reassembles it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::enums::{ChangeType, EntityType};
use crate::ids::{AreaId, ChangeId, LayerId};
use crate::structs::{AreaPatch, Layer, LayerPatch};

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The forward and reverse data of a change, keyed by change kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "change_type", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ChangePayload {
    /// A layer was created. Undo deletes it.
    CreateLayer {
        /// The created layer, including its initial postal codes.
        layer: Layer,
    },
    /// Layer fields changed. Undo re-applies `previous`.
    UpdateLayer {
        /// The layer that changed.
        layer_id: LayerId,
        /// New field values.
        changes: LayerPatch,
        /// Field values before the change.
        previous: LayerPatch,
    },
    /// A layer was deleted. Undo re-inserts it with its codes.
    DeleteLayer {
        /// The deleted layer as it was, including its postal codes.
        layer: Layer,
    },
    /// Postal codes were added to a layer. Undo removes them.
    AddPostalCodes {
        /// Target layer.
        layer_id: LayerId,
        /// Codes added.
        codes: BTreeSet<String>,
        /// The layer's full code set before the change, when known. Undo
        /// then only removes codes that were not already present.
        #[serde(default)]
        previous: Option<BTreeSet<String>>,
    },
    /// Postal codes were removed from a layer. Undo re-inserts them.
    RemovePostalCodes {
        /// Target layer.
        layer_id: LayerId,
        /// Codes removed.
        codes: BTreeSet<String>,
        /// The layer's full code set before the change, when known. Undo
        /// then only re-inserts codes that were actually present.
        #[serde(default)]
        previous: Option<BTreeSet<String>>,
    },
    /// Area fields changed. Undo re-applies `previous`.
    UpdateArea {
        /// New field values.
        changes: AreaPatch,
        /// Field values before the change.
        previous: AreaPatch,
    },
}

impl ChangePayload {
    /// The change kind tag.
    pub const fn change_type(&self) -> ChangeType {
        match self {
            Self::CreateLayer { .. } => ChangeType::CreateLayer,
            Self::UpdateLayer { .. } => ChangeType::UpdateLayer,
            Self::DeleteLayer { .. } => ChangeType::DeleteLayer,
            Self::AddPostalCodes { .. } => ChangeType::AddPostalCodes,
            Self::RemovePostalCodes { .. } => ChangeType::RemovePostalCodes,
            Self::UpdateArea { .. } => ChangeType::UpdateArea,
        }
    }

    /// The kind of entity touched.
    pub const fn entity_type(&self) -> EntityType {
        self.change_type().entity_type()
    }

    /// The layer touched, if any.
    pub const fn layer_id(&self) -> Option<LayerId> {
        match self {
            Self::CreateLayer { layer } | Self::DeleteLayer { layer } => Some(layer.id),
            Self::UpdateLayer { layer_id, .. }
            | Self::AddPostalCodes { layer_id, .. }
            | Self::RemovePostalCodes { layer_id, .. } => Some(*layer_id),
            Self::UpdateArea { .. } => None,
        }
    }

    /// The id of the touched entity: the layer for layer and code changes,
    /// the area itself for area changes.
    pub fn entity_id(&self, area_id: AreaId) -> Uuid {
        self.layer_id()
            .map_or_else(|| area_id.into_inner(), LayerId::into_inner)
    }

    /// Split the payload into its storage documents.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Json`] if a document cannot be serialized.
    pub fn to_documents(&self) -> Result<ChangeDocuments, PayloadError> {
        let change_type = self.change_type();
        let (change_data, previous_data) = match self {
            Self::CreateLayer { layer } => (serde_json::to_value(layer)?, None),
            Self::UpdateLayer {
                layer_id,
                changes,
                previous,
            } => (
                serde_json::to_value(LayerUpdateDoc {
                    layer_id: *layer_id,
                    changes: changes.clone(),
                })?,
                Some(serde_json::to_value(previous)?),
            ),
            Self::DeleteLayer { layer } => (
                serde_json::to_value(LayerRefDoc { layer_id: layer.id })?,
                Some(serde_json::to_value(layer)?),
            ),
            Self::AddPostalCodes {
                layer_id,
                codes,
                previous,
            }
            | Self::RemovePostalCodes {
                layer_id,
                codes,
                previous,
            } => (
                serde_json::to_value(CodeBatchDoc {
                    layer_id: *layer_id,
                    codes: codes.clone(),
                })?,
                previous
                    .as_ref()
                    .map(|codes| {
                        serde_json::to_value(CodeSetDoc {
                            codes: codes.clone(),
                        })
                    })
                    .transpose()?,
            ),
            Self::UpdateArea { changes, previous } => (
                serde_json::to_value(changes)?,
                Some(serde_json::to_value(previous)?),
            ),
        };

        Ok(ChangeDocuments {
            change_type,
            change_data,
            previous_data,
        })
    }

    /// Reassemble a payload from its storage documents.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Json`] if a document does not match the shape
    /// its tag requires, or [`PayloadError::MissingPrevious`] if a kind that
    /// needs reverse data has none.
    pub fn from_documents(docs: ChangeDocuments) -> Result<Self, PayloadError> {
        let ChangeDocuments {
            change_type,
            change_data,
            previous_data,
        } = docs;

        let require_previous = |previous: Option<serde_json::Value>| {
            previous.ok_or(PayloadError::MissingPrevious(change_type))
        };

        let payload = match change_type {
            ChangeType::CreateLayer => Self::CreateLayer {
                layer: serde_json::from_value(change_data)?,
            },
            ChangeType::UpdateLayer => {
                let doc: LayerUpdateDoc = serde_json::from_value(change_data)?;
                Self::UpdateLayer {
                    layer_id: doc.layer_id,
                    changes: doc.changes,
                    previous: serde_json::from_value(require_previous(previous_data)?)?,
                }
            }
            ChangeType::DeleteLayer => {
                let layer: Layer = serde_json::from_value(require_previous(previous_data)?)?;
                let doc: LayerRefDoc = serde_json::from_value(change_data)?;
                if doc.layer_id != layer.id {
                    return Err(PayloadError::Mismatch(change_type));
                }
                Self::DeleteLayer { layer }
            }
            ChangeType::AddPostalCodes | ChangeType::RemovePostalCodes => {
                let doc: CodeBatchDoc = serde_json::from_value(change_data)?;
                let previous = previous_data
                    .map(serde_json::from_value::<CodeSetDoc>)
                    .transpose()?
                    .map(|set| set.codes);
                if change_type == ChangeType::AddPostalCodes {
                    Self::AddPostalCodes {
                        layer_id: doc.layer_id,
                        codes: doc.codes,
                        previous,
                    }
                } else {
                    Self::RemovePostalCodes {
                        layer_id: doc.layer_id,
                        codes: doc.codes,
                        previous,
                    }
                }
            }
            ChangeType::UpdateArea => Self::UpdateArea {
                changes: serde_json::from_value(change_data)?,
                previous: serde_json::from_value(require_previous(previous_data)?)?,
            },
        };

        Ok(payload)
    }
}

/// Errors converting between a [`ChangePayload`] and its documents.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// A document did not have the expected shape.
    #[error("malformed change document: {0}")]
    Json(#[from] serde_json::Error),

    /// A change kind that needs reverse data had none.
    #[error("{0} change is missing its previous data")]
    MissingPrevious(ChangeType),

    /// The forward and reverse documents refer to different entities.
    #[error("{0} change documents refer to different entities")]
    Mismatch(ChangeType),
}

/// The storage form of a change payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDocuments {
    /// The change kind tag.
    pub change_type: ChangeType,
    /// Forward payload.
    pub change_data: serde_json::Value,
    /// Reverse payload.
    pub previous_data: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct LayerUpdateDoc {
    layer_id: LayerId,
    changes: LayerPatch,
}

#[derive(Serialize, Deserialize)]
struct LayerRefDoc {
    layer_id: LayerId,
}

#[derive(Serialize, Deserialize)]
struct CodeBatchDoc {
    layer_id: LayerId,
    codes: BTreeSet<String>,
}

#[derive(Serialize, Deserialize)]
struct CodeSetDoc {
    codes: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Input to `record_change`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ChangeInput {
    /// What changed, forward and reverse.
    pub payload: ChangePayload,
    /// Author.
    #[serde(default)]
    pub created_by: Option<String>,
}

impl ChangeInput {
    /// Input without an author.
    pub const fn new(payload: ChangePayload) -> Self {
        Self {
            payload,
            created_by: None,
        }
    }

    /// Set the author.
    #[must_use]
    pub fn by(mut self, author: impl Into<String>) -> Self {
        self.created_by = Some(author.into());
        self
    }
}

/// One immutable entry of the change log.
///
/// Only `is_undone` changes after creation (plus the one-time version
/// stamp applied when the first version after the change is created).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ChangeRecord {
    /// Unique change id.
    pub id: ChangeId,
    /// Owning area.
    pub area_id: AreaId,
    /// Area of the version scope; `None` while unversioned.
    pub version_area_id: Option<AreaId>,
    /// Version number of the scope; `None` while unversioned.
    pub version_number: Option<i32>,
    /// Position within the scope, starting at 1.
    pub sequence_number: i64,
    /// Kind of entity touched.
    pub entity_type: EntityType,
    /// Id of the entity touched.
    pub entity_id: Option<Uuid>,
    /// Forward and reverse data.
    pub payload: ChangePayload,
    /// Whether the change is currently reversed.
    pub is_undone: bool,
    /// Author.
    pub created_by: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// The change kind tag.
    pub const fn change_type(&self) -> ChangeType {
        self.payload.change_type()
    }

    /// The version scope `(version_area_id, version_number)`, or `None`
    /// while unversioned.
    pub fn scope(&self) -> Option<(AreaId, i32)> {
        self.version_area_id.zip(self.version_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|c| (*c).to_owned()).collect()
    }

    fn layer() -> Layer {
        Layer {
            id: LayerId::new(),
            area_id: AreaId::new(),
            name: String::from("L1"),
            color: String::from("#3366ff"),
            opacity: 50,
            is_visible: true,
            order_index: 2,
            postal_codes: codes(&["10115"]),
        }
    }

    #[test]
    fn delete_layer_keeps_full_layer_as_previous_data() {
        let layer = layer();
        let payload = ChangePayload::DeleteLayer {
            layer: layer.clone(),
        };
        let docs = payload.to_documents().ok();
        let previous = docs.as_ref().and_then(|d| d.previous_data.clone());
        assert_eq!(
            previous.and_then(|v| v.get("name").cloned()),
            Some(serde_json::json!("L1"))
        );
        let restored = docs.and_then(|d| ChangePayload::from_documents(d).ok());
        assert_eq!(restored, Some(payload));
    }

    #[test]
    fn code_batch_documents_match_wire_shape() {
        let layer_id = LayerId::new();
        let payload = ChangePayload::AddPostalCodes {
            layer_id,
            codes: codes(&["10119"]),
            previous: Some(codes(&["10115", "10117"])),
        };
        let docs = payload.to_documents().ok();
        assert_eq!(
            docs.as_ref().map(|d| d.change_data.clone()),
            Some(serde_json::json!({ "layer_id": layer_id, "codes": ["10119"] }))
        );
        assert_eq!(
            docs.and_then(|d| d.previous_data),
            Some(serde_json::json!({ "codes": ["10115", "10117"] }))
        );
    }

    #[test]
    fn update_without_previous_is_rejected() {
        let docs = ChangeDocuments {
            change_type: ChangeType::UpdateArea,
            change_data: serde_json::json!({ "name": "Berlin" }),
            previous_data: None,
        };
        assert!(matches!(
            ChangePayload::from_documents(docs),
            Err(PayloadError::MissingPrevious(ChangeType::UpdateArea))
        ));
    }

    #[test]
    fn malformed_document_is_an_error_not_a_panic() {
        let docs = ChangeDocuments {
            change_type: ChangeType::CreateLayer,
            change_data: serde_json::json!({ "unexpected": true }),
            previous_data: None,
        };
        assert!(matches!(
            ChangePayload::from_documents(docs),
            Err(PayloadError::Json(_))
        ));
    }

    #[test]
    fn payload_json_is_tagged_by_change_type() {
        let payload = ChangePayload::UpdateArea {
            changes: AreaPatch {
                name: Some(String::from("Mitte")),
                ..AreaPatch::default()
            },
            previous: AreaPatch {
                name: Some(String::from("Berlin")),
                ..AreaPatch::default()
            },
        };
        let json = serde_json::to_value(&payload).ok();
        assert_eq!(
            json.as_ref().and_then(|v| v.get("change_type").cloned()),
            Some(serde_json::json!("update_area"))
        );
    }

    #[test]
    fn area_changes_point_at_the_area() {
        let area_id = AreaId::new();
        let payload = ChangePayload::UpdateArea {
            changes: AreaPatch::default(),
            previous: AreaPatch::default(),
        };
        assert_eq!(payload.entity_id(area_id), area_id.into_inner());
        assert_eq!(payload.entity_type(), EntityType::Area);
    }
}

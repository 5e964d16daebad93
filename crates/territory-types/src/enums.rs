//! Enumeration types shared across the workspace.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Change kinds
// ---------------------------------------------------------------------------

/// The six recognized change kinds.
///
/// Every change record carries exactly one of these tags. The tag decides
/// how the record's forward and inverse effects are applied to the entity
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ChangeType {
    /// A layer (and its postal codes) was created.
    CreateLayer,
    /// Scalar fields of a layer were changed.
    UpdateLayer,
    /// A layer (and its postal codes) was deleted.
    DeleteLayer,
    /// A batch of postal codes was added to a layer.
    AddPostalCodes,
    /// A batch of postal codes was removed from a layer.
    RemovePostalCodes,
    /// Scalar fields of the area were changed.
    UpdateArea,
}

impl ChangeType {
    /// All change kinds, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::CreateLayer,
        Self::UpdateLayer,
        Self::DeleteLayer,
        Self::AddPostalCodes,
        Self::RemovePostalCodes,
        Self::UpdateArea,
    ];

    /// The canonical snake-case tag, as stored and serialized.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateLayer => "create_layer",
            Self::UpdateLayer => "update_layer",
            Self::DeleteLayer => "delete_layer",
            Self::AddPostalCodes => "add_postal_codes",
            Self::RemovePostalCodes => "remove_postal_codes",
            Self::UpdateArea => "update_area",
        }
    }

    /// Parse a snake-case tag. Returns `None` for unknown tags.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// The kind of entity a change of this type touches.
    pub const fn entity_type(self) -> EntityType {
        match self {
            Self::CreateLayer | Self::UpdateLayer | Self::DeleteLayer => EntityType::Layer,
            Self::AddPostalCodes | Self::RemovePostalCodes => EntityType::PostalCodes,
            Self::UpdateArea => EntityType::Area,
        }
    }
}

impl core::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Entity kinds
// ---------------------------------------------------------------------------

/// The kind of entity a change record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EntityType {
    /// The area itself.
    Area,
    /// A layer of the area.
    Layer,
    /// The postal-code assignments of a layer.
    PostalCodes,
}

impl EntityType {
    /// The canonical snake-case tag, as stored and serialized.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Area => "area",
            Self::Layer => "layer",
            Self::PostalCodes => "postal_codes",
        }
    }

    /// Parse a snake-case tag. Returns `None` for unknown tags.
    pub fn parse(tag: &str) -> Option<Self> {
        [Self::Area, Self::Layer, Self::PostalCodes]
            .into_iter()
            .find(|kind| kind.as_str() == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_type_tags_match_serde() {
        for kind in ChangeType::ALL {
            let json = serde_json::to_string(&kind).unwrap_or_default();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(ChangeType::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(ChangeType::parse("rename_everything"), None);
        assert_eq!(EntityType::parse(""), None);
    }

    #[test]
    fn code_batches_target_postal_codes() {
        assert_eq!(
            ChangeType::AddPostalCodes.entity_type(),
            EntityType::PostalCodes
        );
        assert_eq!(ChangeType::UpdateArea.entity_type(), EntityType::Area);
    }
}

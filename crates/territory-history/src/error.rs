//! Error taxonomy for the change-tracking and versioning engine.
//!
//! Every failure is returned as a [`HistoryError`] value. None of them is
//! fatal to the caller's session: after any failed undo, redo, or version
//! call the area stays usable and its history stays readable.

use territory_types::{AreaId, ChangeId, ChangeType, LayerId};

/// Errors returned by the history engine and its stores.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The area does not exist.
    #[error("area {0} not found")]
    AreaNotFound(AreaId),

    /// The layer does not exist in the area.
    #[error("layer {0} not found")]
    LayerNotFound(LayerId),

    /// No version with this number exists for the area.
    #[error("version {version_number} not found for area {area_id}")]
    VersionNotFound {
        /// The area queried.
        area_id: AreaId,
        /// The missing version number.
        version_number: i32,
    },

    /// The undo stack is empty.
    #[error("no changes to undo")]
    NoChangesToUndo,

    /// The redo stack is empty.
    #[error("no changes to redo")]
    NoChangesToRedo,

    /// The active version cannot be deleted.
    #[error("cannot delete active version {0}")]
    CannotDeleteActiveVersion(i32),

    /// The entity a change targets no longer matches what the change
    /// expects. Nothing was written and the stacks are unchanged.
    #[error("stale target for {change_type} change {change_id:?}: {reason}")]
    StaleTarget {
        /// The change being applied, when it was already recorded.
        change_id: Option<ChangeId>,
        /// Kind of the change being applied.
        change_type: ChangeType,
        /// What did not match.
        reason: String,
    },

    /// The request is malformed (bad opacity, empty batch, wrong area).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The backing store failed. The transaction was rolled back.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Stored history contradicts itself (e.g. a stack references a missing
    /// change record).
    #[error("history is inconsistent: {0}")]
    Inconsistent(String),
}

/// Coarse classification of a [`HistoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An area, layer, or version is missing.
    NotFound,
    /// Undo or redo with nothing to pop.
    EmptyStack,
    /// The operation is not allowed in the current state.
    InvalidOperation,
    /// The change no longer applies to the live entities.
    StaleTarget,
    /// The store failed.
    PersistenceFailure,
    /// Internal consistency violation.
    Internal,
}

impl ErrorKind {
    /// Stable snake-case name, used in API error envelopes.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::EmptyStack => "empty_stack",
            Self::InvalidOperation => "invalid_operation",
            Self::StaleTarget => "stale_target",
            Self::PersistenceFailure => "persistence_failure",
            Self::Internal => "internal",
        }
    }
}

impl HistoryError {
    /// The coarse class of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AreaNotFound(_) | Self::LayerNotFound(_) | Self::VersionNotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::NoChangesToUndo | Self::NoChangesToRedo => ErrorKind::EmptyStack,
            Self::CannotDeleteActiveVersion(_) | Self::InvalidInput(_) => {
                ErrorKind::InvalidOperation
            }
            Self::StaleTarget { .. } => ErrorKind::StaleTarget,
            Self::Persistence(_) => ErrorKind::PersistenceFailure,
            Self::Inconsistent(_) => ErrorKind::Internal,
        }
    }

    /// Build a [`HistoryError::StaleTarget`] for a change kind.
    pub fn stale(change_type: ChangeType, reason: impl Into<String>) -> Self {
        Self::StaleTarget {
            change_id: None,
            change_type,
            reason: reason.into(),
        }
    }

    /// Attach the id of the recorded change to a stale-target error.
    #[must_use]
    pub fn for_change(self, id: ChangeId) -> Self {
        match self {
            Self::StaleTarget {
                change_type,
                reason,
                ..
            } => Self::StaleTarget {
                change_id: Some(id),
                change_type,
                reason,
            },
            other => other,
        }
    }
}

impl From<territory_types::PayloadError> for HistoryError {
    fn from(e: territory_types::PayloadError) -> Self {
        Self::Persistence(format!("stored change payload: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(HistoryError::NoChangesToRedo.kind(), ErrorKind::EmptyStack);
        assert_eq!(
            HistoryError::CannotDeleteActiveVersion(1).kind(),
            ErrorKind::InvalidOperation
        );
        assert_eq!(
            HistoryError::VersionNotFound {
                area_id: AreaId::new(),
                version_number: 9
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            HistoryError::Persistence(String::from("io")).kind(),
            ErrorKind::PersistenceFailure
        );
    }

    #[test]
    fn for_change_only_touches_stale_targets() {
        let id = ChangeId::new();
        let stale = HistoryError::stale(ChangeType::UpdateLayer, "layer is gone").for_change(id);
        assert!(matches!(
            stale,
            HistoryError::StaleTarget { change_id: Some(found), .. } if found == id
        ));

        let other = HistoryError::NoChangesToUndo.for_change(id);
        assert!(matches!(other, HistoryError::NoChangesToUndo));
    }
}

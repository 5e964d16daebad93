//! Shared type definitions for the territory workspace.
//!
//! This crate is the single source of truth for the area/layer model, the
//! change log records, and the version snapshots. Types defined here flow
//! downstream to `TypeScript` via `ts-rs` for the map editor.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for areas, layers, and change records
//! - [`enums`] -- Change kinds and entity kinds
//! - [`structs`] -- Areas, layers, patches, version snapshots, query DTOs
//! - [`change`] -- Change payloads, their storage documents, change records

pub mod change;
pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use change::{ChangeDocuments, ChangeInput, ChangePayload, ChangeRecord, PayloadError};
pub use enums::{ChangeType, EntityType};
pub use ids::{AreaId, ChangeId, LayerId};
pub use structs::{
    Area, AreaPatch, AreaSnapshot, AreaState, HistoryFilter, Layer, LayerModification,
    LayerPatch, LayerSnapshot, MAX_OPACITY, NewArea, RestoreOptions, RestoreResult, SnapshotData,
    UndoRedoStatus, VersionDiff, VersionInput, VersionSnapshot,
};

//! Change tracking, undo/redo, and versioning for territory areas.
//!
//! Every edit to an area's layers and postal codes is recorded as an
//! immutable [`ChangeRecord`](territory_types::ChangeRecord) in an
//! append-only log. Each area keeps an undo and a redo stack over its
//! records, and any number of named version snapshots, exactly one of which
//! is active once the first version exists.
//!
//! # Architecture
//!
//! - [`applier`] -- Pure forward/inverse planning for the six change kinds.
//! - [`state`] -- [`WorkingState`], the in-transaction view of an area, and
//!   the [`EntityMutation`] writes a plan consists of.
//! - [`stack`] -- [`UndoRedoStack`] bookkeeping and consistency checks.
//! - [`change_log`] -- Sequence numbering and history selection.
//! - [`version`] -- Snapshot capture, restore planning, and diffs.
//! - [`store`] -- The [`HistoryStore`] / [`StoreTx`] seam.
//! - [`memory`] -- [`MemoryStore`], an in-process store.
//! - [`service`] -- [`HistoryService`], the public entry points.
//!
//! # Transactions
//!
//! Each entry point runs in a single store transaction that first locks
//! the area. Sequence numbers, stacks, and version numbers are computed
//! under that lock and written together with the entity changes, so a
//! failure at any step leaves no trace.
//!
//! # Usage
//!
//! ```
//! use std::collections::BTreeSet;
//!
//! use territory_history::{HistoryService, MemoryStore};
//! use territory_types::{ChangeInput, ChangePayload, Layer, LayerId, NewArea};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), territory_history::HistoryError> {
//! let service = HistoryService::new(MemoryStore::new());
//! let area = service
//!     .create_area(NewArea {
//!         name: String::from("Berlin"),
//!         description: None,
//!         granularity: String::from("5digit"),
//!     })
//!     .await?;
//!
//! let layer = Layer {
//!     id: LayerId::new(),
//!     area_id: area.id,
//!     name: String::from("Mitte"),
//!     color: String::from("#ff0000"),
//!     opacity: 70,
//!     is_visible: true,
//!     order_index: 0,
//!     postal_codes: BTreeSet::from([String::from("10115")]),
//! };
//! service
//!     .apply_change(area.id, ChangeInput::new(ChangePayload::CreateLayer { layer }))
//!     .await?;
//!
//! service.undo(area.id).await?;
//! assert!(service.area_state(area.id).await?.layers.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod applier;
pub mod change_log;
pub mod error;
pub mod memory;
pub mod service;
pub mod stack;
pub mod state;
pub mod store;
pub mod version;

pub use applier::Direction;
pub use error::{ErrorKind, HistoryError};
pub use memory::{MemoryStore, MemoryTx};
pub use service::HistoryService;
pub use stack::UndoRedoStack;
pub use state::{EntityMutation, WorkingState};
pub use store::{HistoryStore, StoreTx};

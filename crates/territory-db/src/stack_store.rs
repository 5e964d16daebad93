//! Operations on the `undo_redo_stacks` table.
//!
//! One row per area, with both stacks as `UUID[]` (bottom first). A
//! missing row reads as two empty stacks.

use sqlx::PgConnection;
use territory_history::UndoRedoStack;
use territory_types::{AreaId, ChangeId};
use uuid::Uuid;

use crate::error::DbError;

/// Load the area's stacks.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the query fails.
pub async fn load(conn: &mut PgConnection, area_id: AreaId) -> Result<UndoRedoStack, DbError> {
    let row: Option<(Vec<Uuid>, Vec<Uuid>)> = sqlx::query_as(
        "SELECT undo_stack, redo_stack FROM undo_redo_stacks WHERE area_id = $1",
    )
    .bind(area_id.into_inner())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map_or_else(UndoRedoStack::default, |(undo, redo)| {
        UndoRedoStack::from_parts(
            undo.into_iter().map(ChangeId::from).collect(),
            redo.into_iter().map(ChangeId::from).collect(),
        )
    }))
}

/// Upsert the area's stacks.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the upsert fails.
pub async fn save(
    conn: &mut PgConnection,
    area_id: AreaId,
    stack: &UndoRedoStack,
) -> Result<(), DbError> {
    let undo: Vec<Uuid> = stack.undo_ids().iter().copied().map(ChangeId::into_inner).collect();
    let redo: Vec<Uuid> = stack.redo_ids().iter().copied().map(ChangeId::into_inner).collect();

    sqlx::query(
        r"INSERT INTO undo_redo_stacks (area_id, undo_stack, redo_stack, updated_at)
          VALUES ($1, $2, $3, now())
          ON CONFLICT (area_id)
          DO UPDATE SET undo_stack = EXCLUDED.undo_stack,
                        redo_stack = EXCLUDED.redo_stack,
                        updated_at = now()",
    )
    .bind(area_id.into_inner())
    .bind(undo)
    .bind(redo)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

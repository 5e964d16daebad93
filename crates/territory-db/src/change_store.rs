//! Operations on the `change_records` table.
//!
//! A change's payload is stored as its tag (`change_type` enum column) and
//! two JSONB documents. The typed [`ChangePayload`] is rebuilt on read;
//! a row whose documents do not match its tag surfaces as
//! [`DbError::Payload`] rather than being skipped.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use territory_types::{
    AreaId, ChangeDocuments, ChangeId, ChangePayload, ChangeRecord, ChangeType, EntityType,
    HistoryFilter,
};
use uuid::Uuid;

use crate::error::DbError;

const SELECT_COLUMNS: &str = r"SELECT id, area_id, version_area_id, version_number, sequence_number,
                 change_type::TEXT AS change_type, entity_type::TEXT AS entity_type,
                 entity_id, change_data, previous_data, is_undone, created_by, created_at
          FROM change_records";

/// Append a change record.
///
/// # Errors
///
/// Returns [`DbError::Serialization`] if the payload cannot be encoded, or
/// [`DbError::Postgres`] if the insert fails (including a duplicate
/// sequence number within the scope).
pub async fn insert(conn: &mut PgConnection, record: &ChangeRecord) -> Result<(), DbError> {
    let docs = record.payload.to_documents()?;

    sqlx::query(
        r"INSERT INTO change_records
              (id, area_id, version_area_id, version_number, sequence_number,
               change_type, entity_type, entity_id, change_data, previous_data,
               is_undone, created_by, created_at)
          VALUES ($1, $2, $3, $4, $5, $6::change_type, $7::entity_type, $8, $9, $10, $11, $12, $13)",
    )
    .bind(record.id.into_inner())
    .bind(record.area_id.into_inner())
    .bind(record.version_area_id.map(AreaId::into_inner))
    .bind(record.version_number)
    .bind(record.sequence_number)
    .bind(docs.change_type.as_str())
    .bind(record.entity_type.as_str())
    .bind(record.entity_id)
    .bind(&docs.change_data)
    .bind(&docs.previous_data)
    .bind(record.is_undone)
    .bind(&record.created_by)
    .bind(record.created_at)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(
        change_id = %record.id,
        area_id = %record.area_id,
        sequence_number = record.sequence_number,
        "Inserted change record"
    );
    Ok(())
}

/// Highest sequence number in a scope (`None` = unversioned).
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the query fails.
pub async fn max_sequence(
    conn: &mut PgConnection,
    area_id: AreaId,
    version_number: Option<i32>,
) -> Result<Option<i64>, DbError> {
    let max: Option<i64> = sqlx::query_scalar(
        r"SELECT MAX(sequence_number) FROM change_records
          WHERE area_id = $1 AND version_number IS NOT DISTINCT FROM $2",
    )
    .bind(area_id.into_inner())
    .bind(version_number)
    .fetch_one(&mut *conn)
    .await?;
    Ok(max)
}

/// Fetch one record of an area.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the query fails, or a decode error if
/// the row is malformed.
pub async fn get(
    conn: &mut PgConnection,
    area_id: AreaId,
    change_id: ChangeId,
) -> Result<Option<ChangeRecord>, DbError> {
    let sql = format!("{SELECT_COLUMNS} WHERE area_id = $1 AND id = $2");
    let row = sqlx::query_as::<_, ChangeRow>(&sql)
        .bind(area_id.into_inner())
        .bind(change_id.into_inner())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(ChangeRow::into_record).transpose()
}

/// Set a record's undone flag.
///
/// # Errors
///
/// Returns [`DbError::MissingRow`] if no record has this id.
pub async fn set_undone(
    conn: &mut PgConnection,
    change_id: ChangeId,
    is_undone: bool,
) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE change_records SET is_undone = $2 WHERE id = $1")
        .bind(change_id.into_inner())
        .bind(is_undone)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::MissingRow(format!("change {change_id}")));
    }
    Ok(())
}

/// Query an area's history, newest first.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the query fails, or a decode error if
/// a row is malformed.
pub async fn list(
    conn: &mut PgConnection,
    area_id: AreaId,
    filter: &HistoryFilter,
) -> Result<Vec<ChangeRecord>, DbError> {
    let limit = filter
        .limit
        .map(|l| i64::try_from(l).unwrap_or(i64::MAX));
    let sql = format!(
        "{SELECT_COLUMNS}
          WHERE area_id = $1
            AND ($2::INTEGER IS NULL OR version_number = $2)
            AND ($3 OR NOT is_undone)
          ORDER BY sequence_number DESC, created_at DESC
          LIMIT $4"
    );
    let rows = sqlx::query_as::<_, ChangeRow>(&sql)
        .bind(area_id.into_inner())
        .bind(filter.version_number)
        .bind(filter.include_undone)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(ChangeRow::into_record).collect()
}

/// Number of records not yet attributed to a version.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the query fails.
pub async fn count_unversioned(conn: &mut PgConnection, area_id: AreaId) -> Result<i64, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM change_records WHERE area_id = $1 AND version_number IS NULL",
    )
    .bind(area_id.into_inner())
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// Attribute every unversioned record of the area to a version.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the update fails.
pub async fn stamp_unversioned(
    conn: &mut PgConnection,
    area_id: AreaId,
    version_number: i32,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r"UPDATE change_records
          SET version_area_id = $1, version_number = $2
          WHERE area_id = $1 AND version_number IS NULL",
    )
    .bind(area_id.into_inner())
    .bind(version_number)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(
        %area_id,
        version_number,
        stamped = result.rows_affected(),
        "Stamped unversioned changes"
    );
    Ok(())
}

/// Delete the records scoped to a version, returning their ids.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the delete fails.
pub async fn delete_in_version(
    conn: &mut PgConnection,
    area_id: AreaId,
    version_number: i32,
) -> Result<Vec<ChangeId>, DbError> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r"DELETE FROM change_records
          WHERE area_id = $1 AND version_area_id = $1 AND version_number = $2
          RETURNING id",
    )
    .bind(area_id.into_inner())
    .bind(version_number)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().map(ChangeId::from).collect())
}

// =============================================================================
// Row type
// =============================================================================

/// A row from the `change_records` table, enums read as text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChangeRow {
    /// Change id.
    pub id: Uuid,
    /// Owning area.
    pub area_id: Uuid,
    /// Scope area, `None` while unversioned.
    pub version_area_id: Option<Uuid>,
    /// Scope version, `None` while unversioned.
    pub version_number: Option<i32>,
    /// Position in the scope.
    pub sequence_number: i64,
    /// Change kind tag.
    pub change_type: String,
    /// Entity kind tag.
    pub entity_type: String,
    /// Touched entity.
    pub entity_id: Option<Uuid>,
    /// Forward document.
    pub change_data: serde_json::Value,
    /// Reverse document.
    pub previous_data: Option<serde_json::Value>,
    /// Undone flag.
    pub is_undone: bool,
    /// Author.
    pub created_by: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ChangeRow {
    /// Rebuild the typed record.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Corrupt`] for an unknown tag, or
    /// [`DbError::Payload`] if the documents do not fit the tag.
    pub fn into_record(self) -> Result<ChangeRecord, DbError> {
        let change_type = ChangeType::parse(&self.change_type).ok_or_else(|| {
            DbError::Corrupt(format!("unknown change type {:?}", self.change_type))
        })?;
        let entity_type = EntityType::parse(&self.entity_type).ok_or_else(|| {
            DbError::Corrupt(format!("unknown entity type {:?}", self.entity_type))
        })?;
        let payload = ChangePayload::from_documents(ChangeDocuments {
            change_type,
            change_data: self.change_data,
            previous_data: self.previous_data,
        })?;

        Ok(ChangeRecord {
            id: ChangeId::from(self.id),
            area_id: AreaId::from(self.area_id),
            version_area_id: self.version_area_id.map(AreaId::from),
            version_number: self.version_number,
            sequence_number: self.sequence_number,
            entity_type,
            entity_id: self.entity_id,
            payload,
            is_undone: self.is_undone,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use territory_types::AreaPatch;

    use super::*;

    fn row_for(payload: &ChangePayload) -> ChangeRow {
        let docs = payload.to_documents().unwrap();
        ChangeRow {
            id: Uuid::now_v7(),
            area_id: Uuid::now_v7(),
            version_area_id: None,
            version_number: None,
            sequence_number: 1,
            change_type: docs.change_type.as_str().to_owned(),
            entity_type: payload.entity_type().as_str().to_owned(),
            entity_id: None,
            change_data: docs.change_data,
            previous_data: docs.previous_data,
            is_undone: false,
            created_by: Some(String::from("alice")),
            created_at: Utc::now(),
        }
    }

    fn rename() -> ChangePayload {
        ChangePayload::UpdateArea {
            changes: AreaPatch {
                name: Some(String::from("Berlin North")),
                ..AreaPatch::default()
            },
            previous: AreaPatch {
                name: Some(String::from("Berlin")),
                ..AreaPatch::default()
            },
        }
    }

    #[test]
    fn row_rebuilds_typed_payload() {
        let payload = rename();
        let record = row_for(&payload).into_record();
        assert_eq!(record.ok().map(|r| r.payload), Some(payload));
    }

    #[test]
    fn unknown_tag_is_corrupt() {
        let mut row = row_for(&rename());
        row.change_type = String::from("merge_areas");
        assert!(matches!(row.into_record(), Err(DbError::Corrupt(_))));
    }

    #[test]
    fn missing_reverse_document_is_rejected() {
        let mut row = row_for(&rename());
        row.previous_data = None;
        assert!(matches!(row.into_record(), Err(DbError::Payload(_))));
    }
}

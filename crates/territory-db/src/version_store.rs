//! Operations on the `versions` table.
//!
//! The snapshot column holds a full JSONB copy of the area's state. Rows
//! are immutable apart from `is_active` and `change_count`.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use territory_types::{AreaId, VersionSnapshot};
use uuid::Uuid;

use crate::error::DbError;

const SELECT_COLUMNS: &str = r"SELECT area_id, version_number, name, description, snapshot,
                 change_count, changes_summary, is_active, parent_version_area_id,
                 parent_version_number, branch_name, created_by, created_at
          FROM versions";

/// Insert a version row.
///
/// # Errors
///
/// Returns [`DbError::Serialization`] if the snapshot cannot be encoded, or
/// [`DbError::Postgres`] if the insert fails (duplicate number or a second
/// active version).
pub async fn insert(conn: &mut PgConnection, version: &VersionSnapshot) -> Result<(), DbError> {
    let snapshot = serde_json::to_value(&version.snapshot)?;

    sqlx::query(
        r"INSERT INTO versions
              (area_id, version_number, name, description, snapshot, change_count,
               changes_summary, is_active, parent_version_area_id, parent_version_number,
               branch_name, created_by, created_at)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(version.area_id.into_inner())
    .bind(version.version_number)
    .bind(&version.name)
    .bind(&version.description)
    .bind(&snapshot)
    .bind(version.change_count)
    .bind(&version.changes_summary)
    .bind(version.is_active)
    .bind(version.parent_version_area_id.map(AreaId::into_inner))
    .bind(version.parent_version_number)
    .bind(&version.branch_name)
    .bind(&version.created_by)
    .bind(version.created_at)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(
        area_id = %version.area_id,
        version_number = version.version_number,
        layers = version.snapshot.layers.len(),
        "Inserted version"
    );
    Ok(())
}

/// Highest version number of the area.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the query fails.
pub async fn max_number(conn: &mut PgConnection, area_id: AreaId) -> Result<Option<i32>, DbError> {
    let max: Option<i32> =
        sqlx::query_scalar("SELECT MAX(version_number) FROM versions WHERE area_id = $1")
            .bind(area_id.into_inner())
            .fetch_one(&mut *conn)
            .await?;
    Ok(max)
}

/// Fetch one version.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the query fails, or
/// [`DbError::Serialization`] if the snapshot is malformed.
pub async fn get(
    conn: &mut PgConnection,
    area_id: AreaId,
    version_number: i32,
) -> Result<Option<VersionSnapshot>, DbError> {
    let sql = format!("{SELECT_COLUMNS} WHERE area_id = $1 AND version_number = $2");
    let row = sqlx::query_as::<_, VersionRow>(&sql)
        .bind(area_id.into_inner())
        .bind(version_number)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(VersionRow::into_version).transpose()
}

/// All versions of the area, newest first.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the query fails, or
/// [`DbError::Serialization`] if a snapshot is malformed.
pub async fn list(conn: &mut PgConnection, area_id: AreaId) -> Result<Vec<VersionSnapshot>, DbError> {
    let sql = format!("{SELECT_COLUMNS} WHERE area_id = $1 ORDER BY version_number DESC");
    let rows = sqlx::query_as::<_, VersionRow>(&sql)
        .bind(area_id.into_inner())
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(VersionRow::into_version).collect()
}

/// Clear the active flag on every version of the area.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the update fails.
pub async fn deactivate_all(conn: &mut PgConnection, area_id: AreaId) -> Result<(), DbError> {
    sqlx::query("UPDATE versions SET is_active = FALSE WHERE area_id = $1 AND is_active")
        .bind(area_id.into_inner())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Set the active flag on one version.
///
/// # Errors
///
/// Returns [`DbError::MissingRow`] if the version does not exist.
pub async fn activate(
    conn: &mut PgConnection,
    area_id: AreaId,
    version_number: i32,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE versions SET is_active = TRUE WHERE area_id = $1 AND version_number = $2",
    )
    .bind(area_id.into_inner())
    .bind(version_number)
    .execute(&mut *conn)
    .await?;
    require_version(result.rows_affected(), area_id, version_number)
}

/// Add one to a version's change count.
///
/// # Errors
///
/// Returns [`DbError::MissingRow`] if the version does not exist.
pub async fn increment_change_count(
    conn: &mut PgConnection,
    area_id: AreaId,
    version_number: i32,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r"UPDATE versions SET change_count = change_count + 1
          WHERE area_id = $1 AND version_number = $2",
    )
    .bind(area_id.into_inner())
    .bind(version_number)
    .execute(&mut *conn)
    .await?;
    require_version(result.rows_affected(), area_id, version_number)
}

/// Delete a version row. Children's parent links are nulled by the
/// foreign key.
///
/// # Errors
///
/// Returns [`DbError::MissingRow`] if the version does not exist.
pub async fn delete(
    conn: &mut PgConnection,
    area_id: AreaId,
    version_number: i32,
) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM versions WHERE area_id = $1 AND version_number = $2")
        .bind(area_id.into_inner())
        .bind(version_number)
        .execute(&mut *conn)
        .await?;
    require_version(result.rows_affected(), area_id, version_number)?;

    tracing::debug!(%area_id, version_number, "Deleted version");
    Ok(())
}

fn require_version(affected: u64, area_id: AreaId, version_number: i32) -> Result<(), DbError> {
    if affected == 0 {
        return Err(DbError::MissingRow(format!(
            "version {version_number} of area {area_id}"
        )));
    }
    Ok(())
}

// =============================================================================
// Row type
// =============================================================================

/// A row from the `versions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VersionRow {
    /// Owning area.
    pub area_id: Uuid,
    /// Per-area number.
    pub version_number: i32,
    /// Name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Snapshot document.
    pub snapshot: serde_json::Value,
    /// Attributed change count.
    pub change_count: i32,
    /// Change summary.
    pub changes_summary: Option<String>,
    /// Active flag.
    pub is_active: bool,
    /// Parent area.
    pub parent_version_area_id: Option<Uuid>,
    /// Parent number.
    pub parent_version_number: Option<i32>,
    /// Branch name.
    pub branch_name: Option<String>,
    /// Author.
    pub created_by: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl VersionRow {
    /// Convert into the domain type.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if the snapshot is malformed.
    pub fn into_version(self) -> Result<VersionSnapshot, DbError> {
        Ok(VersionSnapshot {
            area_id: AreaId::from(self.area_id),
            version_number: self.version_number,
            name: self.name,
            description: self.description,
            snapshot: serde_json::from_value(self.snapshot)?,
            change_count: self.change_count,
            changes_summary: self.changes_summary,
            is_active: self.is_active,
            parent_version_area_id: self.parent_version_area_id.map(AreaId::from),
            parent_version_number: self.parent_version_number,
            branch_name: self.branch_name,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_snapshot_is_a_serialization_error() {
        let row = VersionRow {
            area_id: Uuid::now_v7(),
            version_number: 1,
            name: String::from("Version 1"),
            description: None,
            snapshot: serde_json::json!({ "layers": "not a list" }),
            change_count: 0,
            changes_summary: None,
            is_active: true,
            parent_version_area_id: None,
            parent_version_number: None,
            branch_name: None,
            created_by: None,
            created_at: Utc::now(),
        };
        assert!(matches!(row.into_version(), Err(DbError::Serialization(_))));
    }

    #[test]
    fn snapshot_document_decodes() {
        let row = VersionRow {
            area_id: Uuid::now_v7(),
            version_number: 2,
            name: String::from("Q3 plan"),
            description: None,
            snapshot: serde_json::json!({
                "area": { "name": "Berlin", "description": "", "granularity": "5digit" },
                "layers": [{
                    "name": "North",
                    "color": "#ff0000",
                    "opacity": 70,
                    "is_visible": true,
                    "order_index": 0,
                    "postal_codes": ["10115"]
                }]
            }),
            change_count: 3,
            changes_summary: None,
            is_active: false,
            parent_version_area_id: None,
            parent_version_number: None,
            branch_name: None,
            created_by: None,
            created_at: Utc::now(),
        };
        let version = row.into_version().ok();
        assert_eq!(
            version.map(|v| v.snapshot.layers.len()),
            Some(1)
        );
    }
}

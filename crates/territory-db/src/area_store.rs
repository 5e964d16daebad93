//! Operations on the `areas`, `layers`, and `layer_postal_codes` tables.
//!
//! Every function runs on a connection borrowed from an open transaction,
//! so entity writes commit or roll back together with the change record
//! and stacks that describe them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use territory_history::EntityMutation;
use territory_types::{Area, AreaId, Layer, LayerId};
use uuid::Uuid;

use crate::error::DbError;

/// Insert an area row.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the insert fails.
pub async fn insert_area(conn: &mut PgConnection, area: &Area) -> Result<(), DbError> {
    sqlx::query(
        r"INSERT INTO areas (id, name, description, granularity, current_version_number, created_at, updated_at)
          VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(area.id.into_inner())
    .bind(&area.name)
    .bind(&area.description)
    .bind(&area.granularity)
    .bind(area.current_version_number)
    .bind(area.created_at)
    .bind(area.updated_at)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(area_id = %area.id, "Inserted area");
    Ok(())
}

/// Read an area, optionally taking its row lock (`FOR UPDATE`).
///
/// The row lock is what serializes writers on one area: it is held until
/// the surrounding transaction commits or rolls back.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the query fails.
pub async fn get_area(
    conn: &mut PgConnection,
    area_id: AreaId,
    for_update: bool,
) -> Result<Option<Area>, DbError> {
    let sql = if for_update {
        r"SELECT id, name, description, granularity, current_version_number, created_at, updated_at
          FROM areas WHERE id = $1 FOR UPDATE"
    } else {
        r"SELECT id, name, description, granularity, current_version_number, created_at, updated_at
          FROM areas WHERE id = $1"
    };

    let row = sqlx::query_as::<_, AreaRow>(sql)
        .bind(area_id.into_inner())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(AreaRow::into_area))
}

/// The area owning a layer, if the layer exists in any area.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the query fails.
pub async fn layer_area(
    conn: &mut PgConnection,
    layer_id: LayerId,
) -> Result<Option<AreaId>, DbError> {
    let owner: Option<Uuid> = sqlx::query_scalar("SELECT area_id FROM layers WHERE id = $1")
        .bind(layer_id.into_inner())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(owner.map(AreaId::from))
}

/// Delete an area. Layers, codes, changes, versions, and stacks cascade.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if the delete fails.
pub async fn delete_area(conn: &mut PgConnection, area_id: AreaId) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM areas WHERE id = $1")
        .bind(area_id.into_inner())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Load an area's layers with their postal codes, ordered by
/// `order_index` then name.
///
/// # Errors
///
/// Returns [`DbError::Postgres`] if a query fails, or [`DbError::Corrupt`]
/// if a stored opacity is out of range.
pub async fn load_layers(conn: &mut PgConnection, area_id: AreaId) -> Result<Vec<Layer>, DbError> {
    let rows = sqlx::query_as::<_, LayerRow>(
        r"SELECT id, area_id, name, color, opacity, is_visible, order_index
          FROM layers
          WHERE area_id = $1
          ORDER BY order_index, name",
    )
    .bind(area_id.into_inner())
    .fetch_all(&mut *conn)
    .await?;

    let code_rows: Vec<(Uuid, String)> = sqlx::query_as(
        r"SELECT c.layer_id, c.postal_code
          FROM layer_postal_codes c
          JOIN layers l ON l.id = c.layer_id
          WHERE l.area_id = $1",
    )
    .bind(area_id.into_inner())
    .fetch_all(&mut *conn)
    .await?;

    let mut codes: BTreeMap<Uuid, BTreeSet<String>> = BTreeMap::new();
    for (layer_id, code) in code_rows {
        codes.entry(layer_id).or_default().insert(code);
    }

    rows.into_iter()
        .map(|row| {
            let postal_codes = codes.remove(&row.id).unwrap_or_default();
            row.into_layer(postal_codes)
        })
        .collect()
}

/// Execute one planned entity write.
///
/// # Errors
///
/// Returns [`DbError::MissingRow`] if an update or delete matched nothing,
/// or [`DbError::Postgres`] if a statement fails (including a duplicate
/// layer id or postal code).
pub async fn apply_mutation(
    conn: &mut PgConnection,
    area_id: AreaId,
    mutation: &EntityMutation,
) -> Result<(), DbError> {
    match mutation {
        EntityMutation::InsertLayer(layer) => {
            sqlx::query(
                r"INSERT INTO layers (id, area_id, name, color, opacity, is_visible, order_index)
                  VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(layer.id.into_inner())
            .bind(area_id.into_inner())
            .bind(&layer.name)
            .bind(&layer.color)
            .bind(i16::from(layer.opacity))
            .bind(layer.is_visible)
            .bind(layer.order_index)
            .execute(&mut *conn)
            .await?;
            insert_codes(conn, layer.id, &layer.postal_codes).await?;
        }
        EntityMutation::UpdateLayer(layer) => {
            let result = sqlx::query(
                r"UPDATE layers
                  SET name = $3, color = $4, opacity = $5, is_visible = $6, order_index = $7
                  WHERE id = $1 AND area_id = $2",
            )
            .bind(layer.id.into_inner())
            .bind(area_id.into_inner())
            .bind(&layer.name)
            .bind(&layer.color)
            .bind(i16::from(layer.opacity))
            .bind(layer.is_visible)
            .bind(layer.order_index)
            .execute(&mut *conn)
            .await?;
            require_row(result.rows_affected(), || format!("layer {}", layer.id))?;
        }
        EntityMutation::DeleteLayer(layer_id) => {
            let result = sqlx::query("DELETE FROM layers WHERE id = $1 AND area_id = $2")
                .bind(layer_id.into_inner())
                .bind(area_id.into_inner())
                .execute(&mut *conn)
                .await?;
            require_row(result.rows_affected(), || format!("layer {layer_id}"))?;
        }
        EntityMutation::InsertCodes { layer_id, codes } => {
            insert_codes(conn, *layer_id, codes).await?;
        }
        EntityMutation::DeleteCodes { layer_id, codes } => {
            let codes: Vec<&str> = codes.iter().map(String::as_str).collect();
            sqlx::query(
                r"DELETE FROM layer_postal_codes
                  WHERE layer_id = $1 AND postal_code = ANY($2::TEXT[])",
            )
            .bind(layer_id.into_inner())
            .bind(codes)
            .execute(&mut *conn)
            .await?;
        }
        EntityMutation::UpdateArea(area) => {
            let result = sqlx::query(
                r"UPDATE areas
                  SET name = $2, description = $3, granularity = $4,
                      current_version_number = $5, updated_at = now()
                  WHERE id = $1",
            )
            .bind(area_id.into_inner())
            .bind(&area.name)
            .bind(&area.description)
            .bind(&area.granularity)
            .bind(area.current_version_number)
            .execute(&mut *conn)
            .await?;
            require_row(result.rows_affected(), || format!("area {area_id}"))?;
        }
    }
    Ok(())
}

async fn insert_codes(
    conn: &mut PgConnection,
    layer_id: LayerId,
    codes: &BTreeSet<String>,
) -> Result<(), DbError> {
    if codes.is_empty() {
        return Ok(());
    }
    let codes: Vec<&str> = codes.iter().map(String::as_str).collect();
    sqlx::query(
        r"INSERT INTO layer_postal_codes (layer_id, postal_code)
          SELECT $1, code FROM UNNEST($2::TEXT[]) AS code",
    )
    .bind(layer_id.into_inner())
    .bind(codes)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn require_row(affected: u64, what: impl FnOnce() -> String) -> Result<(), DbError> {
    if affected == 0 {
        return Err(DbError::MissingRow(what()));
    }
    Ok(())
}

// =============================================================================
// Row types
// =============================================================================

/// A row from the `areas` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AreaRow {
    /// Area id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Granularity tag.
    pub granularity: String,
    /// Active version number.
    pub current_version_number: Option<i32>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl AreaRow {
    /// Convert into the domain type.
    pub fn into_area(self) -> Area {
        Area {
            id: AreaId::from(self.id),
            name: self.name,
            description: self.description,
            granularity: self.granularity,
            current_version_number: self.current_version_number,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A row from the `layers` table (codes are loaded separately).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LayerRow {
    /// Layer id.
    pub id: Uuid,
    /// Owning area.
    pub area_id: Uuid,
    /// Display name.
    pub name: String,
    /// Fill color.
    pub color: String,
    /// Opacity, 0 to 100.
    pub opacity: i16,
    /// Visibility flag.
    pub is_visible: bool,
    /// Position in the layer list.
    pub order_index: i32,
}

impl LayerRow {
    /// Convert into the domain type with the layer's codes.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Corrupt`] if the opacity does not fit `0..=255`.
    pub fn into_layer(self, postal_codes: BTreeSet<String>) -> Result<Layer, DbError> {
        let opacity = u8::try_from(self.opacity).map_err(|e| {
            DbError::Corrupt(format!("layer {} has opacity {}: {e}", self.id, self.opacity))
        })?;
        Ok(Layer {
            id: LayerId::from(self.id),
            area_id: AreaId::from(self.area_id),
            name: self.name,
            color: self.color,
            opacity,
            is_visible: self.is_visible,
            order_index: self.order_index,
            postal_codes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer_row(opacity: i16) -> LayerRow {
        LayerRow {
            id: Uuid::now_v7(),
            area_id: Uuid::now_v7(),
            name: String::from("North"),
            color: String::from("#ff0000"),
            opacity,
            is_visible: true,
            order_index: 1,
        }
    }

    #[test]
    fn layer_row_carries_codes() {
        let codes: BTreeSet<String> = ["10115", "10117"].into_iter().map(String::from).collect();
        let layer = layer_row(70).into_layer(codes.clone());
        assert_eq!(layer.ok().map(|l| l.postal_codes), Some(codes));
    }

    #[test]
    fn negative_opacity_is_corrupt() {
        assert!(matches!(
            layer_row(-1).into_layer(BTreeSet::new()),
            Err(DbError::Corrupt(_))
        ));
    }

    #[test]
    fn zero_rows_affected_is_missing() {
        assert!(require_row(1, String::new).is_ok());
        assert!(matches!(
            require_row(0, || String::from("layer x")),
            Err(DbError::MissingRow(_))
        ));
    }
}

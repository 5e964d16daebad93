//! REST API endpoint handlers.
//!
//! Each handler validates its request, makes exactly one call into the
//! [`HistoryService`](territory_history::HistoryService), and wraps the
//! result in the success envelope `{"success": true, "data": ...}`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness |
//! | `POST` | `/api/areas` | Create an area |
//! | `GET` | `/api/areas/{area_id}` | Area with layers and codes |
//! | `DELETE` | `/api/areas/{area_id}` | Delete an area and its history |
//! | `POST` | `/api/areas/{area_id}/changes` | Record an already-applied change |
//! | `POST` | `/api/areas/{area_id}/changes/apply` | Apply and record a change |
//! | `GET` | `/api/areas/{area_id}/history` | Change history |
//! | `POST` | `/api/areas/{area_id}/undo` | Undo the latest change |
//! | `POST` | `/api/areas/{area_id}/redo` | Redo the latest undone change |
//! | `GET` | `/api/areas/{area_id}/undo-redo` | Undo/redo availability |
//! | `GET` | `/api/areas/{area_id}/undo-redo/verify` | Check stack consistency |
//! | `GET` | `/api/areas/{area_id}/versions` | List versions |
//! | `POST` | `/api/areas/{area_id}/versions` | Create a version |
//! | `GET` | `/api/areas/{area_id}/versions/compare` | Diff two versions |
//! | `GET` | `/api/areas/{area_id}/versions/{n}` | One version |
//! | `DELETE` | `/api/areas/{area_id}/versions/{n}` | Delete an inactive version |
//! | `POST` | `/api/areas/{area_id}/versions/{n}/restore` | Restore a version |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use territory_history::HistoryStore;
use territory_types::{
    AreaId, ChangeInput, ChangePayload, HistoryFilter, NewArea, RestoreOptions, VersionInput,
};
use validator::Validate;

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::state::AppState;

type Shared<S> = State<Arc<AppState<S>>>;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    /// Always `true`.
    pub success: bool,
    /// The payload.
    pub data: T,
}

const fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

const fn created<T: Serialize>(data: T) -> (StatusCode, Json<Envelope<T>>) {
    (StatusCode::CREATED, ok(data))
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Request body for `POST /api/areas`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateAreaRequest {
    /// Display name.
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    /// Optional description.
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    /// Postal-code granularity tag.
    #[validate(length(min = 1, max = 32))]
    pub granularity: String,
}

/// Request body for the change endpoints.
///
/// The payload fields sit at the top level next to `change_type`, e.g.
/// `{"change_type": "add_postal_codes", "layer_id": "...", "codes": ["10115"]}`.
#[derive(Debug, Deserialize, Validate)]
pub struct ChangeRequest {
    /// The change, tagged by `change_type`.
    #[serde(flatten)]
    pub payload: ChangePayload,
    /// Author.
    #[validate(length(min = 1, max = 200))]
    pub created_by: Option<String>,
}

/// Query parameters for `GET /api/areas/{area_id}/history`.
#[derive(Debug, Deserialize, Validate)]
pub struct HistoryQuery {
    /// Only changes scoped to this version.
    pub version: Option<i32>,
    /// Maximum number of records.
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<usize>,
    /// Whether undone changes are included (default `true`).
    pub include_undone: Option<bool>,
}

/// Request body for `POST /api/areas/{area_id}/versions`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CreateVersionRequest {
    /// Version name; defaults to `Version {n}`.
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    /// Optional description.
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    /// Optional summary of the changes.
    #[validate(length(max = 2000))]
    pub changes_summary: Option<String>,
    /// Author.
    #[validate(length(min = 1, max = 200))]
    pub created_by: Option<String>,
}

/// Request body for `POST /api/areas/{area_id}/versions/{n}/restore`.
///
/// The body is optional; without one the version is restored in place.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RestoreRequest {
    /// Create a branch version instead of re-activating the restored one.
    #[serde(default)]
    pub create_branch: bool,
    /// Branch name; defaults to `Branch of version {n}`.
    #[validate(length(min = 1, max = 200))]
    pub branch_name: Option<String>,
    /// Author of the branch.
    #[validate(length(min = 1, max = 200))]
    pub created_by: Option<String>,
}

/// Query parameters for `GET /api/areas/{area_id}/versions/compare`.
#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    /// The older version.
    pub a: i32,
    /// The newer version.
    pub b: i32,
}

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct Health {
    /// Always `ok`.
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Liveness probe.
#[allow(clippy::unused_async)]
pub async fn health() -> impl IntoResponse {
    ok(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Areas
// ---------------------------------------------------------------------------

/// `POST /api/areas`
pub async fn create_area<S: HistoryStore>(
    State(state): Shared<S>,
    ApiJson(body): ApiJson<CreateAreaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    body.validate()?;
    let area = state
        .service
        .create_area(NewArea {
            name: body.name,
            description: body.description,
            granularity: body.granularity,
        })
        .await?;
    Ok(created(area))
}

/// `GET /api/areas/{area_id}`
pub async fn get_area<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath(area_id): ApiPath<AreaId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.service.area_state(area_id).await?))
}

/// `DELETE /api/areas/{area_id}`
pub async fn delete_area<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath(area_id): ApiPath<AreaId>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_area(area_id).await?;
    Ok(ok(serde_json::json!({ "deleted": area_id })))
}

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

/// `POST /api/areas/{area_id}/changes`
///
/// Records a change the caller has already applied to the entities.
pub async fn record_change<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath(area_id): ApiPath<AreaId>,
    ApiJson(body): ApiJson<ChangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    body.validate()?;
    let record = state
        .service
        .record_change(area_id, body.into())
        .await?;
    Ok(created(record))
}

/// `POST /api/areas/{area_id}/changes/apply`
///
/// Applies the change to the entities and records it in one transaction.
pub async fn apply_change<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath(area_id): ApiPath<AreaId>,
    ApiJson(body): ApiJson<ChangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    body.validate()?;
    let record = state
        .service
        .apply_change(area_id, body.into())
        .await?;
    Ok(created(record))
}

impl From<ChangeRequest> for ChangeInput {
    fn from(body: ChangeRequest) -> Self {
        Self {
            payload: body.payload,
            created_by: body.created_by,
        }
    }
}

/// `GET /api/areas/{area_id}/history`
pub async fn history<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath(area_id): ApiPath<AreaId>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    query.validate()?;
    let filter = HistoryFilter {
        version_number: query.version,
        limit: query.limit,
        include_undone: query.include_undone.unwrap_or(true),
    };
    Ok(ok(state.service.history(area_id, &filter).await?))
}

// ---------------------------------------------------------------------------
// Undo / redo
// ---------------------------------------------------------------------------

/// `POST /api/areas/{area_id}/undo`
pub async fn undo<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath(area_id): ApiPath<AreaId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.service.undo(area_id).await?))
}

/// `POST /api/areas/{area_id}/redo`
pub async fn redo<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath(area_id): ApiPath<AreaId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.service.redo(area_id).await?))
}

/// `GET /api/areas/{area_id}/undo-redo`
pub async fn undo_redo_status<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath(area_id): ApiPath<AreaId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.service.undo_redo_status(area_id).await?))
}

/// `GET /api/areas/{area_id}/undo-redo/verify`
pub async fn verify_stack<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath(area_id): ApiPath<AreaId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.service.verify_stack(area_id).await?))
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// `GET /api/areas/{area_id}/versions`
pub async fn list_versions<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath(area_id): ApiPath<AreaId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.service.list_versions(area_id).await?))
}

/// `POST /api/areas/{area_id}/versions`
pub async fn create_version<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath(area_id): ApiPath<AreaId>,
    ApiJson(body): ApiJson<CreateVersionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    body.validate()?;
    let version = state
        .service
        .create_version(
            area_id,
            VersionInput {
                name: body.name,
                description: body.description,
                changes_summary: body.changes_summary,
                created_by: body.created_by,
            },
        )
        .await?;
    Ok(created(version))
}

/// `GET /api/areas/{area_id}/versions/compare?a=&b=`
pub async fn compare_versions<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath(area_id): ApiPath<AreaId>,
    ApiQuery(query): ApiQuery<CompareQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state
        .service
        .compare_stored_versions(area_id, query.a, query.b)
        .await?))
}

/// `GET /api/areas/{area_id}/versions/{n}`
pub async fn get_version<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath((area_id, version_number)): ApiPath<(AreaId, i32)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.service.get_version(area_id, version_number).await?))
}

/// `DELETE /api/areas/{area_id}/versions/{n}`
pub async fn delete_version<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath((area_id, version_number)): ApiPath<(AreaId, i32)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service
        .delete_version(area_id, version_number)
        .await?;
    Ok(ok(serde_json::json!({ "deleted": version_number })))
}

/// `POST /api/areas/{area_id}/versions/{n}/restore`
pub async fn restore_version<S: HistoryStore>(
    State(state): Shared<S>,
    ApiPath((area_id, version_number)): ApiPath<(AreaId, i32)>,
    body: Option<ApiJson<RestoreRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = body.map(|ApiJson(body)| body).unwrap_or_default();
    body.validate()?;
    let result = state
        .service
        .restore_version(
            area_id,
            version_number,
            RestoreOptions {
                create_branch: body.create_branch,
                branch_name: body.branch_name,
                created_by: body.created_by,
            },
        )
        .await?;
    Ok(ok(result))
}

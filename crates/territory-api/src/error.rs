//! Error types for the history API.
//!
//! [`ApiError`] unifies all failure modes into a single enum that is
//! converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation. Every
//! failure renders the same envelope:
//!
//! ```json
//! { "success": false, "error": { "kind": "not_found", "message": "area ... not found" } }
//! ```

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use territory_history::HistoryError;

/// Envelope `kind` for malformed or invalid requests.
const INVALID_REQUEST: &str = "invalid_request";

/// Errors that can occur in the API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The history engine rejected or failed the operation.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// A request body, path, or query could not be parsed.
    #[error("malformed request: {0}")]
    BadRequest(String),

    /// A request parsed but failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl ApiError {
    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::History(err) => match err {
                HistoryError::AreaNotFound(_)
                | HistoryError::LayerNotFound(_)
                | HistoryError::VersionNotFound { .. } => StatusCode::NOT_FOUND,
                HistoryError::NoChangesToUndo
                | HistoryError::NoChangesToRedo
                | HistoryError::CannotDeleteActiveVersion(_)
                | HistoryError::StaleTarget { .. } => StatusCode::CONFLICT,
                HistoryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                HistoryError::Persistence(_) | HistoryError::Inconsistent(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable machine-readable kind for the envelope.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::History(err) => err.kind().as_str(),
            Self::BadRequest(_) | Self::Validation(_) => INVALID_REQUEST,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "success": false,
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            },
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use territory_types::AreaId;

    use super::*;

    #[test]
    fn history_errors_map_to_statuses() {
        let cases = [
            (
                ApiError::from(HistoryError::AreaNotFound(AreaId::new())),
                StatusCode::NOT_FOUND,
                "not_found",
            ),
            (
                ApiError::from(HistoryError::NoChangesToRedo),
                StatusCode::CONFLICT,
                "empty_stack",
            ),
            (
                ApiError::from(HistoryError::CannotDeleteActiveVersion(2)),
                StatusCode::CONFLICT,
                "invalid_operation",
            ),
            (
                ApiError::from(HistoryError::InvalidInput(String::from("opacity 120"))),
                StatusCode::BAD_REQUEST,
                "invalid_operation",
            ),
            (
                ApiError::from(HistoryError::Persistence(String::from("pool closed"))),
                StatusCode::INTERNAL_SERVER_ERROR,
                "persistence_failure",
            ),
        ];
        for (err, status, kind) in cases {
            assert_eq!(err.status(), status, "{err}");
            assert_eq!(err.kind(), kind, "{err}");
        }
    }

    #[test]
    fn bad_requests_are_invalid_requests() {
        let err = ApiError::BadRequest(String::from("expected a number"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), INVALID_REQUEST);
    }
}

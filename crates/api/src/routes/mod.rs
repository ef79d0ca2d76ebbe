//! HTTP route handlers.
//!
//! Authentication is owned by an upstream layer; handlers read the caller
//! identity from the `X-User-Id` header it injects.

pub mod billing;
pub mod health;
pub mod jobs;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use uuid::Uuid;

use tuneforge_models::{ApiError, ErrorResponse};

/// Wrapper translating `ApiError` into an HTTP response
pub struct AppError(pub ApiError);

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

/// Resolve the calling user from the auth layer's header.
pub fn caller_id(headers: &HeaderMap) -> Result<Uuid, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| {
            AppError(ApiError::Validation {
                field: "x-user-id".to_string(),
                reason: "missing or malformed user id header".to_string(),
            })
        })
}

//! API response types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Standard API response wrapper.
///
/// Errors never pass through here; `AppError` renders its own body.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a success response.
    pub const fn ok(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Body for operations whose only result is success.
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Wrapped `{"ok": true}`.
#[must_use]
pub const fn ok() -> ApiResponse<OkResponse> {
    ApiResponse::ok(OkResponse { ok: true })
}

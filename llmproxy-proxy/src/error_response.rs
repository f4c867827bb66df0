//! The `{error: {message, type}}` body shape (§6).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use llmproxy_core::error::LlmProxyError;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

pub fn error_response(err: &LlmProxyError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody { error: ErrorDetail { message: err.to_string(), error_type: err.error_type().to_string() } };
    (status, Json(body)).into_response()
}

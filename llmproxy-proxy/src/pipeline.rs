//! The end-to-end request handler (§4.5): auth gate, body parse,
//! optional Google-grounding mutation, bounded retry with backoff,
//! streaming and buffered forwarding, error classification, logging.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use llmproxy_core::error::LlmProxyError;
use llmproxy_core::types::RequestLog;
use llmproxy_keymanager::KeyErrorOutcome;
use serde_json::Value;

use crate::error_response::error_response;
use crate::grounding::{apply_google_grounding, is_google_endpoint};
use crate::models::augment_models_response;
use crate::state::AppState;

/// A status that the Proxy Pipeline treats as a failure requiring
/// `markKeyError` (§7's ApiKeyError + UpstreamServer classes). Every
/// other status — including "ordinary" 4xx client errors — takes the
/// success path: the key is good, the request itself was just rejected.
fn is_failure_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 429) || status >= 500
}

fn retry_backoff(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt.saturating_sub(1).min(10)).min(10);
    Duration::from_secs(secs.max(1).min(10))
}

fn extract_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

fn extract_upstream_message(body_text: &str) -> String {
    serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.get("message")).and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body_text.to_string())
}

fn rate_limit_reset_unix(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    headers.get("x-ratelimit-reset").and_then(|v| v.to_str().ok()).and_then(|s| s.parse::<i64>().ok())
}

async fn write_log(
    state: &AppState,
    api_key_id: Option<&str>,
    status_code: u16,
    is_error: bool,
    err: Option<&LlmProxyError>,
    model_used: Option<&str>,
    response_time_ms: u64,
    ip_address: Option<String>,
) {
    let record = RequestLog {
        api_key_id: api_key_id.map(str::to_string),
        timestamp: Utc::now(),
        status_code,
        is_error,
        error_type: err.and_then(|e| e.request_error_type()),
        error_message: err.map(|e| e.to_string()),
        model_used: model_used.map(str::to_string),
        response_time_ms,
        ip_address,
    };
    llmproxy_telemetry::log_request_outcome(api_key_id, status_code, is_error, response_time_ms);
    // §7: log-write failures are swallowed and never fail the request.
    if let Err(e) = state.log_store.create(record).await {
        llmproxy_telemetry::log_store_write_failure("logs.create", &e.to_string());
    }
}

fn check_master_key(state: &AppState, headers: &HeaderMap) -> std::result::Result<(), Response> {
    let Some(expected) = &state.master_api_key else {
        return Ok(());
    };
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(error_response(&LlmProxyError::AuthenticationMaster))
    }
}

pub async fn chat_completions(State(state): State<AppState>, headers: HeaderMap, raw_body: axum::body::Bytes) -> Response {
    let start = Instant::now();
    let ip = extract_ip(&headers);

    if let Err(response) = check_master_key(&state, &headers) {
        return response;
    }

    let mut body: Value = match serde_json::from_slice(&raw_body) {
        Ok(v) => v,
        Err(e) => {
            let err = LlmProxyError::client_input(e.to_string());
            write_log(&state, None, err.status_code(), true, Some(&err), None, start.elapsed().as_millis() as u64, ip).await;
            return error_response(&err);
        }
    };

    let model = body.get("model").and_then(Value::as_str).map(str::to_string);
    let streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let settings = match state.key_manager.current_settings().await {
        Ok(s) => s,
        Err(e) => {
            write_log(&state, None, 500, true, Some(&e), model.as_deref(), start.elapsed().as_millis() as u64, ip).await;
            return error_response(&e);
        }
    };

    if settings.enable_google_grounding && is_google_endpoint(&settings.endpoint) {
        apply_google_grounding(&mut body);
    }

    let max_retries = settings.max_retries;
    let mut attempt: u32 = 0;

    loop {
        let (value, key_id) = match state.key_manager.get_key().await {
            Ok(pair) => pair,
            Err(e) => {
                write_log(&state, None, e.status_code(), true, Some(&e), model.as_deref(), start.elapsed().as_millis() as u64, ip).await;
                return error_response(&e);
            }
        };

        let attempt_started = Instant::now();
        let url = format!("{}/chat/completions", settings.endpoint.trim_end_matches('/'));
        let send_result = state.http_client.post(&url).bearer_auth(&value).json(&body).send().await;

        match send_result {
            Ok(upstream) if !is_failure_status(upstream.status().as_u16()) => {
                let status = upstream.status().as_u16();
                if let Err(e) = state.key_manager.mark_key_success().await {
                    llmproxy_telemetry::log_store_write_failure("mark_key_success", &e.to_string());
                }
                state.connections.decrement(&key_id);
                write_log(&state, Some(&key_id), status, false, None, model.as_deref(), attempt_started.elapsed().as_millis() as u64, ip.clone()).await;
                return forward_response(upstream, streaming).await;
            }
            Ok(upstream) => {
                let status = upstream.status().as_u16();
                let reset_at = rate_limit_reset_unix(upstream.headers());
                let body_text = upstream.text().await.unwrap_or_default();
                let message = extract_upstream_message(&body_text);
                let err = LlmProxyError::classify_upstream(status, message, false);

                let outcome = if status == 429 {
                    KeyErrorOutcome::RateLimited { reset_at_unix: reset_at }
                } else {
                    KeyErrorOutcome::Failure
                };
                let was_rate_limit = state.key_manager.mark_key_error(outcome).await.unwrap_or(false);
                let should_retry = was_rate_limit || status >= 500;

                if should_retry && attempt < max_retries.saturating_sub(1) {
                    attempt += 1;
                    let backoff = retry_backoff(attempt);
                    llmproxy_telemetry::log_upstream_retry(attempt, max_retries, Some(status), backoff.as_millis() as u64);
                    tokio::time::sleep(backoff).await;
                    continue;
                }

                // A retriable failure that ran out of attempts surfaces as
                // MaxRetriesExceeded (§4.5 step 6); a non-retriable failure
                // (e.g. a bare 401/403) surfaces as itself, immediately.
                let reported = if should_retry { LlmProxyError::MaxRetriesExceeded } else { err };
                write_log(&state, Some(&key_id), reported.status_code(), true, Some(&reported), model.as_deref(), attempt_started.elapsed().as_millis() as u64, ip).await;
                return error_response(&reported);
            }
            Err(transport_err) => {
                let timed_out = transport_err.is_timeout();
                let err = LlmProxyError::classify_upstream(599, transport_err.to_string(), timed_out);
                let was_rate_limit = state.key_manager.mark_key_error(KeyErrorOutcome::Failure).await.unwrap_or(false);
                let should_retry = was_rate_limit || err.is_retriable();

                if should_retry && attempt < max_retries.saturating_sub(1) {
                    attempt += 1;
                    let backoff = retry_backoff(attempt);
                    llmproxy_telemetry::log_upstream_retry(attempt, max_retries, None, backoff.as_millis() as u64);
                    tokio::time::sleep(backoff).await;
                    continue;
                }

                let reported = if should_retry { LlmProxyError::MaxRetriesExceeded } else { err };
                write_log(&state, Some(&key_id), reported.status_code(), true, Some(&reported), model.as_deref(), attempt_started.elapsed().as_millis() as u64, ip).await;
                return error_response(&reported);
            }
        }
    }
}

/// Builds the client-facing response. For streaming requests the upstream
/// byte stream is piped through as a lazy, forward-only body: if the
/// client disconnects, axum stops polling it, the stream (and the
/// underlying `reqwest::Response`) is dropped, and the upstream
/// connection is released — no extra cancellation plumbing required.
async fn forward_response(upstream: reqwest::Response, streaming: bool) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::OK);

    if streaming {
        let body = Body::from_stream(upstream.bytes_stream());
        let mut response = Response::builder()
            .status(status)
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(body)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
        *response.status_mut() = status;
        response
    } else {
        let bytes = upstream.bytes().await.unwrap_or_default();
        (status, bytes).into_response()
    }
}

pub async fn list_models(State(state): State<AppState>) -> Response {
    let settings = match state.key_manager.current_settings().await {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };

    let (value, key_id) = match state.key_manager.get_key().await {
        Ok(pair) => pair,
        Err(e) => return error_response(&e),
    };

    let url = format!("{}/models", settings.endpoint.trim_end_matches('/'));
    match state.http_client.get(&url).bearer_auth(&value).send().await {
        Ok(upstream) if !is_failure_status(upstream.status().as_u16()) => {
            if let Err(e) = state.key_manager.mark_key_success().await {
                llmproxy_telemetry::log_store_write_failure("mark_key_success", &e.to_string());
            }
            state.connections.decrement(&key_id);
            let body: Value = upstream.json().await.unwrap_or_else(|_| serde_json::json!({}));
            axum::Json(augment_models_response(body)).into_response()
        }
        Ok(upstream) => {
            let status = upstream.status().as_u16();
            let _ = state.key_manager.mark_key_error(KeyErrorOutcome::Failure).await;
            let body_text = upstream.text().await.unwrap_or_default();
            let err = LlmProxyError::classify_upstream(status, extract_upstream_message(&body_text), false);
            error_response(&err)
        }
        Err(e) => {
            let timed_out = e.is_timeout();
            let err = LlmProxyError::classify_upstream(599, e.to_string(), timed_out);
            let _ = state.key_manager.mark_key_error(KeyErrorOutcome::Failure).await;
            error_response(&err)
        }
    }
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_statuses_include_key_and_server_errors() {
        assert!(is_failure_status(401));
        assert!(is_failure_status(403));
        assert!(is_failure_status(429));
        assert!(is_failure_status(500));
        assert!(is_failure_status(503));
    }

    #[test]
    fn ordinary_client_errors_are_not_failure_statuses() {
        assert!(!is_failure_status(400));
        assert!(!is_failure_status(404));
        assert!(!is_failure_status(422));
        assert!(!is_failure_status(200));
    }

    #[test]
    fn retry_backoff_doubles_and_caps_at_ten_seconds() {
        assert_eq!(retry_backoff(1), Duration::from_secs(1));
        assert_eq!(retry_backoff(2), Duration::from_secs(2));
        assert_eq!(retry_backoff(3), Duration::from_secs(4));
        assert_eq!(retry_backoff(4), Duration::from_secs(8));
        assert_eq!(retry_backoff(5), Duration::from_secs(10));
        assert_eq!(retry_backoff(10), Duration::from_secs(10));
    }

    #[test]
    fn extract_upstream_message_prefers_error_field() {
        let body = r#"{"error": {"message": "bad key"}}"#;
        assert_eq!(extract_upstream_message(body), "bad key");
    }

    #[test]
    fn extract_upstream_message_falls_back_to_raw_body() {
        assert_eq!(extract_upstream_message("not json"), "not json");
    }
}

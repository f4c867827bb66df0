//! Structured logging initialization plus a handful of named
//! event-logging helpers, so Key Manager and Proxy Pipeline call sites
//! stay declarative instead of hand-building `tracing` spans inline.

use std::sync::Once;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Builds the process-wide `tracing_subscriber` registry. Idempotent:
/// later calls are no-ops, matching the teacher's `Once`-guarded init.
pub fn init_tracing(format: LogFormat) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);
        match format {
            LogFormat::Pretty => {
                registry.with(tracing_subscriber::fmt::layer().with_target(true)).init();
            }
            LogFormat::Json => {
                registry.with(tracing_subscriber::fmt::layer().json().with_target(true)).init();
            }
        }
    });
}

pub fn log_key_selected(key_id: &str, profile: &str, strategy: &str) {
    tracing::info!(key_id, profile, strategy, "key selected for request");
}

/// Profile diversification (§4.4c) had nothing to diversify into — the
/// candidate set after excluding the current profile was empty, so
/// rotation fell back to the unfiltered candidate set.
pub fn log_rotation_fallback(current_profile: &str, candidate_count: usize) {
    tracing::debug!(current_profile, candidate_count, "profile diversification had no alternative, falling back");
}

pub fn log_key_rate_limited(key_id: &str, reset_at_unix: i64) {
    tracing::warn!(key_id, reset_at_unix, "key entered rate-limit cooldown");
}

pub fn log_key_deactivated(key_id: &str, failure_count: u32) {
    tracing::warn!(key_id, failure_count, "key deactivated after exceeding failure threshold");
}

pub fn log_no_keys_available() {
    tracing::error!("no usable API keys available after rotation sweep");
}

pub fn log_upstream_retry(attempt: u32, max_retries: u32, status: Option<u16>, backoff_ms: u64) {
    tracing::warn!(attempt, max_retries, status, backoff_ms, "retrying upstream request");
}

pub fn log_request_outcome(key_id: Option<&str>, status_code: u16, is_error: bool, response_time_ms: u64) {
    tracing::info!(key_id, status_code, is_error, response_time_ms, "request completed");
}

/// §7: log-write failures are swallowed, never propagated to the
/// client, but they still need to surface somewhere an operator looks.
pub fn log_store_write_failure(operation: &str, error: &str) {
    tracing::error!(operation, error, "persistence write failed, outcome not recorded");
}

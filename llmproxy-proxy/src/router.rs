//! Route wiring: chat completions, models listing, liveness probe (§6).

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::pipeline::{chat_completions, healthz, list_models};
use crate::state::AppState;

/// Matches §6's 120s upstream budget plus slack for the retry loop and
/// body transfer, so a slow-but-eventually-successful chain isn't cut
/// off by the outer HTTP layer before the pipeline itself gives up.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use llmproxy_balancer::ConnectionCounter;
    use llmproxy_core::types::Settings;
    use llmproxy_keymanager::{KeyManager, SettingsCache};
    use llmproxy_store::memory::{InMemoryKeyStore, InMemoryLogStore, InMemorySettingsStore};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let key_store: Arc<dyn KeyStoreDyn> = Arc::new(InMemoryKeyStore::default());
        let settings_store = Arc::new(InMemorySettingsStore::new(Settings::default()));
        let cache = Arc::new(SettingsCache::new(settings_store as Arc<dyn SettingsStoreDyn>));
        let connections = ConnectionCounter::default();
        let key_manager = Arc::new(KeyManager::new(key_store, cache, connections.clone()));
        let log_store: Arc<dyn LogStoreDyn> = Arc::new(InMemoryLogStore::default());
        AppState::new(key_manager, log_store, connections, None)
    }

    use llmproxy_core::store::{KeyStore as KeyStoreDyn, LogStore as LogStoreDyn, SettingsStore as SettingsStoreDyn};

    #[tokio::test]
    async fn healthz_returns_200() {
        let router = build_router(test_state());
        let response = router
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_completions_rejects_invalid_json() {
        let router = build_router(test_state());
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/chat/completions")
                    .header("content-type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_completions_with_no_keys_returns_503() {
        let router = build_router(test_state());
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/chat/completions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"model": "gpt-4o"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

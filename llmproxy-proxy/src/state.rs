use std::sync::Arc;
use std::time::Duration;

use llmproxy_balancer::ConnectionCounter;
use llmproxy_core::store::{KeyStore, LogStore, SettingsStore};
use llmproxy_keymanager::KeyManager;

/// Trait objects let the binary pick in-memory vs. SQLite at startup
/// without infecting every handler signature with a backend generic.
pub type DynKeyStore = dyn KeyStore;
pub type DynSettingsStore = dyn SettingsStore;
pub type DynLogStore = dyn LogStore;
pub type AppKeyManager = KeyManager<DynKeyStore, DynSettingsStore>;

#[derive(Clone)]
pub struct AppState {
    pub key_manager: Arc<AppKeyManager>,
    pub log_store: Arc<DynLogStore>,
    pub connections: ConnectionCounter,
    pub http_client: reqwest::Client,
    pub master_api_key: Option<String>,
}

impl AppState {
    pub fn new(
        key_manager: Arc<AppKeyManager>,
        log_store: Arc<DynLogStore>,
        connections: ConnectionCounter,
        master_api_key: Option<String>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build upstream HTTP client");
        Self { key_manager, log_store, connections, http_client, master_api_key }
    }
}

//! Persistence contract (§4.1). This crate only defines the traits; concrete
//! backends (in-memory, SQLite) live in `llmproxy-store` so this crate stays
//! free of any particular storage engine's dependency footprint.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ApiKey, KeyFilter, RequestLog, Settings};

/// Fields accepted by `KeyStore::create` (§4.4 `addKey`, §4.1 `keys.create`).
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub value: String,
    pub name: Option<String>,
    pub profile: String,
    pub daily_rate_limit: Option<u64>,
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn find_one(&self, filter: &KeyFilter) -> Result<Option<ApiKey>>;
    async fn find_by_value(&self, value: &str) -> Result<Option<ApiKey>>;
    async fn find_all(&self, filter: &KeyFilter) -> Result<Vec<ApiKey>>;
    async fn create(&self, fields: NewApiKey) -> Result<ApiKey>;
    /// Full-row update of a single key, keyed by `ApiKey::id`.
    async fn save(&self, key: &ApiKey) -> Result<()>;
    /// Atomic multi-row write: either every row in `updates` lands, or none
    /// does (§4.1's "daily resets cannot partially apply").
    async fn bulk_update(&self, updates: HashMap<String, ApiKey>) -> Result<()>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Fire-and-forget from the caller's perspective: implementations may
    /// fail, but §7 requires callers to swallow that failure, never the
    /// trait itself — the `Result` exists so the caller can log it.
    async fn create(&self, record: RequestLog) -> Result<()>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn read(&self) -> Result<Settings>;
    async fn write(&self, settings: &Settings) -> Result<()>;
}

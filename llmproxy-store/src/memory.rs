//! Zero-config, process-local backend. This is the default store: used in
//! every unit test in this workspace and as the fallback when no
//! `DATABASE_URL` is configured and the `sqlite` feature is off.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use llmproxy_core::error::{LlmProxyError, Result};
use llmproxy_core::store::{KeyStore, LogStore, NewApiKey, SettingsStore};
use llmproxy_core::types::{ApiKey, KeyFilter, RequestLog, Settings};
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, ApiKey>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn find_one(&self, filter: &KeyFilter) -> Result<Option<ApiKey>> {
        let keys = self.keys.read().map_err(|_| LlmProxyError::Internal("key store poisoned".into()))?;
        Ok(keys.values().find(|k| filter.matches(k)).cloned())
    }

    async fn find_by_value(&self, value: &str) -> Result<Option<ApiKey>> {
        let keys = self.keys.read().map_err(|_| LlmProxyError::Internal("key store poisoned".into()))?;
        Ok(keys.values().find(|k| k.value == value).cloned())
    }

    async fn find_all(&self, filter: &KeyFilter) -> Result<Vec<ApiKey>> {
        let keys = self.keys.read().map_err(|_| LlmProxyError::Internal("key store poisoned".into()))?;
        Ok(keys.values().filter(|k| filter.matches(k)).cloned().collect())
    }

    async fn create(&self, fields: NewApiKey) -> Result<ApiKey> {
        let mut key = ApiKey::new(Uuid::new_v4().to_string(), fields.value);
        key.name = fields.name;
        key.profile = fields.profile;
        key.daily_rate_limit = fields.daily_rate_limit;
        let mut keys = self.keys.write().map_err(|_| LlmProxyError::Internal("key store poisoned".into()))?;
        keys.insert(key.id.clone(), key.clone());
        Ok(key)
    }

    async fn save(&self, key: &ApiKey) -> Result<()> {
        let mut keys = self.keys.write().map_err(|_| LlmProxyError::Internal("key store poisoned".into()))?;
        keys.insert(key.id.clone(), key.clone());
        Ok(())
    }

    async fn bulk_update(&self, updates: HashMap<String, ApiKey>) -> Result<()> {
        // A single write-lock acquisition covering every insert gives us
        // the "all or none" atomicity §4.1 requires: no reader observes a
        // partially-applied sweep.
        let mut keys = self.keys.write().map_err(|_| LlmProxyError::Internal("key store poisoned".into()))?;
        for (id, key) in updates {
            keys.insert(id, key);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryLogStore {
    logs: RwLock<Vec<RequestLog>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<RequestLog> {
        self.logs.read().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn create(&self, record: RequestLog) -> Result<()> {
        let mut logs = self.logs.write().map_err(|_| LlmProxyError::Internal("log store poisoned".into()))?;
        logs.push(record);
        Ok(())
    }
}

pub struct InMemorySettingsStore {
    settings: RwLock<Settings>,
}

impl InMemorySettingsStore {
    pub fn new(initial: Settings) -> Self {
        Self { settings: RwLock::new(initial) }
    }
}

impl Default for InMemorySettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn read(&self) -> Result<Settings> {
        let settings =
            self.settings.read().map_err(|_| LlmProxyError::Internal("settings store poisoned".into()))?;
        Ok(settings.clone())
    }

    async fn write(&self, settings: &Settings) -> Result<()> {
        let mut guard =
            self.settings.write().map_err(|_| LlmProxyError::Internal("settings store poisoned".into()))?;
        *guard = settings.clone();
        Ok(())
    }
}

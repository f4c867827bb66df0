//! Process-wide read-mostly configuration with a time-bounded cache
//! (§4.2). Readers share an immutable snapshot swapped atomically on
//! expiry or explicit invalidation, so a writer never blocks a reader
//! mid-read.

use std::sync::Arc;
use std::time::{Duration, Instant};

use llmproxy_core::error::Result;
use llmproxy_core::store::SettingsStore;
use llmproxy_core::types::Settings;
use tokio::sync::RwLock;

const DEFAULT_TTL: Duration = Duration::from_secs(60);

struct Snapshot {
    settings: Arc<Settings>,
    fetched_at: Instant,
}

pub struct SettingsCache<S: SettingsStore + ?Sized> {
    store: Arc<S>,
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,
}

impl<S: SettingsStore + ?Sized> SettingsCache<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store, ttl: DEFAULT_TTL, snapshot: RwLock::new(None) }
    }

    pub fn with_ttl(store: Arc<S>, ttl: Duration) -> Self {
        Self { store, ttl, snapshot: RwLock::new(None) }
    }

    /// Returns the cached snapshot if still fresh, otherwise reloads from
    /// the store. `Settings` already carries its own field-level
    /// defaults (`#[serde(default)]`), so the "defaults ∪ stored" merge
    /// §4.2 describes happens for free once the store deserializes a
    /// partial row.
    pub async fn read(&self) -> Result<Arc<Settings>> {
        {
            let guard = self.snapshot.read().await;
            if let Some(snap) = guard.as_ref() {
                if snap.fetched_at.elapsed() < self.ttl {
                    return Ok(snap.settings.clone());
                }
            }
        }
        let fresh = Arc::new(self.store.read().await?);
        let mut guard = self.snapshot.write().await;
        *guard = Some(Snapshot { settings: fresh.clone(), fetched_at: Instant::now() });
        Ok(fresh)
    }

    /// Invalidates the cache by replacing it with a freshly fetched
    /// snapshot — used after an external write to `Settings` so readers
    /// don't wait out the full TTL to observe it.
    pub async fn invalidate(&self) -> Result<()> {
        let fresh = Arc::new(self.store.read().await?);
        let mut guard = self.snapshot.write().await;
        *guard = Some(Snapshot { settings: fresh, fetched_at: Instant::now() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmproxy_store::InMemorySettingsStore;

    #[tokio::test]
    async fn read_populates_cache_from_store() {
        let store = Arc::new(InMemorySettingsStore::default());
        let cache = SettingsCache::new(store);
        let settings = cache.read().await.unwrap();
        assert_eq!(settings.max_retries, 3);
    }

    #[tokio::test]
    async fn read_within_ttl_does_not_reflect_uncached_store_write() {
        let store = Arc::new(InMemorySettingsStore::default());
        let cache = SettingsCache::with_ttl(store.clone(), Duration::from_secs(60));
        let first = cache.read().await.unwrap();
        assert_eq!(first.max_retries, 3);

        let mut updated = (*first).clone();
        updated.max_retries = 9;
        store.write(&updated).await.unwrap();

        let still_cached = cache.read().await.unwrap();
        assert_eq!(still_cached.max_retries, 3);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let store = Arc::new(InMemorySettingsStore::default());
        let cache = SettingsCache::with_ttl(store.clone(), Duration::from_secs(60));
        cache.read().await.unwrap();

        let mut updated = Settings::default();
        updated.max_retries = 9;
        store.write(&updated).await.unwrap();
        cache.invalidate().await.unwrap();

        let refreshed = cache.read().await.unwrap();
        assert_eq!(refreshed.max_retries, 9);
    }

    #[tokio::test]
    async fn expired_ttl_triggers_reload() {
        let store = Arc::new(InMemorySettingsStore::default());
        let cache = SettingsCache::with_ttl(store.clone(), Duration::from_millis(10));
        cache.read().await.unwrap();

        let mut updated = Settings::default();
        updated.max_retries = 9;
        store.write(&updated).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let refreshed = cache.read().await.unwrap();
        assert_eq!(refreshed.max_retries, 9);
    }
}

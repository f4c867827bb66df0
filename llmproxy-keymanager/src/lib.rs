pub mod cache;
pub mod manager;

pub use cache::SettingsCache;
pub use manager::{KeyErrorOutcome, KeyManager};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use llmproxy_balancer::ConnectionCounter;
    use llmproxy_core::store::{KeyStore, NewApiKey, SettingsStore};
    use llmproxy_core::types::{LoadBalancingStrategyKind, Settings};
    use llmproxy_store::{InMemoryKeyStore, InMemorySettingsStore};

    use crate::{KeyErrorOutcome, KeyManager, SettingsCache};

    async fn manager_with_settings(settings: Settings) -> (KeyManager<InMemoryKeyStore, InMemorySettingsStore>, Arc<InMemoryKeyStore>) {
        let key_store = Arc::new(InMemoryKeyStore::new());
        let settings_store = Arc::new(InMemorySettingsStore::new(settings));
        let cache = Arc::new(SettingsCache::with_ttl(settings_store, Duration::from_secs(60)));
        let manager = KeyManager::new(key_store.clone(), cache, ConnectionCounter::new());
        (manager, key_store)
    }

    /// Scenario 1: rotation on count — keyRotationRequestCount=2, pool [A, B],
    /// three successful calls yield A, A, B.
    #[tokio::test]
    async fn rotation_on_count_yields_a_a_b() {
        let mut settings = Settings::default();
        settings.key_rotation_request_count = 2;
        settings.endpoint = "https://api.openai.com/v1".into();
        let (manager, key_store) = manager_with_settings(settings).await;

        let a = key_store.create(NewApiKey { value: "a".into(), name: None, profile: String::new(), daily_rate_limit: None }).await.unwrap();
        let b = key_store.create(NewApiKey { value: "b".into(), name: None, profile: String::new(), daily_rate_limit: None }).await.unwrap();

        let (_, id1) = manager.get_key().await.unwrap();
        manager.mark_key_success().await.unwrap();
        let (_, id2) = manager.get_key().await.unwrap();
        manager.mark_key_success().await.unwrap();
        let (_, id3) = manager.get_key().await.unwrap();

        assert_eq!(id1, a.id);
        assert_eq!(id2, a.id);
        assert_eq!(id3, b.id);
    }

    /// Scenario 2: 429 cooldown — single key, no other keys, raises
    /// NoKeysAvailable within the cooldown window and returns the key again
    /// once the cooldown has elapsed.
    #[tokio::test]
    async fn cooldown_blocks_then_releases_key() {
        let settings = Settings::default();
        let (manager, key_store) = manager_with_settings(settings).await;
        let a = key_store.create(NewApiKey { value: "a".into(), name: None, profile: String::new(), daily_rate_limit: None }).await.unwrap();

        let (_, id) = manager.get_key().await.unwrap();
        assert_eq!(id, a.id);

        let reset_at = Utc::now().timestamp() + 3600;
        let was_rl = manager.mark_key_error(KeyErrorOutcome::RateLimited { reset_at_unix: Some(reset_at) }).await.unwrap();
        assert!(was_rl);

        let err = manager.get_key().await.unwrap_err();
        assert!(matches!(err, llmproxy_core::error::LlmProxyError::NoKeysAvailable));
    }

    /// Scenario 3: daily reset — a key whose lastResetDate is yesterday and
    /// whose quota was exhausted resets on first observation today.
    #[tokio::test]
    async fn daily_reset_clears_stale_quota() {
        let settings = Settings::default();
        let (manager, key_store) = manager_with_settings(settings).await;
        let mut a = key_store.create(NewApiKey { value: "a".into(), name: None, profile: String::new(), daily_rate_limit: Some(1) }).await.unwrap();
        a.daily_requests_used = 1;
        a.last_reset_date = Some(Utc::now() - chrono::Duration::days(1));
        key_store.save(&a).await.unwrap();

        let (_, id) = manager.get_key().await.unwrap();
        assert_eq!(id, a.id);
    }

    /// Scenario 4: failure threshold — three consecutive non-429 errors
    /// deactivate the only key; the next getKey raises NoKeysAvailable.
    #[tokio::test]
    async fn failure_threshold_deactivates_key() {
        let mut settings = Settings::default();
        settings.max_failure_count = 3;
        let (manager, key_store) = manager_with_settings(settings).await;
        key_store.create(NewApiKey { value: "a".into(), name: None, profile: String::new(), daily_rate_limit: None }).await.unwrap();

        for _ in 0..3 {
            manager.get_key().await.unwrap();
            let was_rl = manager.mark_key_error(KeyErrorOutcome::Failure).await.unwrap();
            assert!(!was_rl);
        }

        let err = manager.get_key().await.unwrap_err();
        assert!(matches!(err, llmproxy_core::error::LlmProxyError::NoKeysAvailable));
    }

    /// Scenario 6: profile diversification — forcing rotation off an
    /// "openai" current key picks the "anthropic" candidate over another
    /// "openai" one.
    #[tokio::test]
    async fn profile_diversification_prefers_other_profile() {
        let mut settings = Settings::default();
        settings.key_rotation_request_count = 1;
        let (manager, key_store) = manager_with_settings(settings).await;
        key_store.create(NewApiKey { value: "a".into(), name: None, profile: "openai".into(), daily_rate_limit: None }).await.unwrap();
        let b = key_store.create(NewApiKey { value: "b".into(), name: None, profile: "anthropic".into(), daily_rate_limit: None }).await.unwrap();
        key_store.create(NewApiKey { value: "c".into(), name: None, profile: "openai".into(), daily_rate_limit: None }).await.unwrap();

        let (_, current_id) = manager.get_key().await.unwrap();
        manager.mark_key_success().await.unwrap();
        // current key's counter is now 1 >= rotation threshold, forcing rotation.
        let (_, rotated_id) = manager.get_key().await.unwrap();
        assert_ne!(rotated_id, current_id);
        assert_eq!(rotated_id, b.id);
    }

    #[tokio::test]
    async fn add_key_reactivates_existing_value() {
        let settings = Settings::default();
        let (manager, key_store) = manager_with_settings(settings).await;
        let mut existing = key_store.create(NewApiKey { value: "a".into(), name: None, profile: String::new(), daily_rate_limit: None }).await.unwrap();
        existing.is_active = false;
        existing.failure_count = 5;
        key_store.save(&existing).await.unwrap();

        let revived = manager.add_key("a".into(), None, Some("openai".into()), None).await.unwrap();
        assert_eq!(revived.id, existing.id);
        assert!(revived.is_active);
        assert_eq!(revived.failure_count, 0);
        assert_eq!(revived.profile, "openai");
    }

    #[tokio::test]
    async fn add_key_creates_when_value_unknown() {
        let settings = Settings::default();
        let (manager, _key_store) = manager_with_settings(settings).await;
        let created = manager.add_key("brand-new".into(), Some("main".into()), None, Some(100)).await.unwrap();
        assert_eq!(created.value, "brand-new");
        assert_eq!(created.daily_rate_limit, Some(100));
    }

    #[tokio::test]
    async fn round_robin_is_default_strategy() {
        let settings = Settings::default();
        assert_eq!(settings.load_balancing_strategy, LoadBalancingStrategyKind::RoundRobin);
    }
}

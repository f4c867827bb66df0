//! The mutex-guarded key scheduler (§4.4). Every public operation
//! acquires `state` once, does in-memory work plus persistence writes,
//! and releases; upstream HTTP I/O never happens under this lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use llmproxy_core::error::{LlmProxyError, Result};
use llmproxy_core::store::{KeyStore, NewApiKey, SettingsStore};
use llmproxy_core::types::{ApiKey, KeyFilter, Settings};
use tokio::sync::Mutex;

use crate::cache::SettingsCache;
use llmproxy_balancer::{strategy_for, ConnectionCounter};

struct KeyManagerState {
    current_key: Option<ApiKey>,
    request_counter: u32,
}

/// What kind of upstream failure the Proxy Pipeline observed, driving
/// which branch of `mark_key_error` (§4.4) applies.
#[derive(Debug, Clone)]
pub enum KeyErrorOutcome {
    /// A 429. `reset_at_unix` is the `x-ratelimit-reset` header value
    /// when the upstream provided one (interpreted as Unix seconds).
    RateLimited { reset_at_unix: Option<i64> },
    /// Any other failure that should count against `maxFailureCount`.
    Failure,
}

pub struct KeyManager<K: KeyStore + ?Sized, S: SettingsStore + ?Sized> {
    store: Arc<K>,
    settings: Arc<SettingsCache<S>>,
    connections: ConnectionCounter,
    state: Mutex<KeyManagerState>,
}

impl<K: KeyStore + ?Sized, S: SettingsStore + ?Sized> KeyManager<K, S> {
    pub fn new(store: Arc<K>, settings: Arc<SettingsCache<S>>, connections: ConnectionCounter) -> Self {
        Self { store, settings, connections, state: Mutex::new(KeyManagerState { current_key: None, request_counter: 0 }) }
    }

    /// Exposes the same cached settings snapshot the scheduler itself
    /// reads, so callers (the Proxy Pipeline) don't need a second cache
    /// instance just to read `endpoint`, `maxRetries`, and friends.
    pub async fn current_settings(&self) -> Result<Arc<Settings>> {
        self.settings.read().await
    }

    /// §4.4 `getKey`. Fails only with `NoKeysAvailable`; any persistence
    /// failure propagates as `LlmProxyError::Persistence`.
    pub async fn get_key(&self) -> Result<(String, String)> {
        let now = Utc::now();
        let settings = self.settings.read().await?;
        let mut state = self.state.lock().await;

        let prev_profile = state.current_key.as_ref().map(|k| k.profile.clone()).unwrap_or_default();

        if let Some(acquired) = self.try_current(&mut state, now, &settings).await? {
            return Ok(acquired);
        }

        self.rotate(&mut state, now, &settings, &prev_profile).await
    }

    /// Steps 1-6 of §4.4's `getKey` pipeline against whatever key is
    /// already installed. Returns `None` (clearing `state.current_key`)
    /// the moment any check fails, so the caller falls through to
    /// rotation.
    async fn try_current(
        &self,
        state: &mut KeyManagerState,
        now: DateTime<Utc>,
        settings: &Settings,
    ) -> Result<Option<(String, String)>> {
        let Some(current) = state.current_key.as_mut() else {
            return Ok(None);
        };

        // 1. Daily reset of current key.
        if current.needs_daily_reset(now) {
            current.daily_requests_used = 0;
            current.is_disabled_by_rate_limit = false;
            current.last_reset_date = Some(now);
            self.store.save(current).await?;
        }

        // 2. Global cooldown.
        if current.rate_limit_reset_at.map_or(false, |reset_at| reset_at > now) {
            state.current_key = None;
            return Ok(None);
        }

        // 3. Stale rate-limit flag.
        if current.is_disabled_by_rate_limit {
            state.current_key = None;
            return Ok(None);
        }

        // 4. Quota exhaustion.
        if let Some(limit) = current.daily_rate_limit {
            if current.daily_requests_used >= limit {
                current.is_disabled_by_rate_limit = true;
                self.store.save(current).await?;
                state.current_key = None;
                return Ok(None);
            }
        }

        // 5. Rotation by count — dropped without marking it bad.
        if settings.key_rotation_request_count > 0 && state.request_counter >= settings.key_rotation_request_count {
            state.current_key = None;
            return Ok(None);
        }

        // 6. Success.
        state.request_counter += 1;
        let current = state.current_key.as_ref().expect("checked present above");
        Ok(Some((current.value.clone(), current.id.clone())))
    }

    /// Steps a-e of §4.4's rotation: daily-reset sweep, candidate
    /// filtering, profile diversification, strategy selection, install.
    async fn rotate(
        &self,
        state: &mut KeyManagerState,
        now: DateTime<Utc>,
        settings: &Settings,
        prev_profile: &str,
    ) -> Result<(String, String)> {
        // a. Sweep.
        let active_keys = self.store.find_all(&KeyFilter { is_active: Some(true), ..Default::default() }).await?;
        let mut updates = HashMap::new();
        let mut swept = Vec::with_capacity(active_keys.len());
        for mut key in active_keys {
            if key.needs_daily_reset(now) {
                key.daily_requests_used = 0;
                key.is_disabled_by_rate_limit = false;
                key.last_reset_date = Some(now);
                updates.insert(key.id.clone(), key.clone());
            }
            swept.push(key);
        }
        if !updates.is_empty() {
            self.store.bulk_update(updates).await?;
        }

        // b. Candidates.
        let candidates: Vec<ApiKey> = swept
            .into_iter()
            .filter(|k| {
                k.is_active
                    && !k.is_disabled_by_rate_limit
                    && k.rate_limit_reset_at.map_or(true, |reset_at| reset_at <= now)
            })
            .collect();
        if candidates.is_empty() {
            llmproxy_telemetry::log_no_keys_available();
            return Err(LlmProxyError::NoKeysAvailable);
        }

        // c. Profile diversification.
        let different: Vec<ApiKey> =
            candidates.iter().filter(|k| k.profile != prev_profile && !k.profile.is_empty()).cloned().collect();
        let pool = if different.is_empty() {
            llmproxy_telemetry::log_rotation_fallback(prev_profile, candidates.len());
            candidates
        } else {
            different
        };

        // d. Selection.
        let strategy = strategy_for(settings.load_balancing_strategy, self.connections.clone());
        let chosen = strategy.select(&pool).clone();

        // e. Install.
        self.connections.increment(&chosen.id);
        llmproxy_telemetry::log_key_selected(&chosen.id, &chosen.profile, strategy_name(settings.load_balancing_strategy));
        let value = chosen.value.clone();
        let id = chosen.id.clone();
        state.current_key = Some(chosen);
        state.request_counter = 0;
        Ok((value, id))
    }

    /// §4.4 `markKeySuccess`. `requestCounter` was already incremented
    /// at acquisition time in `get_key`.
    pub async fn mark_key_success(&self) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let Some(current) = state.current_key.as_mut() else {
            return Ok(());
        };
        current.last_used = Some(now);
        current.request_count += 1;
        current.daily_requests_used += 1;
        self.store.save(current).await
    }

    /// §4.4 `markKeyError`. Returns whether the failure was a rate
    /// limit (`wasRateLimit`), driving the Proxy Pipeline's retry
    /// decision.
    pub async fn mark_key_error(&self, outcome: KeyErrorOutcome) -> Result<bool> {
        let settings = self.settings.read().await?;
        let mut state = self.state.lock().await;
        let Some(mut current) = state.current_key.take() else {
            return Ok(false);
        };

        match outcome {
            KeyErrorOutcome::RateLimited { reset_at_unix } => {
                let now = Utc::now();
                let reset_at = reset_at_unix
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .unwrap_or_else(|| now + chrono::Duration::seconds(settings.rate_limit_cooldown));
                current.rate_limit_reset_at = Some(reset_at);
                self.store.save(&current).await?;
                llmproxy_telemetry::log_key_rate_limited(&current.id, reset_at.timestamp());

                // The whole system treats a 429 as "do nothing else until
                // the cooldown nudge lands" — the sleep stays inside the
                // lock by design (§4.4, §9 open question (a) decided in
                // favor of the pinned in-lock behavior).
                if settings.failover_delay > 0 {
                    tokio::time::sleep(std::time::Duration::from_secs(settings.failover_delay as u64)).await;
                }

                self.connections.decrement(&current.id);
                Ok(true)
            }
            KeyErrorOutcome::Failure => {
                current.failure_count += 1;
                if current.failure_count >= settings.max_failure_count {
                    current.is_active = false;
                    self.store.save(&current).await?;
                    llmproxy_telemetry::log_key_deactivated(&current.id, current.failure_count);
                    self.connections.decrement(&current.id);
                } else {
                    self.store.save(&current).await?;
                    state.current_key = Some(current);
                }
                Ok(false)
            }
        }
    }

    /// §4.4 `addKey`.
    pub async fn add_key(
        &self,
        value: String,
        name: Option<String>,
        profile: Option<String>,
        daily_rate_limit: Option<u64>,
    ) -> Result<ApiKey> {
        if let Some(mut existing) = self.store.find_by_value(&value).await? {
            existing.is_active = true;
            existing.failure_count = 0;
            existing.rate_limit_reset_at = None;
            existing.daily_requests_used = 0;
            existing.last_reset_date = None;
            existing.is_disabled_by_rate_limit = false;
            if let Some(profile) = profile {
                existing.profile = profile;
            }
            self.store.save(&existing).await?;
            Ok(existing)
        } else {
            self.store
                .create(NewApiKey { value, name, profile: profile.unwrap_or_default(), daily_rate_limit })
                .await
        }
    }
}

fn strategy_name(kind: llmproxy_core::types::LoadBalancingStrategyKind) -> &'static str {
    use llmproxy_core::types::LoadBalancingStrategyKind::*;
    match kind {
        RoundRobin => "round-robin",
        Random => "random",
        LeastConnections => "least-connections",
    }
}

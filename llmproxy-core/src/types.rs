use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One upstream credential owned by the proxy.
///
/// `value` is the bearer secret forwarded to the upstream; `id` is an
/// opaque handle used everywhere else (logs, connection counters) so the
/// secret itself never needs to leave the Key Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub value: String,
    pub name: Option<String>,
    pub profile: String,
    pub is_active: bool,
    pub is_disabled_by_rate_limit: bool,
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub request_count: u64,
    pub daily_requests_used: u64,
    pub daily_rate_limit: Option<u64>,
    pub last_reset_date: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            name: None,
            profile: String::new(),
            is_active: true,
            is_disabled_by_rate_limit: false,
            rate_limit_reset_at: None,
            failure_count: 0,
            request_count: 0,
            daily_requests_used: 0,
            daily_rate_limit: None,
            last_reset_date: None,
            last_used: None,
        }
    }

    /// The "Default" profile is represented as an empty string on the wire
    /// (§3); this is the friendly accessor for it.
    pub fn profile_display(&self) -> &str {
        if self.profile.is_empty() {
            "Default"
        } else {
            &self.profile
        }
    }

    /// §3 invariant: usable iff active, not rate-limited, cooldown has
    /// elapsed (or was never set), and daily quota has headroom.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active || self.is_disabled_by_rate_limit {
            return false;
        }
        if let Some(reset_at) = self.rate_limit_reset_at {
            if reset_at > now {
                return false;
            }
        }
        if let Some(limit) = self.daily_rate_limit {
            if self.daily_requests_used >= limit {
                return false;
            }
        }
        true
    }

    /// Whether `last_reset_date` is absent or not on `now`'s UTC calendar day.
    pub fn needs_daily_reset(&self, now: DateTime<Utc>) -> bool {
        match self.last_reset_date {
            None => true,
            Some(ts) => ts.date_naive() != now.date_naive(),
        }
    }
}

/// Process-wide configuration (§3 "Settings").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub key_rotation_request_count: u32,
    pub max_failure_count: u32,
    pub rate_limit_cooldown: i64,
    pub log_retention_days: u32,
    pub max_retries: u32,
    pub endpoint: String,
    pub failover_delay: i64,
    pub load_balancing_strategy: LoadBalancingStrategyKind,
    pub request_rate_limit: u32,
    pub enable_google_grounding: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            key_rotation_request_count: 0,
            max_failure_count: 3,
            rate_limit_cooldown: 60,
            log_retention_days: 30,
            max_retries: 3,
            endpoint: String::new(),
            failover_delay: 0,
            load_balancing_strategy: LoadBalancingStrategyKind::RoundRobin,
            request_rate_limit: 0,
            enable_google_grounding: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingStrategyKind {
    RoundRobin,
    Random,
    LeastConnections,
}

/// One record per completed upstream attempt's final outcome (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub api_key_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status_code: u16,
    pub is_error: bool,
    pub error_type: Option<RequestLogErrorType>,
    pub error_message: Option<String>,
    pub model_used: Option<String>,
    pub response_time_ms: u64,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestLogErrorType {
    InvalidRequestError,
    ApiKeyError,
    UpstreamServerError,
    UpstreamTimeoutError,
    UpstreamError,
    MaxRetriesExceeded,
}

/// Predicate accepted by `KeyStore::find_all` / `find_one` (§4.1). A `None`
/// field means "don't filter on this"; `cooldown_elapsed` implements the
/// `rateLimitResetAt IS NULL OR rateLimitResetAt <= t` disjunction.
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    pub is_active: Option<bool>,
    pub is_disabled_by_rate_limit: Option<bool>,
    pub profile: Option<String>,
    pub cooldown_elapsed_at: Option<DateTime<Utc>>,
}

impl KeyFilter {
    pub fn matches(&self, key: &ApiKey) -> bool {
        if let Some(active) = self.is_active {
            if key.is_active != active {
                return false;
            }
        }
        if let Some(disabled) = self.is_disabled_by_rate_limit {
            if key.is_disabled_by_rate_limit != disabled {
                return false;
            }
        }
        if let Some(profile) = &self.profile {
            if &key.profile != profile {
                return false;
            }
        }
        if let Some(t) = self.cooldown_elapsed_at {
            let elapsed = key.rate_limit_reset_at.map_or(true, |reset| reset <= t);
            if !elapsed {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key() -> ApiKey {
        ApiKey::new("id-1", "secret-1")
    }

    #[test]
    fn fresh_key_is_usable() {
        assert!(key().is_usable(Utc::now()));
    }

    #[test]
    fn inactive_key_is_not_usable() {
        let mut k = key();
        k.is_active = false;
        assert!(!k.is_usable(Utc::now()));
    }

    #[test]
    fn cooldown_in_future_blocks_usability() {
        let mut k = key();
        k.rate_limit_reset_at = Some(Utc::now() + Duration::seconds(30));
        assert!(!k.is_usable(Utc::now()));
    }

    #[test]
    fn cooldown_in_past_allows_usability() {
        let mut k = key();
        k.rate_limit_reset_at = Some(Utc::now() - Duration::seconds(30));
        assert!(k.is_usable(Utc::now()));
    }

    #[test]
    fn quota_exhausted_blocks_usability() {
        let mut k = key();
        k.daily_rate_limit = Some(5);
        k.daily_requests_used = 5;
        assert!(!k.is_usable(Utc::now()));
    }

    #[test]
    fn quota_with_headroom_allows_usability() {
        let mut k = key();
        k.daily_rate_limit = Some(5);
        k.daily_requests_used = 4;
        assert!(k.is_usable(Utc::now()));
    }

    #[test]
    fn needs_daily_reset_when_never_reset() {
        assert!(key().needs_daily_reset(Utc::now()));
    }

    #[test]
    fn needs_daily_reset_when_stale_day() {
        let mut k = key();
        k.last_reset_date = Some(Utc::now() - Duration::days(1));
        assert!(k.needs_daily_reset(Utc::now()));
    }

    #[test]
    fn no_reset_needed_same_utc_day() {
        let mut k = key();
        k.last_reset_date = Some(Utc::now());
        assert!(!k.needs_daily_reset(Utc::now()));
    }

    #[test]
    fn key_filter_matches_all_fields() {
        let mut k = key();
        k.profile = "openai".to_string();
        let filter = KeyFilter {
            is_active: Some(true),
            is_disabled_by_rate_limit: Some(false),
            profile: Some("openai".to_string()),
            cooldown_elapsed_at: None,
        };
        assert!(filter.matches(&k));
    }

    #[test]
    fn key_filter_rejects_profile_mismatch() {
        let k = key();
        let filter = KeyFilter { profile: Some("anthropic".to_string()), ..Default::default() };
        assert!(!filter.matches(&k));
    }

    #[test]
    fn key_filter_cooldown_disjunction() {
        let mut k = key();
        k.rate_limit_reset_at = Some(Utc::now() + Duration::seconds(60));
        let t = Utc::now();
        let filter = KeyFilter { cooldown_elapsed_at: Some(t), ..Default::default() };
        assert!(!filter.matches(&k));

        k.rate_limit_reset_at = Some(t - Duration::seconds(1));
        assert!(filter.matches(&k));
    }

    #[test]
    fn profile_display_defaults_to_default_label() {
        assert_eq!(key().profile_display(), "Default");
    }
}

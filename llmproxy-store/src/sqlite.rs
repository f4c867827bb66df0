//! SQLite-backed persistence (feature `sqlite`), grounded in the same
//! `sqlx` stack the teacher workspace uses for its durable memory
//! backends. Schema is two tables (`keys`, `logs`) plus a single-row
//! `settings` table, matching §6's "implementation-defined" layout.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use llmproxy_core::error::{LlmProxyError, Result};
use llmproxy_core::store::{KeyStore, LogStore, NewApiKey, SettingsStore};
use llmproxy_core::types::{ApiKey, KeyFilter, LoadBalancingStrategyKind, RequestLog, RequestLogErrorType, Settings};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const SETTINGS_ROW_ID: i64 = 1;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| LlmProxyError::Persistence(format!("failed to connect to sqlite: {e}")))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS keys (
                id TEXT PRIMARY KEY,
                value TEXT NOT NULL UNIQUE,
                name TEXT,
                profile TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1,
                is_disabled_by_rate_limit INTEGER NOT NULL DEFAULT 0,
                rate_limit_reset_at TEXT,
                failure_count INTEGER NOT NULL DEFAULT 0,
                request_count INTEGER NOT NULL DEFAULT 0,
                daily_requests_used INTEGER NOT NULL DEFAULT 0,
                daily_rate_limit INTEGER,
                last_reset_date TEXT,
                last_used TEXT
            );

            CREATE TABLE IF NOT EXISTS logs (
                id TEXT PRIMARY KEY,
                api_key_id TEXT,
                timestamp TEXT NOT NULL,
                status_code INTEGER NOT NULL,
                is_error INTEGER NOT NULL,
                error_type TEXT,
                error_message TEXT,
                model_used TEXT,
                response_time_ms INTEGER NOT NULL,
                ip_address TEXT
            );

            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                key_rotation_request_count INTEGER NOT NULL,
                max_failure_count INTEGER NOT NULL,
                rate_limit_cooldown INTEGER NOT NULL,
                log_retention_days INTEGER NOT NULL,
                max_retries INTEGER NOT NULL,
                endpoint TEXT NOT NULL,
                failover_delay INTEGER NOT NULL,
                load_balancing_strategy TEXT NOT NULL,
                request_rate_limit INTEGER NOT NULL,
                enable_google_grounding INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LlmProxyError::Persistence(format!("migration failed: {e}")))?;
        Ok(())
    }

    fn row_to_key(row: &sqlx::sqlite::SqliteRow) -> ApiKey {
        ApiKey {
            id: row.get("id"),
            value: row.get("value"),
            name: row.get("name"),
            profile: row.get("profile"),
            is_active: row.get::<i64, _>("is_active") != 0,
            is_disabled_by_rate_limit: row.get::<i64, _>("is_disabled_by_rate_limit") != 0,
            rate_limit_reset_at: row.get::<Option<String>, _>("rate_limit_reset_at").and_then(|s| parse_ts(&s)),
            failure_count: row.get::<i64, _>("failure_count") as u32,
            request_count: row.get::<i64, _>("request_count") as u64,
            daily_requests_used: row.get::<i64, _>("daily_requests_used") as u64,
            daily_rate_limit: row.get::<Option<i64>, _>("daily_rate_limit").map(|v| v as u64),
            last_reset_date: row.get::<Option<String>, _>("last_reset_date").and_then(|s| parse_ts(&s)),
            last_used: row.get::<Option<String>, _>("last_used").and_then(|s| parse_ts(&s)),
        }
    }
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

async fn upsert_key(pool: &SqlitePool, key: &ApiKey) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO keys (
            id, value, name, profile, is_active, is_disabled_by_rate_limit,
            rate_limit_reset_at, failure_count, request_count, daily_requests_used,
            daily_rate_limit, last_reset_date, last_used
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            value = excluded.value,
            name = excluded.name,
            profile = excluded.profile,
            is_active = excluded.is_active,
            is_disabled_by_rate_limit = excluded.is_disabled_by_rate_limit,
            rate_limit_reset_at = excluded.rate_limit_reset_at,
            failure_count = excluded.failure_count,
            request_count = excluded.request_count,
            daily_requests_used = excluded.daily_requests_used,
            daily_rate_limit = excluded.daily_rate_limit,
            last_reset_date = excluded.last_reset_date,
            last_used = excluded.last_used
        "#,
    )
    .bind(&key.id)
    .bind(&key.value)
    .bind(&key.name)
    .bind(&key.profile)
    .bind(key.is_active as i64)
    .bind(key.is_disabled_by_rate_limit as i64)
    .bind(key.rate_limit_reset_at.map(|t| t.to_rfc3339()))
    .bind(key.failure_count as i64)
    .bind(key.request_count as i64)
    .bind(key.daily_requests_used as i64)
    .bind(key.daily_rate_limit.map(|v| v as i64))
    .bind(key.last_reset_date.map(|t| t.to_rfc3339()))
    .bind(key.last_used.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await
    .map_err(|e| LlmProxyError::Persistence(format!("key upsert failed: {e}")))?;
    Ok(())
}

#[async_trait]
impl KeyStore for SqliteStore {
    async fn find_one(&self, filter: &KeyFilter) -> Result<Option<ApiKey>> {
        Ok(self.find_all(filter).await?.into_iter().next())
    }

    async fn find_by_value(&self, value: &str) -> Result<Option<ApiKey>> {
        let row = sqlx::query("SELECT * FROM keys WHERE value = ?")
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LlmProxyError::Persistence(format!("find_by_value failed: {e}")))?;
        Ok(row.as_ref().map(Self::row_to_key))
    }

    async fn find_all(&self, filter: &KeyFilter) -> Result<Vec<ApiKey>> {
        // Predicate evaluation happens in-process rather than as SQL WHERE
        // clauses: the filter set is small and this keeps §4.1's
        // cooldown-disjunction semantics identical across both backends.
        let rows = sqlx::query("SELECT * FROM keys")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LlmProxyError::Persistence(format!("find_all failed: {e}")))?;
        Ok(rows.iter().map(Self::row_to_key).filter(|k| filter.matches(k)).collect())
    }

    async fn create(&self, fields: NewApiKey) -> Result<ApiKey> {
        let mut key = ApiKey::new(Uuid::new_v4().to_string(), fields.value);
        key.name = fields.name;
        key.profile = fields.profile;
        key.daily_rate_limit = fields.daily_rate_limit;
        upsert_key(&self.pool, &key).await?;
        Ok(key)
    }

    async fn save(&self, key: &ApiKey) -> Result<()> {
        upsert_key(&self.pool, key).await
    }

    async fn bulk_update(&self, updates: HashMap<String, ApiKey>) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LlmProxyError::Persistence(format!("bulk_update begin failed: {e}")))?;
        for key in updates.values() {
            upsert_key_tx(&mut tx, key).await?;
        }
        tx.commit().await.map_err(|e| LlmProxyError::Persistence(format!("bulk_update commit failed: {e}")))?;
        Ok(())
    }
}

async fn upsert_key_tx(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, key: &ApiKey) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO keys (
            id, value, name, profile, is_active, is_disabled_by_rate_limit,
            rate_limit_reset_at, failure_count, request_count, daily_requests_used,
            daily_rate_limit, last_reset_date, last_used
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            value = excluded.value,
            name = excluded.name,
            profile = excluded.profile,
            is_active = excluded.is_active,
            is_disabled_by_rate_limit = excluded.is_disabled_by_rate_limit,
            rate_limit_reset_at = excluded.rate_limit_reset_at,
            failure_count = excluded.failure_count,
            request_count = excluded.request_count,
            daily_requests_used = excluded.daily_requests_used,
            daily_rate_limit = excluded.daily_rate_limit,
            last_reset_date = excluded.last_reset_date,
            last_used = excluded.last_used
        "#,
    )
    .bind(&key.id)
    .bind(&key.value)
    .bind(&key.name)
    .bind(&key.profile)
    .bind(key.is_active as i64)
    .bind(key.is_disabled_by_rate_limit as i64)
    .bind(key.rate_limit_reset_at.map(|t| t.to_rfc3339()))
    .bind(key.failure_count as i64)
    .bind(key.request_count as i64)
    .bind(key.daily_requests_used as i64)
    .bind(key.daily_rate_limit.map(|v| v as i64))
    .bind(key.last_reset_date.map(|t| t.to_rfc3339()))
    .bind(key.last_used.map(|t| t.to_rfc3339()))
    .execute(&mut **tx)
    .await
    .map_err(|e| LlmProxyError::Persistence(format!("key upsert (tx) failed: {e}")))?;
    Ok(())
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn create(&self, record: RequestLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO logs (
                id, api_key_id, timestamp, status_code, is_error, error_type,
                error_message, model_used, response_time_ms, ip_address
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&record.api_key_id)
        .bind(record.timestamp.to_rfc3339())
        .bind(record.status_code as i64)
        .bind(record.is_error as i64)
        .bind(record.error_type.map(error_type_str))
        .bind(&record.error_message)
        .bind(&record.model_used)
        .bind(record.response_time_ms as i64)
        .bind(&record.ip_address)
        .execute(&self.pool)
        .await
        .map_err(|e| LlmProxyError::Persistence(format!("log insert failed: {e}")))?;
        Ok(())
    }
}

fn error_type_str(e: RequestLogErrorType) -> &'static str {
    match e {
        RequestLogErrorType::InvalidRequestError => "InvalidRequestError",
        RequestLogErrorType::ApiKeyError => "ApiKeyError",
        RequestLogErrorType::UpstreamServerError => "UpstreamServerError",
        RequestLogErrorType::UpstreamTimeoutError => "UpstreamTimeoutError",
        RequestLogErrorType::UpstreamError => "UpstreamError",
        RequestLogErrorType::MaxRetriesExceeded => "MaxRetriesExceeded",
    }
}

fn strategy_str(s: LoadBalancingStrategyKind) -> &'static str {
    match s {
        LoadBalancingStrategyKind::RoundRobin => "round-robin",
        LoadBalancingStrategyKind::Random => "random",
        LoadBalancingStrategyKind::LeastConnections => "least-connections",
    }
}

fn strategy_from_str(s: &str) -> LoadBalancingStrategyKind {
    match s {
        "random" => LoadBalancingStrategyKind::Random,
        "least-connections" => LoadBalancingStrategyKind::LeastConnections,
        _ => LoadBalancingStrategyKind::RoundRobin,
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn read(&self) -> Result<Settings> {
        let row = sqlx::query("SELECT * FROM settings WHERE id = ?")
            .bind(SETTINGS_ROW_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LlmProxyError::Persistence(format!("settings read failed: {e}")))?;
        Ok(match row {
            Some(row) => Settings {
                key_rotation_request_count: row.get::<i64, _>("key_rotation_request_count") as u32,
                max_failure_count: row.get::<i64, _>("max_failure_count") as u32,
                rate_limit_cooldown: row.get::<i64, _>("rate_limit_cooldown"),
                log_retention_days: row.get::<i64, _>("log_retention_days") as u32,
                max_retries: row.get::<i64, _>("max_retries") as u32,
                endpoint: row.get("endpoint"),
                failover_delay: row.get::<i64, _>("failover_delay"),
                load_balancing_strategy: strategy_from_str(row.get::<&str, _>("load_balancing_strategy")),
                request_rate_limit: row.get::<i64, _>("request_rate_limit") as u32,
                enable_google_grounding: row.get::<i64, _>("enable_google_grounding") != 0,
            },
            None => Settings::default(),
        })
    }

    async fn write(&self, settings: &Settings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (
                id, key_rotation_request_count, max_failure_count, rate_limit_cooldown,
                log_retention_days, max_retries, endpoint, failover_delay,
                load_balancing_strategy, request_rate_limit, enable_google_grounding
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                key_rotation_request_count = excluded.key_rotation_request_count,
                max_failure_count = excluded.max_failure_count,
                rate_limit_cooldown = excluded.rate_limit_cooldown,
                log_retention_days = excluded.log_retention_days,
                max_retries = excluded.max_retries,
                endpoint = excluded.endpoint,
                failover_delay = excluded.failover_delay,
                load_balancing_strategy = excluded.load_balancing_strategy,
                request_rate_limit = excluded.request_rate_limit,
                enable_google_grounding = excluded.enable_google_grounding
            "#,
        )
        .bind(SETTINGS_ROW_ID)
        .bind(settings.key_rotation_request_count as i64)
        .bind(settings.max_failure_count as i64)
        .bind(settings.rate_limit_cooldown)
        .bind(settings.log_retention_days as i64)
        .bind(settings.max_retries as i64)
        .bind(&settings.endpoint)
        .bind(settings.failover_delay)
        .bind(strategy_str(settings.load_balancing_strategy))
        .bind(settings.request_rate_limit as i64)
        .bind(settings.enable_google_grounding as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| LlmProxyError::Persistence(format!("settings write failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn migrate_then_create_then_find() {
        let store = store().await;
        let created = store
            .create(NewApiKey { value: "sk-abc".into(), name: Some("primary".into()), profile: String::new(), daily_rate_limit: None })
            .await
            .unwrap();
        let found = store.find_by_value("sk-abc").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.name.as_deref(), Some("primary"));
    }

    #[tokio::test]
    async fn settings_round_trip_defaults_when_absent() {
        let store = store().await;
        let settings = store.read().await.unwrap();
        assert_eq!(settings.max_retries, 3);
    }

    #[tokio::test]
    async fn settings_write_then_read_back() {
        let store = store().await;
        let mut s = Settings::default();
        s.endpoint = "https://api.openai.com/v1".into();
        s.load_balancing_strategy = LoadBalancingStrategyKind::LeastConnections;
        store.write(&s).await.unwrap();
        let read_back = store.read().await.unwrap();
        assert_eq!(read_back.endpoint, "https://api.openai.com/v1");
        assert_eq!(read_back.load_balancing_strategy, LoadBalancingStrategyKind::LeastConnections);
    }

    #[tokio::test]
    async fn bulk_update_is_atomic_across_rows() {
        let store = store().await;
        let a = store.create(NewApiKey { value: "a".into(), name: None, profile: String::new(), daily_rate_limit: None }).await.unwrap();
        let b = store.create(NewApiKey { value: "b".into(), name: None, profile: String::new(), daily_rate_limit: None }).await.unwrap();

        let mut updates = HashMap::new();
        let mut a2 = a.clone();
        a2.daily_requests_used = 3;
        let mut b2 = b.clone();
        b2.daily_requests_used = 5;
        updates.insert(a2.id.clone(), a2);
        updates.insert(b2.id.clone(), b2);
        store.bulk_update(updates).await.unwrap();

        let all = store.find_all(&KeyFilter::default()).await.unwrap();
        assert_eq!(all.iter().find(|k| k.id == a.id).unwrap().daily_requests_used, 3);
        assert_eq!(all.iter().find(|k| k.id == b.id).unwrap().daily_requests_used, 5);
    }
}

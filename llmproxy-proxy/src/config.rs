//! Process configuration loaded once at startup from environment
//! variables and CLI flags.

use std::net::SocketAddr;

use llmproxy_core::error::{LlmProxyError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub master_api_key: Option<String>,
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    /// Carried through for completeness (§6) but never read by this
    /// crate: the admin surface is out of scope.
    pub admin_password: Option<String>,
    pub require_admin_login: bool,
}

impl Config {
    pub fn from_env(bind_override: Option<String>) -> Result<Self> {
        let bind_str = bind_override
            .or_else(|| std::env::var("BIND_ADDR").ok())
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let bind_addr = bind_str
            .parse::<SocketAddr>()
            .map_err(|e| LlmProxyError::Config(format!("invalid BIND_ADDR '{bind_str}': {e}")))?;

        Ok(Self {
            master_api_key: std::env::var("MASTER_API_KEY").ok(),
            bind_addr,
            database_url: std::env::var("DATABASE_URL").ok(),
            admin_password: std::env::var("ADMIN_PASSWORD").ok(),
            require_admin_login: std::env::var("REQUIRE_ADMIN_LOGIN").map(|v| v == "true").unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_override_takes_precedence() {
        let config = Config::from_env(Some("127.0.0.1:9090".to_string())).unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9090");
    }

    #[test]
    fn invalid_bind_address_is_a_config_error() {
        let err = Config::from_env(Some("not-an-address".to_string())).unwrap_err();
        assert!(matches!(err, LlmProxyError::Config(_)));
    }
}

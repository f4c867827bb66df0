//! Domain types, error taxonomy, and persistence contracts shared by every
//! other crate in the key-rotation reverse proxy.

pub mod error;
pub mod store;
pub mod types;

pub use error::{LlmProxyError, Result};
pub use store::{KeyStore, LogStore, NewApiKey, SettingsStore};
pub use types::{ApiKey, KeyFilter, LoadBalancingStrategyKind, RequestLog, RequestLogErrorType, Settings};

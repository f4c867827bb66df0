use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use llmproxy_balancer::ConnectionCounter;
use llmproxy_core::store::{KeyStore, SettingsStore};
use llmproxy_core::types::Settings;
use llmproxy_keymanager::{KeyManager, SettingsCache};
use llmproxy_proxy::state::{AppKeyManager, AppState, DynLogStore};
use llmproxy_proxy::{build_router, Config};
use llmproxy_telemetry::LogFormat;
use llmproxy_store::{InMemoryKeyStore, InMemoryLogStore, InMemorySettingsStore};

#[derive(Parser, Debug)]
#[command(name = "llmproxy", about = "LLM API key-rotation reverse proxy")]
struct Cli {
    /// Override BIND_ADDR, e.g. 127.0.0.1:8080
    #[arg(long)]
    bind: Option<String>,

    /// Run pending migrations against DATABASE_URL and exit.
    #[cfg(feature = "sqlite")]
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    llmproxy_telemetry::init_tracing(LogFormat::from_env());

    let config = Config::from_env(cli.bind)?;

    #[cfg(feature = "sqlite")]
    if cli.migrate {
        let database_url = config
            .database_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--migrate requires DATABASE_URL to be set"))?;
        let store = llmproxy_store::SqliteStore::connect(&database_url).await?;
        store.migrate().await?;
        tracing::info!("migrations applied");
        return Ok(());
    }

    let key_manager: Arc<AppKeyManager>;
    let log_store: Arc<DynLogStore>;
    let connections = ConnectionCounter::default();

    #[cfg(feature = "sqlite")]
    {
        if let Some(database_url) = &config.database_url {
            let store = Arc::new(llmproxy_store::SqliteStore::connect(database_url).await?);
            let cache = Arc::new(SettingsCache::new(dyn_settings_store(store.clone())));
            key_manager = Arc::new(KeyManager::new(dyn_key_store(store.clone()), cache, connections.clone()));
            log_store = dyn_log_store(store);
            serve(config.bind_addr, key_manager, log_store, connections, config.master_api_key).await?;
            return Ok(());
        }
    }

    let key_store: Arc<InMemoryKeyStore> = Arc::new(InMemoryKeyStore::default());
    let settings_store: Arc<InMemorySettingsStore> = Arc::new(InMemorySettingsStore::new(Settings::default()));
    let cache = Arc::new(SettingsCache::new(settings_store as Arc<dyn SettingsStore>));
    key_manager = Arc::new(KeyManager::new(key_store as Arc<dyn KeyStore>, cache, connections.clone()));
    log_store = Arc::new(InMemoryLogStore::default());

    serve(config.bind_addr, key_manager, log_store, connections, config.master_api_key).await
}

#[cfg(feature = "sqlite")]
fn dyn_key_store(store: Arc<llmproxy_store::SqliteStore>) -> Arc<dyn KeyStore> {
    store
}

#[cfg(feature = "sqlite")]
fn dyn_settings_store(store: Arc<llmproxy_store::SqliteStore>) -> Arc<dyn SettingsStore> {
    store
}

#[cfg(feature = "sqlite")]
fn dyn_log_store(store: Arc<llmproxy_store::SqliteStore>) -> Arc<DynLogStore> {
    store
}

async fn serve(
    bind_addr: SocketAddr,
    key_manager: Arc<AppKeyManager>,
    log_store: Arc<DynLogStore>,
    connections: ConnectionCounter,
    master_api_key: Option<String>,
) -> anyhow::Result<()> {
    connections.clone().spawn_janitor();

    let state = AppState::new(key_manager, log_store, connections, master_api_key);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

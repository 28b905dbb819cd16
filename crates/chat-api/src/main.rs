//! Conversation memory REST API server.

use chat_api::server::{self, AppState};
use chat_auth::IdentityResolver;
use chat_cache::InMemoryCache;
use chat_llm::OpenAiGenerator;
use chat_memory::{MemoryConfig, MemoryService};
use chat_store::{DurableStore, InMemoryStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[cfg(feature = "sqlite")]
fn open_store(config: &MemoryConfig) -> Result<Arc<dyn DurableStore>, BoxError> {
    match std::env::var("CHAT_SQLITE_PATH") {
        Ok(path) => {
            tracing::info!(path = %path, "using SQLite store");
            Ok(config.bound_store(chat_store::SqliteStore::new(&path)?))
        }
        Err(_) => Ok(config.bound_store(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "sqlite"))]
fn open_store(config: &MemoryConfig) -> Result<Arc<dyn DurableStore>, BoxError> {
    if std::env::var("CHAT_SQLITE_PATH").is_ok() {
        tracing::warn!("CHAT_SQLITE_PATH set but built without the sqlite feature; using in-memory store");
    }
    Ok(config.bound_store(InMemoryStore::new()))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MemoryConfig::from_env();
    let store = open_store(&config)?;
    let cache = Arc::new(InMemoryCache::new());

    let mut memory = MemoryService::new(store.clone(), cache, config);
    match OpenAiGenerator::from_env() {
        Some(generator) => memory = memory.with_generator(Arc::new(generator)),
        None => tracing::warn!("LLM_API_KEY not set; chat endpoint disabled"),
    }

    let state = Arc::new(AppState {
        memory: Arc::new(memory),
        resolver: Arc::new(IdentityResolver::new(store)),
    });
    let app = server::router(state);
    let addr: SocketAddr = std::env::var("CHAT_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:8002".to_string())
        .parse()?;
    tracing::info!("chat memory API listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .await?;
    Ok(())
}

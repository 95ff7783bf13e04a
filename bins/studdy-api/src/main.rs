mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use std::sync::Arc;
use studdy_common::config::{Config, StoreBackend};
use studdy_common::judge::HttpJudge;
use studdy_common::llm::AnthropicGenerator;
use studdy_common::service::Service;
use studdy_common::store::{DocumentStore, MemoryStore, RedisStore};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub struct AppState {
    pub service: Service,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("StuddyBuddy API booting...");

    let config = Config::from_env().context("invalid configuration")?;

    let store: Arc<dyn DocumentStore> = match config.store_backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url)
                .await
                .context("failed to connect to Redis")?;
            info!("Connected to Redis: {}", config.redis_url);
            Arc::new(store)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let judge = HttpJudge::new(&config.judge)?;
    let mut service = Service::new(store, Arc::new(judge), config.judge.poll);
    match config.llm.clone() {
        Some(llm) => {
            info!(model = %llm.model, "AI feedback enabled");
            service = service.with_llm(Arc::new(AnthropicGenerator::new(llm)?));
        }
        None => info!("LLM_API_KEY not set, AI feedback disabled"),
    }

    let state = Arc::new(AppState { service });
    let app = routes::build_app(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

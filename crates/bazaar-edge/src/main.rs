//! Edge binary: assemble the middleware stack and serve HTTP until
//! interrupted.

use anyhow::{Context, Result};
use bazaar_edge::limiter::{CounterStore, MemoryCounterStore, RedisCounterStore, WindowLimiter};
use bazaar_edge::routes::{build_router, AppState};
use bazaar_edge::{EdgeConfig, EngineClient};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "BAZAAR_EDGE_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "edge.toml".to_string());
    let config = EdgeConfig::load(&config_path)
        .with_context(|| format!("loading config from {config_path}"))?;

    let counters: Box<dyn CounterStore> = match &config.cache_url {
        Some(url) => Box::new(
            RedisCounterStore::connect(url)
                .await
                .with_context(|| format!("connecting rate-limit cache at {url}"))?,
        ),
        None => {
            warn!("no cache_url configured; rate limits are per-replica only");
            Box::new(MemoryCounterStore::new())
        }
    };
    let limiter = Arc::new(WindowLimiter::new(
        counters,
        config.rate_limit_per_window,
        config.rate_limit_window_seconds,
    ));

    let state = AppState {
        engine: EngineClient::new(config.engine_rpc_addr),
        negotiate_deadline: config.negotiate_deadline(),
        status_deadline: config.status_deadline(),
        ready_deadline: config.ready_deadline(),
    };
    let router = build_router(state, limiter, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, engine = %config.engine_rpc_addr, "edge listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("http server stopped")?;
    Ok(())
}

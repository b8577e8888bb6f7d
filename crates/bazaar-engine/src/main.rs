//! Engine binary: wire configuration into the negotiation service and run
//! the RPC server until interrupted.

use anyhow::{Context, Result};
use bazaar_engine::catalog::HttpCatalog;
use bazaar_engine::chain::rpc::HttpChainRpc;
use bazaar_engine::chain::ChainWatcher;
use bazaar_engine::deals::store::{InMemoryStore, KeyValueStore, RocksDbStore};
use bazaar_engine::deals::DealRepository;
use bazaar_engine::price::PriceConverter;
use bazaar_engine::secrets::SecretBox;
use bazaar_engine::strategy::build_strategy;
use bazaar_engine::wallet::ReceivingWallet;
use bazaar_engine::{EngineConfig, NegotiationService, SettlementStack};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "BAZAAR_ENGINE_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path =
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| "engine.toml".to_string());
    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("loading config from {config_path}"))?;

    let service = build_service(&config)?;
    info!(
        strategy = %config.strategy,
        crypto_enabled = config.crypto_enabled,
        "engine assembled"
    );

    let listener = TcpListener::bind(config.engine_rpc_addr)
        .await
        .with_context(|| format!("binding {}", config.engine_rpc_addr))?;

    tokio::select! {
        result = bazaar_engine::server::serve(listener, service) => {
            result.context("rpc server stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
    Ok(())
}

fn build_service(config: &EngineConfig) -> Result<Arc<NegotiationService>> {
    let catalog = Arc::new(HttpCatalog::new(config.catalog_url.clone())?);
    let strategy = build_strategy(config)?;

    let settlement = if config.crypto_enabled {
        let wallet_key = config
            .receiving_wallet_key
            .as_deref()
            .context("receiving_wallet_key required")?;
        let wallet = ReceivingWallet::from_base58_secret(wallet_key)?;
        let cipher_key = config
            .secret_encryption_key
            .as_deref()
            .context("secret_encryption_key required")?;
        let secrets = SecretBox::from_hex(cipher_key)?;

        let store: Arc<dyn KeyValueStore> = if config.use_memory_store {
            Arc::new(InMemoryStore::new())
        } else {
            Arc::new(RocksDbStore::open(&config.data_dir)?)
        };
        let repository = DealRepository::new(
            store,
            secrets,
            PriceConverter::from_config(config),
            wallet.address().to_string(),
            config.chain_network.clone(),
            config.crypto_currency,
            config.deal_ttl_seconds,
        );
        let watcher = ChainWatcher::new(
            Arc::new(HttpChainRpc::new(config.chain_rpc_url.clone())?),
            wallet.address().to_string(),
            config.stable_token_mint.clone(),
        );
        Some(SettlementStack {
            repository,
            watcher,
        })
    } else {
        None
    };

    Ok(Arc::new(NegotiationService::new(
        catalog,
        strategy,
        settlement,
        config.deal_ttl_seconds,
    )))
}

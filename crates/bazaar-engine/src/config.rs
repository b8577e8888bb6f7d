//! Engine configuration with validation.
//!
//! The option surface is deliberately flat and closed: every recognized key
//! is a field below, and `deny_unknown_fields` turns a stray key into a
//! load-time error instead of a silent no-op. Secrets (`receiving_wallet_key`,
//! `secret_encryption_key`, `llm_api_key`) are loaded once here and handed to
//! subsystems by explicit construction.

use bazaar_types::CryptoCurrency;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Errors surfaced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Recognized engine options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Bind address for the internal RPC server.
    pub engine_rpc_addr: SocketAddr,
    /// Base URL of the item catalog service.
    pub catalog_url: String,
    /// Directory for the embedded deal store.
    pub data_dir: PathBuf,
    /// Swap the durable store for an in-process map (development only).
    pub use_memory_store: bool,

    /// `rule`, or a model tag selecting the LLM strategy.
    pub strategy: String,
    /// Bids above this yield a ui_required decision from the rule strategy.
    pub high_value_threshold: f64,
    /// Payment-lock expiration.
    pub deal_ttl_seconds: u64,

    /// Gate on all payment-lock behavior.
    pub crypto_enabled: bool,
    pub crypto_currency: CryptoCurrency,
    /// Base58 secret of the receiving wallet; required when crypto is on.
    pub receiving_wallet_key: Option<String>,
    pub chain_rpc_url: String,
    pub chain_network: String,
    /// On-chain identifier of the accepted stablecoin.
    pub stable_token_mint: String,
    /// 64 hex chars (32 bytes) keying the reservation-secret cipher.
    pub secret_encryption_key: Option<String>,

    pub use_fixed_rates: bool,
    pub usd_per_native: f64,
    pub usd_per_stable: f64,

    /// Chat-completion endpoint for LLM strategies.
    pub llm_api_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_business_type: String,
    /// Demand signal in [0, 1] fed to the model prompt.
    pub llm_market_load: f64,
    pub llm_trigger_price: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_rpc_addr: "127.0.0.1:7401".parse().expect("static addr"),
            catalog_url: "http://127.0.0.1:9200".into(),
            data_dir: PathBuf::from("./data/engine"),
            use_memory_store: false,
            strategy: "rule".into(),
            high_value_threshold: 1000.0,
            deal_ttl_seconds: 3600,
            crypto_enabled: false,
            crypto_currency: CryptoCurrency::Sol,
            receiving_wallet_key: None,
            chain_rpc_url: "https://api.devnet.solana.com".into(),
            chain_network: "devnet".into(),
            stable_token_mint: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".into(),
            secret_encryption_key: None,
            use_fixed_rates: true,
            usd_per_native: 100.0,
            usd_per_stable: 1.0,
            llm_api_url: None,
            llm_api_key: None,
            llm_business_type: "hospitality".into(),
            llm_market_load: 0.5,
            llm_trigger_price: None,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, falling back to defaults when the file is
    /// absent. Unknown keys are an error, not a warning.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let cfg = match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.into(),
                    source: e,
                })
            }
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.high_value_threshold <= 0.0 {
            return Err(ConfigError::Invalid(
                "high_value_threshold must be positive".into(),
            ));
        }
        if self.deal_ttl_seconds == 0 {
            return Err(ConfigError::Invalid(
                "deal_ttl_seconds must be positive".into(),
            ));
        }
        if !self.use_fixed_rates {
            // Live rates need an oracle that is not wired up yet; refuse to
            // start rather than guess.
            return Err(ConfigError::Invalid(
                "use_fixed_rates = false is not supported".into(),
            ));
        }
        if self.usd_per_native <= 0.0 || self.usd_per_stable <= 0.0 {
            return Err(ConfigError::Invalid(
                "exchange rates must be positive".into(),
            ));
        }
        if self.strategy != "rule" && self.llm_api_url.is_none() {
            return Err(ConfigError::Invalid(format!(
                "strategy `{}` requires llm_api_url",
                self.strategy
            )));
        }
        if self.crypto_enabled {
            if self.receiving_wallet_key.is_none() {
                return Err(ConfigError::Invalid(
                    "crypto_enabled requires receiving_wallet_key".into(),
                ));
            }
            let key = self.secret_encryption_key.as_deref().unwrap_or("");
            if key.len() != 64 || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ConfigError::Invalid(
                    "crypto_enabled requires secret_encryption_key (64 hex chars)".into(),
                ));
            }
            if self.chain_rpc_url.is_empty() {
                return Err(ConfigError::Invalid(
                    "crypto_enabled requires chain_rpc_url".into(),
                ));
            }
        }
        Ok(())
    }
}

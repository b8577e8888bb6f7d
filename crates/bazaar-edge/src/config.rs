//! Edge configuration.
//!
//! Same discipline as the engine: a flat, closed option surface with
//! unknown keys rejected at load time.

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

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

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EdgeConfig {
    pub listen_addr: SocketAddr,
    pub engine_rpc_addr: SocketAddr,
    /// Shared counter cache (`redis://…`). Unset means the in-process
    /// fallback, which is only correct for a single replica.
    pub cache_url: Option<String>,

    /// Admitted requests per caller per window.
    pub rate_limit_per_window: u64,
    pub rate_limit_window_seconds: u64,

    pub negotiate_deadline_seconds: u64,
    pub status_deadline_seconds: u64,
    pub ready_deadline_seconds: u64,

    pub max_body_bytes: usize,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().expect("static addr"),
            engine_rpc_addr: "127.0.0.1:7401".parse().expect("static addr"),
            cache_url: None,
            rate_limit_per_window: 100,
            rate_limit_window_seconds: 60,
            negotiate_deadline_seconds: 30,
            status_deadline_seconds: 10,
            ready_deadline_seconds: 2,
            max_body_bytes: 64 * 1024,
        }
    }
}

impl EdgeConfig {
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
        Self::validate(&cfg)?;
        Ok(cfg)
    }

    fn validate(cfg: &Self) -> Result<(), ConfigError> {
        if cfg.rate_limit_per_window == 0 || cfg.rate_limit_window_seconds == 0 {
            return Err(ConfigError::Invalid(
                "rate limit and window must be positive".into(),
            ));
        }
        if cfg.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be positive".into()));
        }
        if cfg.negotiate_deadline_seconds == 0
            || cfg.status_deadline_seconds == 0
            || cfg.ready_deadline_seconds == 0
        {
            return Err(ConfigError::Invalid("deadlines must be positive".into()));
        }
        Ok(())
    }

    pub fn negotiate_deadline(&self) -> Duration {
        Duration::from_secs(self.negotiate_deadline_seconds)
    }

    pub fn status_deadline(&self) -> Duration {
        Duration::from_secs(self.status_deadline_seconds)
    }

    pub fn ready_deadline(&self) -> Duration {
        Duration::from_secs(self.ready_deadline_seconds)
    }
}

//! Chain RPC port and its HTTP adapter.
//!
//! The watcher only ever needs two queries: the recent finalized signatures
//! touching the receiving address, and one transaction in parsed form.
//! Transient transport failures are retried once with jitter; structural
//! node errors surface as [`ChainError::Rpc`].

use super::types::{ConfirmedTransaction, SignatureInfo};
use async_trait::async_trait;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("chain transport: {0}")]
    Transport(String),
    #[error("chain rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("chain reply undecodable: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn recent_signatures(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, ChainError>;

    async fn transaction(
        &self,
        signature: &str,
    ) -> Result<Option<ConfirmedTransaction>, ChainError>;
}

#[derive(Debug, Deserialize)]
struct JsonRpcReply<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC adapter for a real node.
pub struct HttpChainRpc {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpChainRpc {
    pub fn new(url: impl Into<String>) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(4))
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<R>, ChainError> {
        match self.call_once(method, &params).await {
            Err(ChainError::Transport(_)) => {
                // one retry with jitter on transient transport failures
                let jitter = rand::thread_rng().gen_range(50..150);
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                self.call_once(method, &params).await
            }
            other => other,
        }
    }

    async fn call_once<R: DeserializeOwned>(
        &self,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<Option<R>, ChainError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let reply: JsonRpcReply<R> = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| ChainError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        if let Some(err) = reply.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(reply.result)
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn recent_signatures(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, ChainError> {
        let params = serde_json::json!([
            address,
            {"limit": limit, "commitment": "finalized"},
        ]);
        let result = self.call("getSignaturesForAddress", params).await?;
        Ok(result.unwrap_or_default())
    }

    async fn transaction(
        &self,
        signature: &str,
    ) -> Result<Option<ConfirmedTransaction>, ChainError> {
        let params = serde_json::json!([
            signature,
            {
                "encoding": "jsonParsed",
                "commitment": "finalized",
                "maxSupportedTransactionVersion": 0,
            },
        ]);
        self.call("getTransaction", params).await
    }
}

/// Scripted chain double for tests: an appendable ledger of transactions,
/// served newest-first like the real signature query.
#[derive(Default)]
pub struct MockChainRpc {
    ledger: parking_lot::RwLock<Vec<(SignatureInfo, ConfirmedTransaction)>>,
    fail_transport: bool,
}

impl MockChainRpc {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_ledger(ledger: Vec<(SignatureInfo, ConfirmedTransaction)>) -> Self {
        Self {
            ledger: parking_lot::RwLock::new(ledger),
            fail_transport: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            ledger: parking_lot::RwLock::new(Vec::new()),
            fail_transport: true,
        }
    }

    /// Append a finalized transaction to the scripted ledger.
    pub fn push(&self, signature: SignatureInfo, transaction: ConfirmedTransaction) {
        self.ledger.write().push((signature, transaction));
    }

    /// Wipe the ledger; useful for proving a caller no longer re-queries.
    pub fn clear(&self) {
        self.ledger.write().clear();
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn recent_signatures(
        &self,
        _address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, ChainError> {
        if self.fail_transport {
            return Err(ChainError::Transport("connection refused".into()));
        }
        Ok(self
            .ledger
            .read()
            .iter()
            .rev()
            .take(limit)
            .map(|(sig, _)| sig.clone())
            .collect())
    }

    async fn transaction(
        &self,
        signature: &str,
    ) -> Result<Option<ConfirmedTransaction>, ChainError> {
        if self.fail_transport {
            return Err(ChainError::Transport("connection refused".into()));
        }
        Ok(self
            .ledger
            .read()
            .iter()
            .find(|(sig, _)| sig.signature == signature)
            .map(|(_, tx)| tx.clone()))
    }
}

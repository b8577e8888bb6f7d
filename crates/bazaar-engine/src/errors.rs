//! Engine-level error taxonomy.
//!
//! Domain modules carry their own error enums; this is the boundary type the
//! RPC dispatcher converts into a stable [`FaultKind`] before anything leaves
//! the process. Validation failures are recoverable and map to BadRequest;
//! infrastructure failures surface as retryable kinds.

use bazaar_types::FaultKind;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("deal not found")]
    DealNotFound,
    #[error("crypto settlement is disabled")]
    FeatureDisabled,
    #[error("strategy unavailable: {0}")]
    StrategyUnavailable(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            EngineError::BadRequest(_) => FaultKind::BadRequest,
            EngineError::DealNotFound => FaultKind::NotFound,
            EngineError::FeatureDisabled => FaultKind::FeatureDisabled,
            EngineError::StrategyUnavailable(_) => FaultKind::StrategyUnavailable,
            EngineError::StoreUnavailable(_) => FaultKind::StoreUnavailable,
            EngineError::ChainUnavailable(_) => FaultKind::ChainUnavailable,
            EngineError::Internal(_) => FaultKind::Internal,
        }
    }

    /// Message safe to put on the wire. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            EngineError::BadRequest(m) => m.clone(),
            EngineError::DealNotFound => "deal not found".into(),
            EngineError::FeatureDisabled => "crypto settlement is disabled".into(),
            EngineError::StrategyUnavailable(_) => "pricing strategy unavailable".into(),
            EngineError::StoreUnavailable(_) => "deal store unavailable".into(),
            EngineError::ChainUnavailable(_) => "chain rpc unavailable".into(),
            EngineError::Internal(_) => "internal error".into(),
        }
    }
}

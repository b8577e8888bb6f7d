//! Stable fault codes crossing the RPC boundary.
//!
//! The engine converts its domain errors into one of these kinds before they
//! leave the process; the edge maps kinds to HTTP status codes. Validation
//! problems are recovered locally and returned to the caller; infrastructure
//! problems surface as retryable 5xx.

use crate::request_id::RequestId;
use serde::{Deserialize, Serialize};

/// Engine-side failure categories visible to the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// Malformed ids, out-of-range amounts, unknown currency.
    BadRequest,
    /// Unknown deal id.
    NotFound,
    /// Crypto settlement endpoints while the toggle is off.
    FeatureDisabled,
    /// The configured pricing strategy could not be reached.
    StrategyUnavailable,
    /// The deal store refused or failed a read/write.
    StoreUnavailable,
    /// The chain RPC failed structurally (not a mere missing proof).
    ChainUnavailable,
    /// Anything else; the request id in the fault body is the handle for
    /// operators to find the matching log line.
    Internal,
}

impl FaultKind {
    /// Stable reason code, part of the wire contract.
    pub fn reason_code(&self) -> &'static str {
        match self {
            FaultKind::BadRequest => "BAD_REQUEST",
            FaultKind::NotFound => "NOT_FOUND",
            FaultKind::FeatureDisabled => "FEATURE_DISABLED",
            FaultKind::StrategyUnavailable => "STRATEGY_UNAVAILABLE",
            FaultKind::StoreUnavailable => "STORE_UNAVAILABLE",
            FaultKind::ChainUnavailable => "CHAIN_UNAVAILABLE",
            FaultKind::Internal => "INTERNAL",
        }
    }
}

/// A fault reply carried in place of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    pub request_id: RequestId,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            kind,
            message: message.into(),
            request_id,
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.reason_code(), self.message)
    }
}

impl std::error::Error for Fault {}

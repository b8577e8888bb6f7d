//! Payment-facing entities shared across the RPC boundary.
//!
//! These are the *public* projections: everything here may legally reach a
//! caller. The engine's private deal row (with its encrypted reservation
//! secret) lives in `bazaar-engine::deals`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Crypto settlement currencies the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CryptoCurrency {
    #[serde(rename = "SOL")]
    Sol,
    #[serde(rename = "USDC")]
    Usdc,
}

impl CryptoCurrency {
    pub fn as_str(&self) -> &'static str {
        match self {
            CryptoCurrency::Sol => "SOL",
            CryptoCurrency::Usdc => "USDC",
        }
    }
}

impl fmt::Display for CryptoCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CryptoCurrency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SOL" => Ok(CryptoCurrency::Sol),
            "USDC" => Ok(CryptoCurrency::Usdc),
            other => Err(format!("unknown crypto currency `{other}`")),
        }
    }
}

/// What a caller must do to unlock a payment-locked deal.
///
/// This is the read-only projection of a PENDING deal the edge is allowed to
/// see: id, wallet, amount, memo, network, and expiry. No secret material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInstructions {
    pub deal_id: Uuid,
    pub wallet_address: String,
    pub crypto_amount: f64,
    pub currency: CryptoCurrency,
    /// Short unique token the transfer must carry in its memo instruction.
    pub memo: String,
    pub network: String,
    /// Unix seconds after which the lock expires.
    pub expires_at: u64,
}

/// Evidence of the settling on-chain transfer, recorded once at the
/// PENDING→PAID transition and replayed verbatim on later status polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProof {
    pub tx_hash: String,
    pub slot: u64,
    /// Principal payer of the transfer, best-effort for native transfers.
    pub sender: String,
    /// Unix seconds of the confirmed block.
    pub confirmed_at: u64,
}

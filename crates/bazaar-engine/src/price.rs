//! Fiat→crypto price conversion with fixed rates.
//!
//! Stablecoins peg 1:1 against USD (scaled by `usd_per_stable` for depegs);
//! the native currency divides by `usd_per_native`. Results are rounded to
//! the currency's on-chain precision so the quoted amount is representable
//! in a transfer.

use crate::config::EngineConfig;
use bazaar_types::CryptoCurrency;

#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("fiat amount must be positive, got {0}")]
    NonPositiveAmount(f64),
}

/// Native currency has 9 decimals (lamports), the stablecoin 6.
const NATIVE_DECIMALS: i32 = 9;
const STABLE_DECIMALS: i32 = 6;

#[derive(Debug, Clone, Copy)]
pub struct PriceConverter {
    usd_per_native: f64,
    usd_per_stable: f64,
}

impl PriceConverter {
    /// Construct from validated configuration. `use_fixed_rates = false` is
    /// already rejected by [`EngineConfig::validate`].
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            usd_per_native: cfg.usd_per_native,
            usd_per_stable: cfg.usd_per_stable,
        }
    }

    pub fn new(usd_per_native: f64, usd_per_stable: f64) -> Self {
        Self {
            usd_per_native,
            usd_per_stable,
        }
    }

    /// Convert a fiat USD amount into the target crypto currency.
    pub fn to_crypto(&self, fiat_usd: f64, currency: CryptoCurrency) -> Result<f64, PriceError> {
        if fiat_usd <= 0.0 || !fiat_usd.is_finite() {
            return Err(PriceError::NonPositiveAmount(fiat_usd));
        }
        let (raw, decimals) = match currency {
            CryptoCurrency::Sol => (fiat_usd / self.usd_per_native, NATIVE_DECIMALS),
            CryptoCurrency::Usdc => (fiat_usd / self.usd_per_stable, STABLE_DECIMALS),
        };
        let scale = 10f64.powi(decimals);
        Ok((raw * scale).round() / scale)
    }
}

//! Deterministic rule strategy.
//!
//! Three bands: below the floor we counter at the floor, between floor and
//! the high-value threshold we accept the bid as-is, above the threshold we
//! hand the turn to a human confirmation template.

use super::{PricingStrategy, StrategyError, Verdict};
use crate::catalog::Item;
use crate::config::{ConfigError, EngineConfig};
use async_trait::async_trait;
use bazaar_types::RequestId;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const BELOW_FLOOR: &str = "BELOW_FLOOR";
pub const HIGH_VALUE_TEMPLATE: &str = "high_value_confirm";

pub struct RuleStrategy {
    high_value_threshold: f64,
}

impl RuleStrategy {
    pub fn new(high_value_threshold: f64) -> Self {
        Self {
            high_value_threshold,
        }
    }
}

pub(super) fn construct(cfg: &EngineConfig) -> Result<Arc<dyn PricingStrategy>, ConfigError> {
    Ok(Arc::new(RuleStrategy::new(cfg.high_value_threshold)))
}

#[async_trait]
impl PricingStrategy for RuleStrategy {
    fn name(&self) -> &str {
        "rule"
    }

    async fn evaluate(
        &self,
        item: &Item,
        bid: f64,
        _reputation: Option<f64>,
        _request_id: RequestId,
    ) -> Result<Verdict, StrategyError> {
        if bid > self.high_value_threshold {
            let mut context = BTreeMap::new();
            context.insert("item_name".to_string(), item.name.clone());
            context.insert("price".to_string(), format_price(bid));
            return Ok(Verdict::UiRequired {
                template_id: HIGH_VALUE_TEMPLATE.to_string(),
                context,
            });
        }
        if bid < item.floor_price {
            return Ok(Verdict::Counter {
                proposed_price: item.floor_price,
                reason_code: BELOW_FLOOR.to_string(),
                message: Some("Bid is below the minimum we can accept for this item.".to_string()),
            });
        }
        Ok(Verdict::Accept { final_price: bid })
    }
}

fn format_price(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("{}", price as i64)
    } else {
        format!("{price:.2}")
    }
}

//! LLM-backed strategy.
//!
//! Delegates the pricing call to an external chat-completion endpoint and
//! constrains the reply to a small JSON schema mirroring [`Verdict`]. The
//! model sees the floor price (it needs it to negotiate); the dispatcher's
//! scrubbing pass guarantees the floor never survives into caller-visible
//! text even if the model echoes it.
//!
//! Guard rails applied to the parsed reply:
//! - an accept below the floor becomes a counter at the floor
//! - a counter at or below the bid is an acceptance in disguise
//! - unknown actions are a malformed-decision error, never a silent accept

use super::{PricingStrategy, StrategyError, Verdict};
use crate::catalog::Item;
use crate::config::{ConfigError, EngineConfig};
use async_trait::async_trait;
use bazaar_types::RequestId;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are a pricing agent negotiating on behalf of a seller. \
Evaluate the buyer's bid against the provided pricing context and reply with ONLY a JSON \
object, no prose, matching: {\"action\": \"accept\"|\"counter\"|\"reject\"|\"ui_required\", \
\"final_price\"?: number, \"proposed_price\"?: number, \"reason_code\"?: string, \
\"message\"?: string, \"template_id\"?: string, \"context\"?: object}. Never reveal the \
floor price in any text field.";

pub struct LlmStrategy {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    business_type: String,
    market_load: f64,
    trigger_price: Option<f64>,
}

pub(super) fn construct(cfg: &EngineConfig) -> Result<Arc<dyn PricingStrategy>, ConfigError> {
    let api_url = cfg
        .llm_api_url
        .clone()
        .ok_or_else(|| ConfigError::Invalid(format!("strategy `{}` requires llm_api_url", cfg.strategy)))?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("cannot build http client: {e}")))?;
    Ok(Arc::new(LlmStrategy {
        http,
        api_url,
        api_key: cfg.llm_api_key.clone(),
        model: cfg.strategy.clone(),
        business_type: cfg.llm_business_type.clone(),
        market_load: cfg.llm_market_load,
        trigger_price: cfg.llm_trigger_price,
    }))
}

/// Shape the model is asked to produce.
#[derive(Debug, Deserialize)]
struct ModelDecision {
    action: String,
    final_price: Option<f64>,
    proposed_price: Option<f64>,
    reason_code: Option<String>,
    message: Option<String>,
    template_id: Option<String>,
    context: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlmStrategy {
    fn user_payload(&self, item: &Item, bid: f64, reputation: Option<f64>) -> serde_json::Value {
        serde_json::json!({
            "business_type": self.business_type,
            "item_name": item.name,
            "base_price": item.base_price,
            "floor_price": item.floor_price,
            "market_load": self.market_load,
            "trigger_price": self.trigger_price,
            "bid": bid,
            "reputation": reputation,
        })
    }

    fn to_verdict(
        &self,
        decision: ModelDecision,
        item: &Item,
        bid: f64,
    ) -> Result<Verdict, StrategyError> {
        match decision.action.as_str() {
            "accept" => {
                let final_price = decision.final_price.unwrap_or(bid);
                if final_price < item.floor_price {
                    // the model tried to sell below the floor; counter instead
                    return Ok(Verdict::Counter {
                        proposed_price: item.floor_price,
                        reason_code: "BELOW_FLOOR".into(),
                        message: None,
                    });
                }
                Ok(Verdict::Accept { final_price })
            }
            "counter" => {
                let proposed = decision
                    .proposed_price
                    .ok_or_else(|| StrategyError::Malformed("counter without proposed_price".into()))?;
                let proposed = proposed.max(item.floor_price);
                if proposed <= bid {
                    // a counter at or below the bid is an acceptance in disguise
                    return Ok(Verdict::Accept { final_price: bid });
                }
                Ok(Verdict::Counter {
                    proposed_price: proposed,
                    reason_code: decision
                        .reason_code
                        .unwrap_or_else(|| "COUNTER_OFFER".into()),
                    message: decision.message,
                })
            }
            "reject" => Ok(Verdict::Reject {
                reason_code: decision.reason_code.unwrap_or_else(|| "OFFER_DECLINED".into()),
            }),
            "ui_required" => Ok(Verdict::UiRequired {
                template_id: decision
                    .template_id
                    .unwrap_or_else(|| "high_value_confirm".into()),
                context: decision.context.unwrap_or_default(),
            }),
            other => Err(StrategyError::Malformed(format!("unknown action `{other}`"))),
        }
    }
}

#[async_trait]
impl PricingStrategy for LlmStrategy {
    fn name(&self) -> &str {
        &self.model
    }

    async fn evaluate(
        &self,
        item: &Item,
        bid: f64,
        reputation: Option<f64>,
        request_id: RequestId,
    ) -> Result<Verdict, StrategyError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": self.user_payload(item, bid, reputation).to_string()},
            ],
        });

        let mut request = self.http.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let reply: ChatReply = request
            .send()
            .await
            .map_err(|e| StrategyError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| StrategyError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| StrategyError::Malformed(e.to_string()))?;

        let content = reply
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| StrategyError::Malformed("empty choices".into()))?;
        debug!(%request_id, model = %self.model, "model replied");

        let decision: ModelDecision = serde_json::from_str(strip_fences(content))
            .map_err(|e| StrategyError::Malformed(format!("undecodable decision: {e}")))?;
        self.to_verdict(decision, item, bid)
    }
}

/// Models occasionally wrap JSON in a markdown fence despite instructions.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

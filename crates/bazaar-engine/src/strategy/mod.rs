//! Pricing strategies.
//!
//! A strategy maps `(item, bid, reputation)` to a verdict and nothing else:
//! it cannot touch the deal store or the chain, and its only state is its own
//! model configuration. One strategy is selected at start-up from the
//! `strategy` config key via a constructor table; adding a variant means
//! adding a row to [`CONSTRUCTORS`], not a subclass.
//!
//! The dispatcher defensively scrubs the hidden floor price from every
//! caller-visible text field a strategy produces, so a misbehaving model
//! cannot leak it through a message or context value.

pub mod llm;
pub mod rule;

use crate::catalog::Item;
use crate::config::{ConfigError, EngineConfig};
use async_trait::async_trait;
use bazaar_types::RequestId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Strategy-level outcome of one negotiation turn.
///
/// The settlement artifact (reservation code or payment lock) is attached by
/// the negotiation handler, not here; strategies only price.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept {
        final_price: f64,
    },
    Counter {
        proposed_price: f64,
        reason_code: String,
        message: Option<String>,
    },
    Reject {
        reason_code: String,
    },
    UiRequired {
        template_id: String,
        context: BTreeMap<String, String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("strategy backend unreachable: {0}")]
    Unavailable(String),
    #[error("strategy returned an unusable decision: {0}")]
    Malformed(String),
}

/// The single-operation strategy interface.
#[async_trait]
pub trait PricingStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        item: &Item,
        bid: f64,
        reputation: Option<f64>,
        request_id: RequestId,
    ) -> Result<Verdict, StrategyError>;
}

type Constructor = fn(&EngineConfig) -> Result<Arc<dyn PricingStrategy>, ConfigError>;

/// Factory table. The first matching tag wins; an unmatched tag is treated
/// as a model tag for the LLM strategy.
const CONSTRUCTORS: &[(&str, Constructor)] = &[("rule", rule::construct)];

/// Build the process-wide strategy from configuration.
pub fn build_strategy(cfg: &EngineConfig) -> Result<Arc<dyn PricingStrategy>, ConfigError> {
    for (tag, construct) in CONSTRUCTORS {
        if cfg.strategy == *tag {
            return construct(cfg);
        }
    }
    llm::construct(cfg)
}

/// Strip floor-price occurrences from every caller-visible text field.
///
/// Numeric price fields are left alone: a rule counter legitimately proposes
/// the floor. What must never appear is the floor written into free text.
pub fn scrub_floor_references(verdict: &mut Verdict, floor_price: f64) {
    match verdict {
        Verdict::Counter {
            reason_code,
            message,
            ..
        } => {
            *reason_code = scrub_text(reason_code, floor_price);
            if let Some(m) = message {
                *m = scrub_text(m, floor_price);
            }
        }
        Verdict::Reject { reason_code } => {
            *reason_code = scrub_text(reason_code, floor_price);
        }
        Verdict::UiRequired { context, .. } => {
            context.retain(|key, _| !key.to_ascii_lowercase().contains("floor"));
            for value in context.values_mut() {
                *value = scrub_text(value, floor_price);
            }
        }
        Verdict::Accept { .. } => {}
    }
}

/// Textual renderings of the floor a model is likely to echo.
fn floor_forms(floor_price: f64) -> Vec<String> {
    let mut forms = vec![format!("{floor_price}"), format!("{floor_price:.2}")];
    if floor_price.fract() == 0.0 {
        forms.push(format!("{}", floor_price as i64));
    }
    forms.sort_by_key(|s| std::cmp::Reverse(s.len()));
    forms.dedup();
    forms
}

/// Replace digit-bounded occurrences of any floor form with a placeholder.
fn scrub_text(text: &str, floor_price: f64) -> String {
    let mut out = text.to_string();
    for form in floor_forms(floor_price) {
        let mut scrubbed = String::with_capacity(out.len());
        let mut rest = out.as_str();
        while let Some(pos) = rest.find(form.as_str()) {
            let prev = rest[..pos]
                .chars()
                .next_back()
                .or_else(|| scrubbed.chars().next_back());
            let before_ok = !prev.map(|c| c.is_ascii_digit()).unwrap_or(false);
            let after = &rest[pos + form.len()..];
            let after_ok = !after
                .chars()
                .next()
                .map(|c| c.is_ascii_digit() || c == '.')
                .unwrap_or(false);
            scrubbed.push_str(&rest[..pos]);
            if before_ok && after_ok {
                scrubbed.push_str("[price withheld]");
            } else {
                scrubbed.push_str(&form);
            }
            rest = after;
        }
        scrubbed.push_str(rest);
        out = scrubbed;
    }
    out
}

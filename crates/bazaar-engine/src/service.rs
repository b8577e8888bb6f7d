//! Negotiation and status handlers plus the RPC dispatcher.
//!
//! One service instance owns the catalog port, the selected pricing
//! strategy, and (when crypto settlement is enabled) the deal repository and
//! chain watcher. Handlers are pure orchestration: validation, one strategy
//! call, one repository call, and the structured events the operators grep
//! for.

use crate::catalog::ItemCatalog;
use crate::chain::ChainWatcher;
use crate::clock::unix_now;
use crate::deals::{CheckOutcome, DealError, DealRepository};
use crate::errors::EngineError;
use crate::secrets::{reservation_code, session_token};
use crate::strategy::{scrub_floor_references, PricingStrategy, StrategyError, Verdict};
use bazaar_types::{
    DealStatusReply, Decision, Envelope, Fault, NegotiateReply, NegotiateRequest, RequestId,
    Reveal, RpcRequest, RpcResponse,
};
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Fiat currencies a bid may be denominated in.
const ACCEPTED_FIAT: &[&str] = &["USD"];

/// How long a countered/rejected/ui_required session stays actionable.
const SESSION_VALIDITY_SECS: u64 = 300;

const ITEM_NOT_FOUND: &str = "ITEM_NOT_FOUND";

/// Crypto-settlement dependencies, present only when the toggle is on.
pub struct SettlementStack {
    pub repository: DealRepository,
    pub watcher: ChainWatcher,
}

pub struct NegotiationService {
    catalog: Arc<dyn ItemCatalog>,
    strategy: Arc<dyn PricingStrategy>,
    settlement: Option<SettlementStack>,
    deal_ttl_seconds: u64,
}

impl NegotiationService {
    pub fn new(
        catalog: Arc<dyn ItemCatalog>,
        strategy: Arc<dyn PricingStrategy>,
        settlement: Option<SettlementStack>,
        deal_ttl_seconds: u64,
    ) -> Self {
        Self {
            catalog,
            strategy,
            settlement,
            deal_ttl_seconds,
        }
    }

    pub fn crypto_enabled(&self) -> bool {
        self.settlement.is_some()
    }

    /// Entry point for the RPC server: dispatch one envelope and never leak
    /// an internal error message onto the wire.
    pub async fn dispatch(&self, envelope: Envelope<RpcRequest>) -> Envelope<RpcResponse> {
        let request_id = envelope.request_id;
        let span = info_span!("engine_request", request_id = %request_id);
        async move {
            let response = match envelope.body {
                RpcRequest::Negotiate(request) => self
                    .negotiate(request, request_id)
                    .await
                    .map(RpcResponse::Negotiate),
                RpcRequest::CheckDealStatus { deal_id } => self
                    .deal_status(deal_id, request_id)
                    .await
                    .map(RpcResponse::DealStatus),
                RpcRequest::Ping => Ok(RpcResponse::Pong),
            };
            let body = response.unwrap_or_else(|e| {
                error!(error = %e, "request failed");
                RpcResponse::Fault(Fault::new(e.fault_kind(), e.public_message(), request_id))
            });
            Envelope::new(request_id, body)
        }
        .instrument(span)
        .await
    }

    pub async fn negotiate(
        &self,
        request: NegotiateRequest,
        request_id: RequestId,
    ) -> Result<NegotiateReply, EngineError> {
        if !request.bid_amount.is_finite() || request.bid_amount <= 0.0 {
            return Err(EngineError::BadRequest("bid_amount must be positive".into()));
        }
        if !ACCEPTED_FIAT.contains(&request.currency_code.as_str()) {
            return Err(EngineError::BadRequest(format!(
                "currency `{}` is not accepted",
                request.currency_code
            )));
        }

        info!(
            event = "negotiation_started",
            request_id = %request_id,
            caller = %request.caller,
            item_id = %request.item_id,
            bid = request.bid_amount,
        );

        let item = self
            .catalog
            .item(&request.item_id)
            .await
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
        let now = unix_now();
        let Some(item) = item.filter(|i| i.is_sellable()) else {
            // A missing item is a pricing decision, not a transport error.
            return Ok(NegotiateReply {
                session_token: session_token(),
                valid_until: now + SESSION_VALIDITY_SECS,
                decision: Decision::Rejected {
                    reason_code: ITEM_NOT_FOUND.into(),
                },
                payment_instructions: None,
            });
        };

        let mut verdict = self
            .strategy
            .evaluate(&item, request.bid_amount, request.reputation, request_id)
            .await
            .map_err(|e| match e {
                StrategyError::Unavailable(m) => EngineError::StrategyUnavailable(m),
                StrategyError::Malformed(m) => EngineError::StrategyUnavailable(m),
            })?;
        scrub_floor_references(&mut verdict, item.floor_price);

        let reply = match verdict {
            Verdict::Accept { final_price } => {
                debug_assert!(final_price >= item.floor_price);
                match &self.settlement {
                    Some(stack) => {
                        let (deal, instructions) = stack
                            .repository
                            .lock(&item.id, &item.name, final_price)
                            .map_err(map_deal_error)?;
                        info!(
                            event = "offer_locked_for_payment",
                            request_id = %request_id,
                            caller = %request.caller,
                            deal_id = %deal.id,
                            final_price,
                        );
                        NegotiateReply {
                            session_token: session_token(),
                            valid_until: deal.expires_at,
                            decision: Decision::Accepted {
                                final_price,
                                reveal: Reveal::PaymentLock { deal_id: deal.id },
                            },
                            payment_instructions: Some(instructions),
                        }
                    }
                    None => {
                        let code = reservation_code();
                        info!(
                            event = "offer_accepted",
                            request_id = %request_id,
                            caller = %request.caller,
                            item_id = %item.id,
                            final_price,
                        );
                        NegotiateReply {
                            session_token: session_token(),
                            valid_until: now + self.deal_ttl_seconds,
                            decision: Decision::Accepted {
                                final_price,
                                reveal: Reveal::ReservationCode { code },
                            },
                            payment_instructions: None,
                        }
                    }
                }
            }
            Verdict::Counter {
                proposed_price,
                reason_code,
                message,
            } => NegotiateReply {
                session_token: session_token(),
                valid_until: now + SESSION_VALIDITY_SECS,
                decision: Decision::Countered {
                    proposed_price,
                    reason_code,
                    message,
                },
                payment_instructions: None,
            },
            Verdict::Reject { reason_code } => NegotiateReply {
                session_token: session_token(),
                valid_until: now + SESSION_VALIDITY_SECS,
                decision: Decision::Rejected { reason_code },
                payment_instructions: None,
            },
            Verdict::UiRequired {
                template_id,
                context,
            } => NegotiateReply {
                session_token: session_token(),
                valid_until: now + SESSION_VALIDITY_SECS,
                decision: Decision::UiRequired {
                    template_id,
                    context,
                },
                payment_instructions: None,
            },
        };
        Ok(reply)
    }

    pub async fn deal_status(
        &self,
        deal_id: Uuid,
        request_id: RequestId,
    ) -> Result<DealStatusReply, EngineError> {
        let Some(stack) = &self.settlement else {
            return Err(EngineError::FeatureDisabled);
        };
        let outcome = stack
            .repository
            .check(deal_id, &stack.watcher, request_id)
            .await
            .map_err(map_deal_error)?;
        Ok(match outcome {
            CheckOutcome::Paid {
                reservation_code,
                proof,
            } => DealStatusReply::Paid {
                reservation_code,
                proof,
            },
            CheckOutcome::Pending { instructions } => DealStatusReply::Pending {
                payment_instructions: instructions,
            },
            CheckOutcome::Expired => DealStatusReply::Expired,
        })
    }
}

fn map_deal_error(e: DealError) -> EngineError {
    match e {
        DealError::NotFound => EngineError::DealNotFound,
        DealError::Store(inner) => EngineError::StoreUnavailable(inner.to_string()),
        other => EngineError::Internal(other.to_string()),
    }
}

//! HTTP surface and the HTTP↔RPC translation.
//!
//! Mutating routes live under `/v1` behind the authenticator and the rate
//! limiter; the health probes are open. Handlers read the parsed body from
//! the request extensions (the authenticator hashed exactly that structure)
//! and never touch the raw bytes.

use crate::engine_client::EngineClient;
use crate::error::{client_error_response, error_response, fault_response};
use crate::limiter::WindowLimiter;
use crate::middleware::auth::ParsedBody;
use crate::middleware::{propagate_request_id, AuthLayer, RateLimitLayer};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use bazaar_types::{
    AgentDid, DealStatusReply, Decision, NegotiateReply, NegotiateRequest, RequestId, Reveal,
    RpcRequest, RpcResponse, VerifiedCaller,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineClient,
    pub negotiate_deadline: Duration,
    pub status_deadline: Duration,
    pub ready_deadline: Duration,
}

/// Assemble the full router with its middleware stack.
pub fn build_router(
    state: AppState,
    limiter: Arc<WindowLimiter>,
    max_body_bytes: usize,
) -> Router {
    let protected = Router::new()
        .route("/v1/negotiate", post(negotiate))
        .route("/v1/deals/:deal_id/status", post(deal_status))
        // last layer added runs first: auth must precede the limiter
        .layer(RateLimitLayer::new(limiter))
        .layer(AuthLayer::new(max_body_bytes));

    let health = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz));

    Router::new()
        .merge(protected)
        .merge(health)
        .layer(axum::middleware::from_fn(propagate_request_id))
        // browser front-ends talk to the edge directly; auth lives in the
        // signature headers, not in cookies, so a permissive policy is safe
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Body schema for `POST /v1/negotiate`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NegotiateBody {
    item_id: String,
    bid_amount: f64,
    currency_code: String,
    agent_did: AgentDid,
}

async fn negotiate(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Extension(caller): Extension<VerifiedCaller>,
    Extension(body): Extension<ParsedBody>,
) -> Response {
    let Some(value) = body.0.as_ref() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            "a JSON body is required",
            request_id,
        );
    };
    let parsed: NegotiateBody = match serde_json::from_value(value.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                &format!("invalid negotiation body: {e}"),
                request_id,
            )
        }
    };
    if parsed.agent_did != caller.did {
        return error_response(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            "agent_did does not match the signing identity",
            request_id,
        );
    }
    if !parsed.bid_amount.is_finite() || parsed.bid_amount <= 0.0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            "bid_amount must be positive",
            request_id,
        );
    }

    let request = RpcRequest::Negotiate(NegotiateRequest {
        caller: caller.did,
        reputation: caller.reputation,
        item_id: parsed.item_id,
        bid_amount: parsed.bid_amount,
        currency_code: parsed.currency_code,
    });
    match state
        .engine
        .call(request, request_id, state.negotiate_deadline)
        .await
    {
        Ok(RpcResponse::Negotiate(reply)) => negotiate_response(reply, request_id),
        Ok(RpcResponse::Fault(fault)) => fault_response(&fault, request_id),
        Ok(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL",
            "unexpected engine reply",
            request_id,
        ),
        Err(e) => client_error_response(&e, request_id),
    }
}

/// Shape the wire decision into the public response contract.
fn negotiate_response(reply: NegotiateReply, request_id: RequestId) -> Response {
    let mut body = serde_json::json!({
        "session_token": reply.session_token,
        "status": reply.decision.status_label(),
        "valid_until": reply.valid_until,
        "payment_required": false,
        "request_id": request_id.to_string(),
    });
    match reply.decision {
        Decision::Accepted {
            final_price,
            reveal,
        } => {
            let mut data = serde_json::json!({ "final_price": final_price });
            match reveal {
                Reveal::ReservationCode { code } => {
                    data["reservation_code"] = code.into();
                }
                Reveal::PaymentLock { deal_id } => {
                    body["payment_required"] = true.into();
                    data["deal_id"] = deal_id.to_string().into();
                    if let Some(instructions) = &reply.payment_instructions {
                        data["payment_instructions"] =
                            serde_json::to_value(instructions).unwrap_or_default();
                    }
                }
            }
            body["data"] = data;
        }
        Decision::Countered {
            proposed_price,
            reason_code,
            message,
        } => {
            body["data"] = serde_json::json!({
                "proposed_price": proposed_price,
                "reason_code": reason_code,
                "message": message,
            });
        }
        Decision::Rejected { reason_code } => {
            body["data"] = serde_json::json!({ "reason_code": reason_code });
        }
        Decision::UiRequired {
            template_id,
            context,
        } => {
            body["action_required"] = serde_json::json!({
                "template_id": template_id,
                "context": context,
            });
        }
    }
    (StatusCode::OK, Json(body)).into_response()
}

async fn deal_status(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(deal_id): Path<String>,
) -> Response {
    let Ok(deal_id) = Uuid::parse_str(&deal_id) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            "deal id is not a valid UUID",
            request_id,
        );
    };

    match state
        .engine
        .call(
            RpcRequest::CheckDealStatus { deal_id },
            request_id,
            state.status_deadline,
        )
        .await
    {
        Ok(RpcResponse::DealStatus(reply)) => status_response(reply, request_id),
        Ok(RpcResponse::Fault(fault)) => fault_response(&fault, request_id),
        Ok(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL",
            "unexpected engine reply",
            request_id,
        ),
        Err(e) => client_error_response(&e, request_id),
    }
}

fn status_response(reply: DealStatusReply, request_id: RequestId) -> Response {
    let body = match reply {
        DealStatusReply::Paid {
            reservation_code,
            proof,
        } => serde_json::json!({
            "status": "PAID",
            "secret": { "reservation_code": reservation_code },
            "proof": proof,
            "request_id": request_id.to_string(),
        }),
        DealStatusReply::Pending {
            payment_instructions,
        } => serde_json::json!({
            "status": "PENDING",
            "payment_instructions": payment_instructions,
            "request_id": request_id.to_string(),
        }),
        DealStatusReply::Expired => serde_json::json!({
            "status": "EXPIRED",
            "request_id": request_id.to_string(),
        }),
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Readiness: the edge is ready exactly when the engine answers a ping
/// within the probe deadline.
async fn readyz(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Response {
    match state
        .engine
        .call(RpcRequest::Ping, request_id, state.ready_deadline)
        .await
    {
        Ok(RpcResponse::Pong) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "dependencies": { "engine": "ok" },
            })),
        )
            .into_response(),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "degraded",
                "dependencies": { "engine": "unreachable" },
            })),
        )
            .into_response(),
    }
}

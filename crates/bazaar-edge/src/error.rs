//! HTTP error rendering.
//!
//! Every error body has the same shape: a stable reason code, a message
//! safe to show a caller, and the request id so support can find the log
//! line. Engine faults arrive pre-classified; this module only picks status
//! codes.

use crate::engine_client::ClientError;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bazaar_types::{Fault, FaultKind, RequestId};

/// Uniform JSON error response.
pub fn error_response(
    status: StatusCode,
    code: &str,
    message: &str,
    request_id: RequestId,
) -> Response {
    let body = serde_json::json!({
        "error": { "code": code, "message": message },
        "request_id": request_id.to_string(),
    });
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Map an engine fault onto its HTTP status.
pub fn fault_response(fault: &Fault, request_id: RequestId) -> Response {
    let status = match fault.kind {
        FaultKind::BadRequest => StatusCode::BAD_REQUEST,
        FaultKind::NotFound => StatusCode::NOT_FOUND,
        FaultKind::FeatureDisabled => StatusCode::NOT_IMPLEMENTED,
        FaultKind::StrategyUnavailable | FaultKind::ChainUnavailable => StatusCode::BAD_GATEWAY,
        FaultKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        FaultKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, fault.kind.reason_code(), &fault.message, request_id)
}

/// Failures reaching the engine are retryable 503s from the client's side.
pub fn client_error_response(error: &ClientError, request_id: RequestId) -> Response {
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        "ENGINE_UNAVAILABLE",
        &error.to_string(),
        request_id,
    )
}

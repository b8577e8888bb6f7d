//! Request-id minting and propagation.
//!
//! A caller-supplied `x-request-id` is adopted when it parses as a UUID;
//! anything else gets a fresh v7 id. The id rides the request extensions
//! into handlers and middleware, and is echoed on the response.

use crate::auth::HEADER_REQUEST_ID;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use bazaar_types::RequestId;

pub async fn propagate_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| RequestId::parse(value).ok())
        .unwrap_or_default();
    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(HEADER_REQUEST_ID, value);
    }
    response
}

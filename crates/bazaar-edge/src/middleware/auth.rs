//! Authentication middleware.
//!
//! Buffers the body once, canonicalizes and hashes it, verifies the three
//! signature headers, and hands the handler both the verified caller and the
//! already-parsed JSON value. Handlers must consume that value — re-parsing
//! the raw body is forbidden so they always see exactly the structure that
//! was hashed.

use crate::auth::{self, AuthError, HEADER_DID, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use crate::canonical;
use crate::error::error_response;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use bazaar_types::RequestId;
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::{Layer, Service};
use tracing::debug;

/// The parsed request body, as hashed during verification.
#[derive(Clone)]
pub struct ParsedBody(pub Arc<Option<Value>>);

#[derive(Clone)]
pub struct AuthLayer {
    max_body_bytes: usize,
}

impl AuthLayer {
    pub fn new(max_body_bytes: usize) -> Self {
        Self { max_body_bytes }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    max_body_bytes: usize,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let max_body_bytes = self.max_body_bytes;

        Box::pin(async move {
            let request_id = req
                .extensions()
                .get::<RequestId>()
                .copied()
                .unwrap_or_default();

            let (mut parts, body) = req.into_parts();
            let bytes = match axum::body::to_bytes(body, max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    return Ok(error_response(
                        axum::http::StatusCode::PAYLOAD_TOO_LARGE,
                        "BODY_TOO_LARGE",
                        "request body exceeds the size limit",
                        request_id,
                    ))
                }
            };

            let verified = verify_parts(&parts, &bytes);
            let (caller, parsed) = match verified {
                Ok(result) => result,
                Err(e) => {
                    debug!(
                        request_id = %request_id,
                        reason = e.reason_code(),
                        "request rejected at the authenticator"
                    );
                    return Ok(error_response(
                        e.status(),
                        e.reason_code(),
                        &e.to_string(),
                        request_id,
                    ));
                }
            };

            parts.extensions.insert(caller);
            parts.extensions.insert(ParsedBody(Arc::new(parsed)));
            let req = Request::from_parts(parts, Body::from(bytes));
            inner.call(req).await
        })
    }
}

fn verify_parts(
    parts: &axum::http::request::Parts,
    body: &[u8],
) -> Result<(bazaar_types::VerifiedCaller, Option<Value>), AuthError> {
    let header = |name: &'static str| -> Result<&str, AuthError> {
        parts
            .headers
            .get(name)
            .ok_or(AuthError::MissingHeader(name))?
            .to_str()
            .map_err(|_| AuthError::MissingHeader(name))
    };
    let did = header(HEADER_DID)?;
    let timestamp = header(HEADER_TIMESTAMP)?;
    let signature = header(HEADER_SIGNATURE)?;

    let (parsed, body_hash) =
        canonical::body_digest(body).map_err(|e| AuthError::MalformedBody(e.to_string()))?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let caller = auth::verify_request(
        parts.method.as_str(),
        parts.uri.path(),
        did,
        timestamp,
        signature,
        &body_hash,
        now,
    )?;
    Ok((caller, parsed))
}

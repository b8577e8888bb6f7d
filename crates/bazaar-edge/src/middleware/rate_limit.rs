//! Rate-limit middleware, keyed on the verified caller DID.
//!
//! Runs strictly after authentication: an unsigned request never reaches
//! the counter, and a signed one is charged against its caller's minute
//! window. Over-budget requests get a 429 with `Retry-After` set to the
//! remainder of the window.

use crate::error::error_response;
use crate::limiter::{Gate, WindowLimiter};
use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::Response;
use bazaar_types::{RequestId, VerifiedCaller};
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::warn;

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<WindowLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<WindowLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<WindowLimiter>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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
        let limiter = Arc::clone(&self.limiter);

        Box::pin(async move {
            let request_id = req
                .extensions()
                .get::<RequestId>()
                .copied()
                .unwrap_or_default();
            let Some(caller) = req.extensions().get::<VerifiedCaller>() else {
                // auth did not run on this route; nothing to meter
                return inner.call(req).await;
            };
            let key = caller.did.to_string();

            match limiter.check(&key).await {
                Gate::Allowed => inner.call(req).await,
                Gate::Limited { retry_after_secs } => {
                    warn!(
                        request_id = %request_id,
                        caller = %key,
                        retry_after_secs,
                        "rate limit exceeded"
                    );
                    let mut response = error_response(
                        StatusCode::TOO_MANY_REQUESTS,
                        "RATE_LIMITED",
                        "request budget exhausted for this window",
                        request_id,
                    );
                    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                        response.headers_mut().insert("Retry-After", value);
                    }
                    Ok(response)
                }
            }
        })
    }
}

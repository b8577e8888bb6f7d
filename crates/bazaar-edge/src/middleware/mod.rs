//! Tower middleware for the edge: request-id propagation, signature
//! authentication, and per-caller rate limiting.
//!
//! Stacking order matters: request-id runs outermost so even auth failures
//! carry an id, auth runs next so the limiter can key on a verified caller,
//! and the limiter sits directly in front of the handlers.

pub mod auth;
pub mod rate_limit;
pub mod request_id;

pub use auth::AuthLayer;
pub use rate_limit::RateLimitLayer;
pub use request_id::propagate_request_id;

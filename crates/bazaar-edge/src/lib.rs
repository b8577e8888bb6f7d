//! # Bazaar Edge
//!
//! The public tier. Every mutating request is authenticated with an Ed25519
//! signature over a canonical message, rate-limited per caller DID, stamped
//! with a request id, and translated into a framed RPC against the engine.
//! The edge holds no durable state; the only thing it remembers is a minute
//! of rate-limit counters, and those live in the shared cache.

pub mod auth;
pub mod canonical;
pub mod config;
pub mod engine_client;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod routes;

pub use config::EdgeConfig;
pub use engine_client::EngineClient;

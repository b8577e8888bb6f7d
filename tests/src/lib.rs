//! # Bazaar Test Suite
//!
//! Unified test crate for cross-tier behavior:
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── flows.rs      # engine-level scenarios: accept/counter/ui, lock,
//!     │                 # settlement races, expiry, memo uniqueness
//!     └── e2e_http.rs   # signed HTTP against a real edge + engine pair
//! ```
//!
//! Run with `cargo test -p bazaar-tests`.

#![allow(dead_code)]

pub mod integration;

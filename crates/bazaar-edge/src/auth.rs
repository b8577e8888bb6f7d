//! Request signature verification.
//!
//! The canonical message is `METHOD ∥ PATH ∥ TIMESTAMP ∥ BODY_HASH` with no
//! separators; METHOD is uppercased defensively, TIMESTAMP is the header
//! string as sent, and BODY_HASH comes from [`crate::canonical`]. The caller
//! id doubles as the verifying key, so there is no key registry to consult.
//!
//! Checks run cheapest-first: header presence, id shape, timestamp window,
//! then the signature itself. A replayed request trips the window check and
//! reports `AUTH_EXPIRED` even though its signature is still valid.

use axum::http::StatusCode;
use bazaar_types::{AgentDid, VerifiedCaller};
use ed25519_dalek::{Signature, Verifier};

/// Signature scheme headers.
pub const HEADER_DID: &str = "x-agent-did";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_SIGNATURE: &str = "x-signature";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Acceptance window around the engine clock.
pub const MAX_CLOCK_SKEW_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing required header `{0}`")]
    MissingHeader(&'static str),
    #[error("malformed caller id")]
    MalformedId,
    #[error("signature verification failed")]
    BadSignature,
    #[error("timestamp outside the acceptance window")]
    StaleTimestamp,
    #[error("unusable request body: {0}")]
    MalformedBody(String),
}

impl AuthError {
    /// Stable reason code; deliberately says nothing about which byte was
    /// wrong.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AuthError::MissingHeader(_) => "AUTH_MISSING",
            AuthError::MalformedId => "AUTH_MALFORMED_ID",
            AuthError::BadSignature => "AUTH_BAD_SIGNATURE",
            AuthError::StaleTimestamp => "AUTH_EXPIRED",
            AuthError::MalformedBody(_) => "MALFORMED_BODY",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// The exact byte string that gets signed.
pub fn canonical_message(method: &str, path: &str, timestamp: &str, body_hash: &str) -> String {
    format!("{}{path}{timestamp}{body_hash}", method.to_uppercase())
}

/// Verify one request. `now` is injected so the window is testable.
pub fn verify_request(
    method: &str,
    path: &str,
    did_header: &str,
    timestamp_header: &str,
    signature_header: &str,
    body_hash: &str,
    now: u64,
) -> Result<VerifiedCaller, AuthError> {
    let did = AgentDid::parse(did_header).map_err(|_| AuthError::MalformedId)?;

    let timestamp: u64 = timestamp_header
        .parse()
        .map_err(|_| AuthError::StaleTimestamp)?;
    if now.abs_diff(timestamp) > MAX_CLOCK_SKEW_SECS {
        return Err(AuthError::StaleTimestamp);
    }

    let mut signature_bytes = [0u8; 64];
    if signature_header.len() != 128 {
        return Err(AuthError::BadSignature);
    }
    hex::decode_to_slice(signature_header, &mut signature_bytes)
        .map_err(|_| AuthError::BadSignature)?;
    let signature = Signature::from_bytes(&signature_bytes);

    let message = canonical_message(method, path, timestamp_header, body_hash);
    let verifying_key = did.verifying_key().map_err(|_| AuthError::MalformedId)?;
    verifying_key
        .verify(message.as_bytes(), &signature)
        .map_err(|_| AuthError::BadSignature)?;

    Ok(VerifiedCaller {
        did,
        reputation: None,
    })
}

/// Produce the hex signature for a canonical message. Client SDK and test
/// helper; the edge itself never signs.
pub fn sign_canonical(
    signing_key: &ed25519_dalek::SigningKey,
    method: &str,
    path: &str,
    timestamp: &str,
    body_hash: &str,
) -> String {
    use ed25519_dalek::Signer;
    let message = canonical_message(method, path, timestamp, body_hash);
    hex::encode(signing_key.sign(message.as_bytes()).to_bytes())
}

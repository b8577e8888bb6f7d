//! Caller identities.
//!
//! Agents identify themselves with a `did:key:<64 hex chars>` string whose
//! hex payload IS the Ed25519 verifying key. There is no registration step;
//! id uniqueness and key binding both follow from the format.

use ed25519_dalek::VerifyingKey;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const DID_PREFIX: &str = "did:key:";

/// Errors produced while parsing or using an agent DID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DidError {
    /// The string does not match `did:key:<64 hex chars>`.
    #[error("malformed DID: expected did:key:<64 hex chars>")]
    Malformed,
    /// The hex payload is not a valid Ed25519 curve point.
    #[error("DID payload is not a valid Ed25519 public key")]
    InvalidKey,
}

/// A caller identity of the form `did:key:<hex pubkey>`.
///
/// The 32-byte payload is stored decoded; the canonical string form is
/// re-rendered on demand with lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentDid {
    key: [u8; 32],
}

impl AgentDid {
    /// Parse and validate a DID string, including the curve-point check.
    pub fn parse(s: &str) -> Result<Self, DidError> {
        let hex_part = s.strip_prefix(DID_PREFIX).ok_or(DidError::Malformed)?;
        if hex_part.len() != 64 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DidError::Malformed);
        }
        let mut key = [0u8; 32];
        hex::decode_to_slice(hex_part.to_ascii_lowercase(), &mut key)
            .map_err(|_| DidError::Malformed)?;
        // Reject ids whose payload can never verify anything.
        VerifyingKey::from_bytes(&key).map_err(|_| DidError::InvalidKey)?;
        Ok(Self { key })
    }

    /// Build a DID from a raw verifying key.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self {
            key: key.to_bytes(),
        }
    }

    /// The Ed25519 verifying key the id binds to.
    pub fn verifying_key(&self) -> Result<VerifyingKey, DidError> {
        VerifyingKey::from_bytes(&self.key).map_err(|_| DidError::InvalidKey)
    }

    pub fn key_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl fmt::Display for AgentDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", DID_PREFIX, hex::encode(self.key))
    }
}

impl Serialize for AgentDid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AgentDid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        AgentDid::parse(&s).map_err(de::Error::custom)
    }
}

/// The authenticated caller attached to a request after signature
/// verification at the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedCaller {
    pub did: AgentDid,
    /// Reputation score in `[0, 1]` when a provider supplies one.
    pub reputation: Option<f64>,
}

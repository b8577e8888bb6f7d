//! Receiving wallet identity.
//!
//! The watcher is read-only on-chain: all we ever need from the configured
//! base58 secret is the derived public address the buyer must pay into. The
//! secret bytes are wiped as soon as the address is derived.

use ed25519_dalek::SigningKey;
use zeroize::Zeroize;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("receiving wallet key is not valid base58")]
    BadEncoding,
    #[error("receiving wallet key must decode to 32 or 64 bytes, got {0}")]
    BadLength(usize),
}

/// Watch-only handle on the engine's receiving wallet.
#[derive(Debug, Clone)]
pub struct ReceivingWallet {
    address: String,
}

impl ReceivingWallet {
    /// Derive the public address from a base58 secret: either a 64-byte
    /// keypair (`seed ‖ pubkey`) or a bare 32-byte seed.
    pub fn from_base58_secret(secret: &str) -> Result<Self, WalletError> {
        let mut bytes = bs58::decode(secret)
            .into_vec()
            .map_err(|_| WalletError::BadEncoding)?;
        let pubkey: [u8; 32] = match bytes.len() {
            64 => bytes[32..].try_into().expect("slice is 32 bytes"),
            32 => {
                let seed: [u8; 32] = bytes[..].try_into().expect("slice is 32 bytes");
                SigningKey::from_bytes(&seed).verifying_key().to_bytes()
            }
            n => {
                bytes.zeroize();
                return Err(WalletError::BadLength(n));
            }
        };
        bytes.zeroize();
        Ok(Self {
            address: bs58::encode(pubkey).into_string(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

//! Opaque tokens and the reservation-secret cipher.
//!
//! Tokens (session tokens, reservation codes, deal memos) are drawn from a
//! 64-symbol URL-safe alphabet, 6 bits per character. The reservation code
//! is sealed with AES-256-GCM under a process key before it touches the deal
//! store; the plaintext exists only inside the lock and the PAID reveal.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use zeroize::Zeroize;

/// URL-safe token alphabet (base64url symbol set).
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// AES-GCM nonce width.
const NONCE_LEN: usize = 12;

/// Random token of `len` characters, ~6 bits of entropy each.
pub fn token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        let idx = (rng.next_u32() & 0x3f) as usize;
        out.push(ALPHABET[idx] as char);
    }
    out
}

/// Reservation code revealed to a buyer: `RES-` + 72 bits.
pub fn reservation_code() -> String {
    format!("RES-{}", token(12))
}

/// Opaque session token: `ses_` + 96 bits.
pub fn session_token() -> String {
    format!("ses_{}", token(16))
}

/// Deal memo: 8 characters, 48 bits. Uniqueness is enforced by the store
/// index, not by the generator.
pub fn memo_token() -> String {
    token(8)
}

#[derive(Debug, thiserror::Error)]
pub enum SecretBoxError {
    #[error("cipher key must be 64 hex chars")]
    BadKey,
    #[error("encryption failed")]
    Seal,
    #[error("decryption failed")]
    Open,
}

/// AES-256-GCM box for reservation-code ciphertext.
///
/// Sealed layout: `nonce (12 bytes) ‖ ciphertext+tag`.
pub struct SecretBox {
    key: [u8; 32],
}

impl SecretBox {
    pub fn from_hex(hex_key: &str) -> Result<Self, SecretBoxError> {
        let mut key = [0u8; 32];
        if hex_key.len() != 64 {
            return Err(SecretBoxError::BadKey);
        }
        hex::decode_to_slice(hex_key, &mut key).map_err(|_| SecretBoxError::BadKey)?;
        Ok(Self { key })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SecretBoxError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SecretBoxError::Seal)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, SecretBoxError> {
        if sealed.len() <= NONCE_LEN {
            return Err(SecretBoxError::Open);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretBoxError::Open)
    }
}

impl Drop for SecretBox {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

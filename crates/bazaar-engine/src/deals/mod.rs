//! Locked deals: creation, status checks, and settlement transitions.
//!
//! A deal is born PENDING when an accepted offer is locked for payment, and
//! moves exactly once to PAID (on chain proof) or EXPIRED (past its TTL).
//! Deals are never deleted; they are the settlement record.
//!
//! ## Transition discipline
//!
//! Both transitions are compare-and-swap on the row's status, executed under
//! a per-deal striped lock with no await point inside. The chain probe runs
//! *outside* any lock: concurrent `check` calls may all probe, but only one
//! writer effects PENDING→PAID; losers re-read and return the winner's view.
//! Duplicate chain events therefore cannot double-credit.

pub mod store;

use crate::chain::ChainWatcher;
use crate::clock::unix_now;
use crate::price::{PriceConverter, PriceError};
use crate::secrets::{memo_token, reservation_code, SecretBox, SecretBoxError};
use bazaar_types::{CryptoCurrency, PaymentInstructions, PaymentProof, RequestId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use store::{KeyValueStore, StoreError};
use tracing::{info, warn};
use uuid::Uuid;

const LOCK_STRIPES: usize = 64;
const MEMO_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealStatus {
    Pending,
    Paid,
    Expired,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Pending => "PENDING",
            DealStatus::Paid => "PAID",
            DealStatus::Expired => "EXPIRED",
        }
    }
}

/// The engine-private settlement record. The edge only ever sees the
/// [`PaymentInstructions`] projection and the status views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: Uuid,
    pub item_id: String,
    /// Item name snapshot; catalog rows may change after the lock.
    pub item_name: String,
    /// Agreed fiat price.
    pub final_price: f64,
    /// Crypto amount the transfer must carry.
    pub amount: f64,
    pub currency: CryptoCurrency,
    /// Globally unique transfer memo binding a payment to this deal.
    pub memo: String,
    pub wallet_address: String,
    pub network: String,
    /// AES-GCM sealed reservation code; plaintext never stored.
    pub secret_ciphertext: Vec<u8>,
    pub status: DealStatus,
    pub created_at: u64,
    pub expires_at: u64,
    pub paid_at: Option<u64>,
    pub tx_hash: Option<String>,
    pub slot: Option<u64>,
    pub from_address: Option<String>,
}

impl Deal {
    pub fn instructions(&self) -> PaymentInstructions {
        PaymentInstructions {
            deal_id: self.id,
            wallet_address: self.wallet_address.clone(),
            crypto_amount: self.amount,
            currency: self.currency,
            memo: self.memo.clone(),
            network: self.network.clone(),
            expires_at: self.expires_at,
        }
    }

    fn stored_proof(&self) -> Option<PaymentProof> {
        Some(PaymentProof {
            tx_hash: self.tx_hash.clone()?,
            slot: self.slot.unwrap_or(0),
            sender: self.from_address.clone().unwrap_or_default(),
            confirmed_at: self.paid_at.unwrap_or(0),
        })
    }
}

/// Result of a status check, ready to map onto the wire reply.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Paid {
        reservation_code: String,
        proof: PaymentProof,
    },
    Pending {
        instructions: PaymentInstructions,
    },
    Expired,
}

#[derive(Debug, thiserror::Error)]
pub enum DealError {
    #[error("deal not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not draw a unique memo after {MEMO_ATTEMPTS} attempts")]
    MemoExhausted,
    #[error("secret cipher failure: {0}")]
    Cipher(#[from] SecretBoxError),
    #[error(transparent)]
    Price(#[from] PriceError),
    #[error("corrupt deal row: {0}")]
    Corrupt(String),
}

pub struct DealRepository {
    store: Arc<dyn KeyValueStore>,
    secrets: SecretBox,
    converter: PriceConverter,
    wallet_address: String,
    network: String,
    currency: CryptoCurrency,
    ttl_seconds: u64,
    stripes: Vec<Mutex<()>>,
}

impl DealRepository {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        secrets: SecretBox,
        converter: PriceConverter,
        wallet_address: String,
        network: String,
        currency: CryptoCurrency,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            store,
            secrets,
            converter,
            wallet_address,
            network,
            currency,
            ttl_seconds,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, deal_id: &Uuid) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        deal_id.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % LOCK_STRIPES]
    }

    fn deal_key(deal_id: &Uuid) -> Vec<u8> {
        let mut key = b"deal/".to_vec();
        key.extend_from_slice(deal_id.as_bytes());
        key
    }

    fn memo_key(memo: &str) -> Vec<u8> {
        let mut key = b"memo/".to_vec();
        key.extend_from_slice(memo.as_bytes());
        key
    }

    fn load(&self, deal_id: &Uuid) -> Result<Option<Deal>, DealError> {
        match self.store.get(&Self::deal_key(deal_id))? {
            Some(bytes) => {
                let deal =
                    bincode::deserialize(&bytes).map_err(|e| DealError::Corrupt(e.to_string()))?;
                Ok(Some(deal))
            }
            None => Ok(None),
        }
    }

    fn save(&self, deal: &Deal) -> Result<(), DealError> {
        let bytes = bincode::serialize(deal).map_err(|e| DealError::Corrupt(e.to_string()))?;
        self.store.put(&Self::deal_key(&deal.id), &bytes)?;
        Ok(())
    }

    /// Create a PENDING deal for an accepted offer and return the public
    /// payment instructions. The reservation code is generated here, sealed
    /// immediately, and the plaintext dropped before this function returns.
    pub fn lock(&self, item_id: &str, item_name: &str, final_price: f64) -> Result<(Deal, PaymentInstructions), DealError> {
        let amount = self.converter.to_crypto(final_price, self.currency)?;
        let code = reservation_code();
        let secret_ciphertext = self.secrets.seal(code.as_bytes())?;
        let deal_id = Uuid::new_v4();

        let memo = self.claim_memo(&deal_id)?;
        let now = unix_now();
        let deal = Deal {
            id: deal_id,
            item_id: item_id.to_string(),
            item_name: item_name.to_string(),
            final_price,
            amount,
            currency: self.currency,
            memo,
            wallet_address: self.wallet_address.clone(),
            network: self.network.clone(),
            secret_ciphertext,
            status: DealStatus::Pending,
            created_at: now,
            expires_at: now + self.ttl_seconds,
            paid_at: None,
            tx_hash: None,
            slot: None,
            from_address: None,
        };
        self.save(&deal)?;
        let instructions = deal.instructions();
        Ok((deal, instructions))
    }

    fn claim_memo(&self, deal_id: &Uuid) -> Result<String, DealError> {
        for _ in 0..MEMO_ATTEMPTS {
            let memo = memo_token();
            if self
                .store
                .put_if_absent(&Self::memo_key(&memo), deal_id.as_bytes())?
            {
                return Ok(memo);
            }
        }
        Err(DealError::MemoExhausted)
    }

    /// Status check per the lock protocol: PAID answers from the stored
    /// proof, overdue PENDING rows expire, live PENDING rows probe the chain
    /// and settle through a conditional update.
    pub async fn check(
        &self,
        deal_id: Uuid,
        watcher: &ChainWatcher,
        request_id: RequestId,
    ) -> Result<CheckOutcome, DealError> {
        let deal = self.load(&deal_id)?.ok_or(DealError::NotFound)?;
        match deal.status {
            DealStatus::Paid => self.paid_view(&deal),
            DealStatus::Expired => Ok(CheckOutcome::Expired),
            DealStatus::Pending => {
                let now = unix_now();
                if now > deal.expires_at {
                    return self.try_expire(deal_id, request_id);
                }
                // Chain probe runs without any lock held.
                match watcher
                    .find_payment(deal.amount, &deal.memo, deal.currency)
                    .await
                {
                    Ok(Some(proof)) => self.try_settle(deal_id, proof, request_id),
                    Ok(None) => Ok(CheckOutcome::Pending {
                        instructions: deal.instructions(),
                    }),
                    Err(e) => {
                        // Not an error to the caller: the lock is still live.
                        warn!(
                            event = "chain_probe_failed",
                            request_id = %request_id,
                            deal_id = %deal_id,
                            error = %e,
                        );
                        Ok(CheckOutcome::Pending {
                            instructions: deal.instructions(),
                        })
                    }
                }
            }
        }
    }

    fn paid_view(&self, deal: &Deal) -> Result<CheckOutcome, DealError> {
        let plaintext = self.secrets.open(&deal.secret_ciphertext)?;
        let reservation_code = String::from_utf8(plaintext)
            .map_err(|_| DealError::Corrupt("reservation code is not utf-8".into()))?;
        let proof = deal
            .stored_proof()
            .ok_or_else(|| DealError::Corrupt("paid deal without proof".into()))?;
        Ok(CheckOutcome::Paid {
            reservation_code,
            proof,
        })
    }

    /// Conditional PENDING→PAID. Exactly one concurrent caller wins the
    /// stripe lock with the row still PENDING; everyone else re-reads.
    fn try_settle(
        &self,
        deal_id: Uuid,
        proof: PaymentProof,
        request_id: RequestId,
    ) -> Result<CheckOutcome, DealError> {
        let _guard = self.stripe(&deal_id).lock();
        let mut deal = self.load(&deal_id)?.ok_or(DealError::NotFound)?;
        match deal.status {
            DealStatus::Paid => self.paid_view(&deal),
            DealStatus::Expired => Ok(CheckOutcome::Expired),
            DealStatus::Pending => {
                deal.status = DealStatus::Paid;
                deal.paid_at = Some(if proof.confirmed_at > 0 {
                    proof.confirmed_at
                } else {
                    unix_now()
                });
                deal.tx_hash = Some(proof.tx_hash.clone());
                deal.slot = Some(proof.slot);
                deal.from_address = Some(proof.sender.clone());
                self.save(&deal)?;
                info!(
                    event = "payment_verified",
                    request_id = %request_id,
                    deal_id = %deal_id,
                    tx_hash = %proof.tx_hash,
                    slot = proof.slot,
                );
                self.paid_view(&deal)
            }
        }
    }

    /// Conditional PENDING→EXPIRED; idempotent, and a PAID row observed
    /// under the lock wins over expiry.
    fn try_expire(&self, deal_id: Uuid, request_id: RequestId) -> Result<CheckOutcome, DealError> {
        let _guard = self.stripe(&deal_id).lock();
        let mut deal = self.load(&deal_id)?.ok_or(DealError::NotFound)?;
        match deal.status {
            DealStatus::Paid => self.paid_view(&deal),
            DealStatus::Expired => Ok(CheckOutcome::Expired),
            DealStatus::Pending => {
                deal.status = DealStatus::Expired;
                self.save(&deal)?;
                info!(
                    event = "deal_expired",
                    request_id = %request_id,
                    deal_id = %deal_id,
                );
                Ok(CheckOutcome::Expired)
            }
        }
    }

    /// Raw row access for the test suite and operator tooling.
    pub fn fetch(&self, deal_id: &Uuid) -> Result<Option<Deal>, DealError> {
        self.load(deal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::store::InMemoryStore;
    use super::*;
    use crate::chain::rpc::MockChainRpc;
    use crate::chain::ChainWatcher;

    fn repository(ttl: u64) -> DealRepository {
        DealRepository::new(
            Arc::new(InMemoryStore::new()),
            SecretBox::from_hex(&"ab".repeat(32)).unwrap(),
            PriceConverter::new(100.0, 1.0),
            "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".into(),
            "devnet".into(),
            CryptoCurrency::Sol,
            ttl,
        )
    }

    fn idle_watcher() -> ChainWatcher {
        ChainWatcher::new(
            Arc::new(MockChainRpc::empty()),
            "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".into(),
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".into(),
        )
    }

    #[test]
    fn test_lock_creates_pending_deal_with_converted_amount() {
        let repo = repository(3600);
        let (deal, instructions) = repo.lock("room-101", "Room 101", 160.0).unwrap();
        assert_eq!(deal.status, DealStatus::Pending);
        assert_eq!(deal.amount, 1.6);
        assert_eq!(instructions.crypto_amount, 1.6);
        assert_eq!(instructions.memo.len(), 8);
        assert_eq!(deal.expires_at, deal.created_at + 3600);
        // the stored secret is ciphertext, not the code
        assert!(!deal.secret_ciphertext.windows(4).any(|w| w == b"RES-"));
    }

    #[test]
    fn test_memos_are_pairwise_distinct() {
        let repo = repository(3600);
        let mut memos = std::collections::HashSet::new();
        for _ in 0..64 {
            let (deal, _) = repo.lock("room-101", "Room 101", 160.0).unwrap();
            assert!(memos.insert(deal.memo), "memo collided");
        }
    }

    #[tokio::test]
    async fn test_check_unknown_deal_is_not_found() {
        let repo = repository(3600);
        let err = repo
            .check(Uuid::new_v4(), &idle_watcher(), RequestId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DealError::NotFound));
    }

    #[tokio::test]
    async fn test_pending_without_proof_stays_pending() {
        let repo = repository(3600);
        let (deal, _) = repo.lock("room-101", "Room 101", 160.0).unwrap();
        let outcome = repo
            .check(deal.id, &idle_watcher(), RequestId::new())
            .await
            .unwrap();
        assert!(matches!(outcome, CheckOutcome::Pending { .. }));
    }

    #[tokio::test]
    async fn test_overdue_pending_expires_idempotently() {
        let repo = repository(0);
        let (deal, _) = repo.lock("room-101", "Room 101", 160.0).unwrap();
        // force past expiry
        let mut row = repo.fetch(&deal.id).unwrap().unwrap();
        row.expires_at = unix_now() - 5;
        repo.save(&row).unwrap();

        for _ in 0..3 {
            let outcome = repo
                .check(deal.id, &idle_watcher(), RequestId::new())
                .await
                .unwrap();
            assert_eq!(outcome, CheckOutcome::Expired);
        }
        assert_eq!(
            repo.fetch(&deal.id).unwrap().unwrap().status,
            DealStatus::Expired
        );
    }

    #[test]
    fn test_settle_is_at_most_once() {
        let repo = repository(3600);
        let (deal, _) = repo.lock("room-101", "Room 101", 160.0).unwrap();
        let proof = PaymentProof {
            tx_hash: "5ig".into(),
            slot: 42,
            sender: "payer".into(),
            confirmed_at: unix_now(),
        };

        let first = repo
            .try_settle(deal.id, proof.clone(), RequestId::new())
            .unwrap();
        let second = repo
            .try_settle(
                deal.id,
                PaymentProof {
                    tx_hash: "OTHER".into(),
                    ..proof.clone()
                },
                RequestId::new(),
            )
            .unwrap();

        // the second writer lost the race and sees the first proof
        match (&first, &second) {
            (
                CheckOutcome::Paid { proof: p1, .. },
                CheckOutcome::Paid { proof: p2, .. },
            ) => {
                assert_eq!(p1.tx_hash, "5ig");
                assert_eq!(p2.tx_hash, "5ig");
            }
            other => panic!("expected two paid views, got {other:?}"),
        }
    }

    #[test]
    fn test_paid_deal_never_expires() {
        let repo = repository(0);
        let (deal, _) = repo.lock("room-101", "Room 101", 160.0).unwrap();
        let proof = PaymentProof {
            tx_hash: "5ig".into(),
            slot: 42,
            sender: "payer".into(),
            confirmed_at: unix_now(),
        };
        repo.try_settle(deal.id, proof, RequestId::new()).unwrap();

        let outcome = repo.try_expire(deal.id, RequestId::new()).unwrap();
        assert!(matches!(outcome, CheckOutcome::Paid { .. }));
        assert_eq!(
            repo.fetch(&deal.id).unwrap().unwrap().status,
            DealStatus::Paid
        );
    }

    #[test]
    fn test_paid_view_reveals_reservation_code() {
        let repo = repository(3600);
        let (deal, _) = repo.lock("room-101", "Room 101", 160.0).unwrap();
        let proof = PaymentProof {
            tx_hash: "5ig".into(),
            slot: 42,
            sender: "payer".into(),
            confirmed_at: unix_now(),
        };
        let outcome = repo.try_settle(deal.id, proof, RequestId::new()).unwrap();
        match outcome {
            CheckOutcome::Paid {
                reservation_code, ..
            } => assert!(reservation_code.starts_with("RES-")),
            other => panic!("expected paid, got {other:?}"),
        }
    }
}

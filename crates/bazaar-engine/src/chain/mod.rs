//! Chain watcher: proves that a settling transfer landed on-chain.
//!
//! Given (expected amount, memo, currency) the watcher scans the most recent
//! finalized transactions to the receiving address and returns the first one
//! that (a) is finalized and error-free, (b) carries a memo-program
//! instruction whose payload equals the deal memo byte-for-byte, and (c)
//! credits the receiving address with the expected amount within 0.01%
//! relative tolerance.
//!
//! The watcher is invoked synchronously from status checks, so its total
//! wall-clock work is bounded: past the deadline it reports "no proof yet"
//! instead of blocking the caller. Replay defense is not its job — the deal
//! repository's conditional PENDING→PAID transition subsumes it.

pub mod rpc;
pub mod types;

use bazaar_types::{CryptoCurrency, PaymentProof};
use rpc::{ChainError, ChainRpc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use types::{ConfirmedTransaction, TransactionMeta};

/// How many recent signatures one probe inspects.
const SIGNATURE_LIMIT: usize = 100;

/// Upper bound on one probe's wall-clock work.
const PROBE_DEADLINE: Duration = Duration::from_secs(5);

/// Relative tolerance absorbing floating-point rounding in amounts.
const AMOUNT_TOLERANCE: f64 = 1e-4;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

pub struct ChainWatcher {
    rpc: Arc<dyn ChainRpc>,
    receiving_address: String,
    stable_token_mint: String,
    signature_limit: usize,
    deadline: Duration,
}

impl ChainWatcher {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        receiving_address: String,
        stable_token_mint: String,
    ) -> Self {
        Self {
            rpc,
            receiving_address,
            stable_token_mint,
            signature_limit: SIGNATURE_LIMIT,
            deadline: PROBE_DEADLINE,
        }
    }

    #[cfg(test)]
    fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Look for a finalized transfer settling the given (amount, memo).
    ///
    /// `Ok(None)` means "no proof yet" — including when the deadline ran out
    /// mid-scan. Errors are structural RPC failures only.
    pub async fn find_payment(
        &self,
        expected_amount: f64,
        memo: &str,
        currency: CryptoCurrency,
    ) -> Result<Option<PaymentProof>, ChainError> {
        match tokio::time::timeout(self.deadline, self.scan(expected_amount, memo, currency)).await
        {
            Ok(result) => result,
            Err(_) => {
                debug!(memo, "chain probe hit its deadline");
                Ok(None)
            }
        }
    }

    async fn scan(
        &self,
        expected_amount: f64,
        memo: &str,
        currency: CryptoCurrency,
    ) -> Result<Option<PaymentProof>, ChainError> {
        let signatures = self
            .rpc
            .recent_signatures(&self.receiving_address, self.signature_limit)
            .await?;
        for info in signatures {
            if info.err.is_some() {
                continue;
            }
            // The query already asks for finalized commitment; an explicit
            // weaker status on the entry still disqualifies it.
            if let Some(status) = &info.confirmation_status {
                if status != "finalized" {
                    continue;
                }
            }
            let Some(tx) = self.rpc.transaction(&info.signature).await? else {
                continue;
            };
            if let Some(proof) = self.matches(&info.signature, &tx, expected_amount, memo, currency)
            {
                return Ok(Some(proof));
            }
        }
        Ok(None)
    }

    fn matches(
        &self,
        signature: &str,
        tx: &ConfirmedTransaction,
        expected_amount: f64,
        memo: &str,
        currency: CryptoCurrency,
    ) -> Option<PaymentProof> {
        let meta = tx.meta.as_ref()?;
        if meta.err.is_some() {
            return None;
        }
        if !carries_memo(tx, memo) {
            return None;
        }
        let (credit, sender) = match currency {
            CryptoCurrency::Sol => self.native_credit(tx, meta)?,
            CryptoCurrency::Usdc => self.token_credit(meta)?,
        };
        if !amount_matches(credit, expected_amount) {
            debug!(
                signature,
                credit, expected_amount, "memo matched but amount did not"
            );
            return None;
        }
        Some(PaymentProof {
            tx_hash: signature.to_string(),
            slot: tx.slot,
            sender,
            confirmed_at: tx.block_time.unwrap_or(0).max(0) as u64,
        })
    }

    /// Net lamport credit to the receiving address, plus the payer derived
    /// from the balance-change map (largest debit heuristic).
    fn native_credit(
        &self,
        tx: &ConfirmedTransaction,
        meta: &TransactionMeta,
    ) -> Option<(f64, String)> {
        let keys = &tx.transaction.message.account_keys;
        let receiver_index = keys
            .iter()
            .position(|k| k.pubkey == self.receiving_address)?;
        let pre = *meta.pre_balances.get(receiver_index)? as i128;
        let post = *meta.post_balances.get(receiver_index)? as i128;
        let credit = post - pre;
        if credit <= 0 {
            return None;
        }

        let mut sender = String::new();
        let mut largest_debit: i128 = 0;
        for (index, key) in keys.iter().enumerate() {
            let (Some(&pre), Some(&post)) =
                (meta.pre_balances.get(index), meta.post_balances.get(index))
            else {
                continue;
            };
            let debit = pre as i128 - post as i128;
            if debit > largest_debit {
                largest_debit = debit;
                sender = key.pubkey.clone();
            }
        }
        Some((credit as f64 / LAMPORTS_PER_SOL, sender))
    }

    /// Net stable-token credit to the receiving owner, plus the sender taken
    /// from the token-transfer record whose balance decreased.
    fn token_credit(&self, meta: &TransactionMeta) -> Option<(f64, String)> {
        let pre_amount = |account_index: usize| -> f64 {
            meta.pre_token_balances
                .iter()
                .find(|b| b.account_index == account_index && b.mint == self.stable_token_mint)
                .and_then(|b| b.ui_token_amount.ui_amount)
                .unwrap_or(0.0)
        };

        let mut credit = 0.0;
        for balance in &meta.post_token_balances {
            if balance.mint != self.stable_token_mint {
                continue;
            }
            if balance.owner.as_deref() != Some(self.receiving_address.as_str()) {
                continue;
            }
            let post = balance.ui_token_amount.ui_amount.unwrap_or(0.0);
            credit += post - pre_amount(balance.account_index);
        }
        if credit <= 0.0 {
            return None;
        }

        let sender = meta
            .pre_token_balances
            .iter()
            .filter(|b| b.mint == self.stable_token_mint)
            .find_map(|pre| {
                let post = meta
                    .post_token_balances
                    .iter()
                    .find(|b| b.account_index == pre.account_index && b.mint == pre.mint)
                    .and_then(|b| b.ui_token_amount.ui_amount)
                    .unwrap_or(0.0);
                let before = pre.ui_token_amount.ui_amount.unwrap_or(0.0);
                (before > post).then(|| pre.owner.clone().unwrap_or_default())
            })
            .unwrap_or_default();
        Some((credit, sender))
    }
}

fn carries_memo(tx: &ConfirmedTransaction, memo: &str) -> bool {
    tx.transaction.message.instructions.iter().any(|ix| {
        ix.program.as_deref() == Some("spl-memo")
            && ix
                .parsed
                .as_ref()
                .and_then(|p| p.as_str())
                .map(|payload| payload.as_bytes() == memo.as_bytes())
                .unwrap_or(false)
    })
}

fn amount_matches(found: f64, expected: f64) -> bool {
    (found - expected).abs() <= expected * AMOUNT_TOLERANCE
}

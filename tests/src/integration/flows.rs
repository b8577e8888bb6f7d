//! Engine-level scenario flows.
//!
//! These wire the negotiation service the way the engine binary does, but
//! against in-memory adapters and a scripted chain, and walk the documented
//! scenarios: immediate accept, counter, high-value confirmation, the full
//! lock→pay→reveal arc, expiry, and the settlement race.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bazaar_engine::catalog::{InMemoryCatalog, Item};
    use bazaar_engine::chain::rpc::MockChainRpc;
    use bazaar_engine::chain::types::{
        AccountKey, ConfirmedTransaction, ParsedInstruction, SignatureInfo, TransactionMessage,
        TransactionMeta, TransactionPayload,
    };
    use bazaar_engine::chain::ChainWatcher;
    use bazaar_engine::deals::store::InMemoryStore;
    use bazaar_engine::deals::{CheckOutcome, DealRepository, DealStatus};
    use bazaar_engine::price::PriceConverter;
    use bazaar_engine::secrets::SecretBox;
    use bazaar_engine::service::{NegotiationService, SettlementStack};
    use bazaar_engine::strategy::rule::RuleStrategy;
    use bazaar_types::{
        AgentDid, CryptoCurrency, DealStatusReply, Decision, NegotiateRequest, RequestId, Reveal,
        RpcRequest,
    };
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    const RECEIVER: &str = "recv11111111111111111111111111111111111111";
    const PAYER: &str = "payer1111111111111111111111111111111111111";
    const MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    // =========================================================================
    // FIXTURES
    // =========================================================================

    fn caller() -> AgentDid {
        let sk = SigningKey::generate(&mut OsRng);
        AgentDid::from_public_key(&sk.verifying_key())
    }

    fn room_101() -> Item {
        Item {
            id: "room-101".into(),
            name: "Room 101".into(),
            base_price: 200.0,
            floor_price: 150.0,
            embedding: None,
            active: true,
        }
    }

    fn repository(ttl: u64) -> DealRepository {
        DealRepository::new(
            Arc::new(InMemoryStore::new()),
            SecretBox::from_hex(&"ab".repeat(32)).unwrap(),
            PriceConverter::new(100.0, 1.0),
            RECEIVER.into(),
            "devnet".into(),
            CryptoCurrency::Sol,
            ttl,
        )
    }

    fn service_with_chain(chain: Arc<MockChainRpc>, ttl: u64) -> NegotiationService {
        NegotiationService::new(
            Arc::new(InMemoryCatalog::with_items([room_101()])),
            Arc::new(RuleStrategy::new(1000.0)),
            Some(SettlementStack {
                repository: repository(ttl),
                watcher: ChainWatcher::new(chain, RECEIVER.into(), MINT.into()),
            }),
            ttl,
        )
    }

    fn plain_service() -> NegotiationService {
        NegotiationService::new(
            Arc::new(InMemoryCatalog::with_items([room_101()])),
            Arc::new(RuleStrategy::new(1000.0)),
            None,
            3600,
        )
    }

    fn bid(amount: f64) -> NegotiateRequest {
        NegotiateRequest {
            caller: caller(),
            reputation: None,
            item_id: "room-101".into(),
            bid_amount: amount,
            currency_code: "USD".into(),
        }
    }

    /// A finalized transfer of `lamports` to the receiver, tagged `memo`.
    fn sol_payment(signature: &str, memo: &str, lamports: u64) -> (SignatureInfo, ConfirmedTransaction) {
        let info = SignatureInfo {
            signature: signature.into(),
            err: None,
            confirmation_status: Some("finalized".into()),
        };
        let tx = ConfirmedTransaction {
            slot: 9000,
            block_time: Some(1_700_000_000),
            meta: Some(TransactionMeta {
                err: None,
                pre_balances: vec![10_000_000_000, 500],
                post_balances: vec![10_000_000_000 - lamports - 5_000, 500 + lamports],
                pre_token_balances: vec![],
                post_token_balances: vec![],
            }),
            transaction: TransactionPayload {
                message: TransactionMessage {
                    account_keys: vec![
                        AccountKey {
                            pubkey: PAYER.into(),
                        },
                        AccountKey {
                            pubkey: RECEIVER.into(),
                        },
                    ],
                    instructions: vec![ParsedInstruction {
                        program: Some("spl-memo".into()),
                        program_id: None,
                        parsed: Some(serde_json::Value::String(memo.into())),
                    }],
                },
            },
        };
        (info, tx)
    }

    // =========================================================================
    // NEGOTIATION SCENARIOS
    // =========================================================================

    #[tokio::test]
    async fn test_accept_without_crypto() {
        let reply = plain_service()
            .negotiate(bid(160.0), RequestId::new())
            .await
            .unwrap();
        match reply.decision {
            Decision::Accepted {
                final_price,
                reveal: Reveal::ReservationCode { code },
            } => {
                assert_eq!(final_price, 160.0);
                assert!(code.starts_with("RES-"));
            }
            other => panic!("expected accepted with code, got {other:?}"),
        }
        assert!(reply.payment_instructions.is_none());
    }

    #[tokio::test]
    async fn test_counter_below_floor() {
        let reply = plain_service()
            .negotiate(bid(140.0), RequestId::new())
            .await
            .unwrap();
        match reply.decision {
            Decision::Countered {
                proposed_price,
                reason_code,
                ..
            } => {
                assert_eq!(proposed_price, 150.0);
                assert_eq!(reason_code, "BELOW_FLOOR");
            }
            other => panic!("expected countered, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_high_value_requires_ui() {
        let reply = plain_service()
            .negotiate(bid(1200.0), RequestId::new())
            .await
            .unwrap();
        match reply.decision {
            Decision::UiRequired {
                template_id,
                context,
            } => {
                assert_eq!(template_id, "high_value_confirm");
                assert!(context.contains_key("item_name"));
                assert!(context.contains_key("price"));
            }
            other => panic!("expected ui_required, got {other:?}"),
        }
    }

    // =========================================================================
    // LOCK → PAY → REVEAL
    // =========================================================================

    #[tokio::test]
    async fn test_lock_pay_reveal_and_cached_second_poll() {
        let chain = Arc::new(MockChainRpc::empty());
        let service = service_with_chain(Arc::clone(&chain), 3600);

        // 1. negotiate: accepted, payment required
        let reply = service.negotiate(bid(160.0), RequestId::new()).await.unwrap();
        let instructions = reply.payment_instructions.clone().expect("instructions");
        assert_eq!(instructions.crypto_amount, 1.6);
        assert_eq!(instructions.currency, CryptoCurrency::Sol);
        assert_eq!(instructions.memo.len(), 8);
        let deal_id = match reply.decision {
            Decision::Accepted {
                reveal: Reveal::PaymentLock { deal_id },
                ..
            } => deal_id,
            other => panic!("expected payment lock, got {other:?}"),
        };

        // 2. first poll: nothing on-chain yet
        let status = service.deal_status(deal_id, RequestId::new()).await.unwrap();
        assert!(matches!(status, DealStatusReply::Pending { .. }));

        // 3. a finalized transfer of 1.6 SOL carrying the memo lands
        let (info, tx) = sol_payment("5igTx", &instructions.memo, 1_600_000_000);
        chain.push(info, tx);

        let status = service.deal_status(deal_id, RequestId::new()).await.unwrap();
        let (code, proof) = match status {
            DealStatusReply::Paid {
                reservation_code,
                proof,
            } => (reservation_code, proof),
            other => panic!("expected paid, got {other:?}"),
        };
        assert!(code.starts_with("RES-"));
        assert_eq!(proof.tx_hash, "5igTx");
        assert_eq!(proof.sender, PAYER);

        // 4. second poll answers from the stored row: wiping the chain must
        //    not change anything
        chain.clear();
        let status = service.deal_status(deal_id, RequestId::new()).await.unwrap();
        match status {
            DealStatusReply::Paid {
                reservation_code,
                proof,
            } => {
                assert_eq!(reservation_code, code);
                assert_eq!(proof.tx_hash, "5igTx");
            }
            other => panic!("expected cached paid view, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_amount_never_settles() {
        let chain = Arc::new(MockChainRpc::empty());
        let service = service_with_chain(Arc::clone(&chain), 3600);

        let reply = service.negotiate(bid(160.0), RequestId::new()).await.unwrap();
        let instructions = reply.payment_instructions.unwrap();
        let deal_id = instructions.deal_id;

        // short by 0.1 SOL
        let (info, tx) = sol_payment("5igShort", &instructions.memo, 1_500_000_000);
        chain.push(info, tx);

        let status = service.deal_status(deal_id, RequestId::new()).await.unwrap();
        assert!(matches!(status, DealStatusReply::Pending { .. }));
    }

    #[tokio::test]
    async fn test_chain_outage_reads_as_pending() {
        let service = NegotiationService::new(
            Arc::new(InMemoryCatalog::with_items([room_101()])),
            Arc::new(RuleStrategy::new(1000.0)),
            Some(SettlementStack {
                repository: repository(3600),
                watcher: ChainWatcher::new(
                    Arc::new(MockChainRpc::failing()),
                    RECEIVER.into(),
                    MINT.into(),
                ),
            }),
            3600,
        );
        let reply = service.negotiate(bid(160.0), RequestId::new()).await.unwrap();
        let deal_id = reply.payment_instructions.unwrap().deal_id;

        // the probe fails, the caller just sees PENDING
        let status = service.deal_status(deal_id, RequestId::new()).await.unwrap();
        assert!(matches!(status, DealStatusReply::Pending { .. }));
    }

    // =========================================================================
    // EXPIRY
    // =========================================================================

    #[tokio::test]
    async fn test_short_ttl_lock_expires() {
        let chain = Arc::new(MockChainRpc::empty());
        let service = service_with_chain(chain, 1);

        let reply = service.negotiate(bid(160.0), RequestId::new()).await.unwrap();
        let deal_id = reply.payment_instructions.unwrap().deal_id;

        tokio::time::sleep(Duration::from_secs(2)).await;

        // expiry is observed and idempotent
        for _ in 0..2 {
            let status = service.deal_status(deal_id, RequestId::new()).await.unwrap();
            assert_eq!(status, DealStatusReply::Expired);
        }
    }

    // =========================================================================
    // SETTLEMENT RACE
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_checks_settle_exactly_once() {
        let repo = Arc::new(repository(3600));
        let (deal, instructions) = repo.lock("room-101", "Room 101", 160.0).unwrap();

        let chain = Arc::new(MockChainRpc::empty());
        let (info, tx) = sol_payment("5igRace", &instructions.memo, 1_600_000_000);
        chain.push(info, tx);
        let watcher = Arc::new(ChainWatcher::new(chain, RECEIVER.into(), MINT.into()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            let watcher = Arc::clone(&watcher);
            let deal_id = deal.id;
            handles.push(tokio::spawn(async move {
                repo.check(deal_id, &watcher, RequestId::new()).await
            }));
        }

        let mut paid_views = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                CheckOutcome::Paid {
                    reservation_code,
                    proof,
                } => {
                    paid_views += 1;
                    assert!(reservation_code.starts_with("RES-"));
                    assert_eq!(proof.tx_hash, "5igRace");
                }
                other => panic!("expected paid view, got {other:?}"),
            }
        }
        assert_eq!(paid_views, 8);

        let row = repo.fetch(&deal.id).unwrap().unwrap();
        assert_eq!(row.status, DealStatus::Paid);
        assert_eq!(row.tx_hash.as_deref(), Some("5igRace"));
    }

    // =========================================================================
    // INVARIANT SWEEPS
    // =========================================================================

    #[test]
    fn test_memo_uniqueness_over_many_locks() {
        let repo = repository(3600);
        let mut memos = std::collections::HashSet::new();
        for _ in 0..200 {
            let (deal, _) = repo.lock("room-101", "Room 101", 160.0).unwrap();
            assert!(memos.insert(deal.memo), "memo collided");
        }
    }

    #[tokio::test]
    async fn test_counter_message_never_carries_the_floor() {
        let reply = plain_service()
            .negotiate(bid(10.0), RequestId::new())
            .await
            .unwrap();
        if let Decision::Countered { message, .. } = &reply.decision {
            if let Some(message) = message {
                assert!(!message.contains("150"));
            }
        } else {
            panic!("expected countered");
        }
    }

    #[tokio::test]
    async fn test_dispatch_matches_request_ids() {
        let service = plain_service();
        let request_id = RequestId::new();
        let envelope = bazaar_types::Envelope::new(request_id, RpcRequest::Ping);
        let reply = service.dispatch(envelope).await;
        assert_eq!(reply.request_id, request_id);
    }
}

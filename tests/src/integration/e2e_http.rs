//! Signed HTTP against a live edge + engine pair.
//!
//! Each test boots the real stack on ephemeral ports: the engine RPC server
//! with in-memory adapters and a scripted chain, and the edge router with
//! its full middleware stack. Requests are signed exactly the way a client
//! SDK would sign them.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use bazaar_edge::auth::{
        sign_canonical, HEADER_DID, HEADER_REQUEST_ID, HEADER_SIGNATURE, HEADER_TIMESTAMP,
    };
    use bazaar_edge::canonical::body_digest;
    use bazaar_edge::limiter::{MemoryCounterStore, WindowLimiter};
    use bazaar_edge::routes::{build_router, AppState};
    use bazaar_edge::EngineClient;
    use bazaar_engine::catalog::{InMemoryCatalog, Item};
    use bazaar_engine::chain::rpc::MockChainRpc;
    use bazaar_engine::chain::types::{
        AccountKey, ConfirmedTransaction, ParsedInstruction, SignatureInfo, TransactionMessage,
        TransactionMeta, TransactionPayload,
    };
    use bazaar_engine::chain::ChainWatcher;
    use bazaar_engine::deals::store::InMemoryStore;
    use bazaar_engine::deals::DealRepository;
    use bazaar_engine::price::PriceConverter;
    use bazaar_engine::secrets::SecretBox;
    use bazaar_engine::service::{NegotiationService, SettlementStack};
    use bazaar_engine::strategy::rule::RuleStrategy;
    use bazaar_types::{AgentDid, CryptoCurrency};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    const RECEIVER: &str = "recv11111111111111111111111111111111111111";
    const PAYER: &str = "payer1111111111111111111111111111111111111";
    const MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    struct TestStack {
        base: String,
        http: reqwest::Client,
        key: SigningKey,
        did: AgentDid,
        chain: Arc<MockChainRpc>,
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

    async fn spawn_stack(crypto: bool, rate_limit: u64) -> TestStack {
        let chain = Arc::new(MockChainRpc::empty());
        let settlement = crypto.then(|| SettlementStack {
            repository: DealRepository::new(
                Arc::new(InMemoryStore::new()),
                SecretBox::from_hex(&"ab".repeat(32)).unwrap(),
                PriceConverter::new(100.0, 1.0),
                RECEIVER.into(),
                "devnet".into(),
                CryptoCurrency::Sol,
                3600,
            ),
            watcher: ChainWatcher::new(Arc::clone(&chain), RECEIVER.into(), MINT.into()),
        });
        let service = Arc::new(NegotiationService::new(
            Arc::new(InMemoryCatalog::with_items([room_101()])),
            Arc::new(RuleStrategy::new(1000.0)),
            settlement,
            3600,
        ));

        let engine_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let engine_addr = engine_listener.local_addr().unwrap();
        tokio::spawn(bazaar_engine::server::serve(engine_listener, service));

        let limiter = Arc::new(WindowLimiter::new(
            Box::new(MemoryCounterStore::new()),
            rate_limit,
            60,
        ));
        let state = AppState {
            engine: EngineClient::new(engine_addr),
            negotiate_deadline: Duration::from_secs(5),
            status_deadline: Duration::from_secs(5),
            ready_deadline: Duration::from_secs(2),
        };
        let router = build_router(state, limiter, 64 * 1024);

        let edge_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let edge_addr = edge_listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(edge_listener, router).await.unwrap();
        });

        let key = SigningKey::generate(&mut OsRng);
        let did = AgentDid::from_public_key(&key.verifying_key());
        TestStack {
            base: format!("http://{edge_addr}"),
            http: reqwest::Client::new(),
            key,
            did,
            chain,
        }
    }

    fn unix_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    impl TestStack {
        async fn signed_post(
            &self,
            path: &str,
            body: Option<serde_json::Value>,
            timestamp: u64,
        ) -> reqwest::Response {
            let bytes = body
                .map(|value| serde_json::to_vec(&value).unwrap())
                .unwrap_or_default();
            let (_, body_hash) = body_digest(&bytes).unwrap();
            let timestamp = timestamp.to_string();
            let signature = sign_canonical(&self.key, "POST", path, &timestamp, &body_hash);
            self.http
                .post(format!("{}{path}", self.base))
                .header(HEADER_DID, self.did.to_string())
                .header(HEADER_TIMESTAMP, timestamp)
                .header(HEADER_SIGNATURE, signature)
                .header("content-type", "application/json")
                .body(bytes)
                .send()
                .await
                .unwrap()
        }

        fn negotiate_body(&self, amount: f64) -> serde_json::Value {
            serde_json::json!({
                "item_id": "room-101",
                "bid_amount": amount,
                "currency_code": "USD",
                "agent_did": self.did.to_string(),
            })
        }

        fn payment_for(&self, memo: &str, lamports: u64) {
            let info = SignatureInfo {
                signature: "5igHttp".into(),
                err: None,
                confirmation_status: Some("finalized".into()),
            };
            let tx = ConfirmedTransaction {
                slot: 7000,
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
            self.chain.push(info, tx);
        }
    }

    // =========================================================================
    // HAPPY PATHS
    // =========================================================================

    #[tokio::test]
    async fn test_accept_over_http() {
        let stack = spawn_stack(false, 100).await;
        let response = stack
            .signed_post("/v1/negotiate", Some(stack.negotiate_body(160.0)), unix_now())
            .await;
        assert_eq!(response.status(), 200);
        assert!(response.headers().contains_key(HEADER_REQUEST_ID));

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["payment_required"], false);
        assert_eq!(body["data"]["final_price"], 160.0);
        assert!(body["data"]["reservation_code"]
            .as_str()
            .unwrap()
            .starts_with("RES-"));
        assert!(body["session_token"].as_str().unwrap().starts_with("ses_"));
    }

    #[tokio::test]
    async fn test_lock_pay_reveal_over_http() {
        let stack = spawn_stack(true, 100).await;

        let response = stack
            .signed_post("/v1/negotiate", Some(stack.negotiate_body(160.0)), unix_now())
            .await;
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["payment_required"], true);
        let instructions = &body["data"]["payment_instructions"];
        assert_eq!(instructions["crypto_amount"], 1.6);
        assert_eq!(instructions["currency"], "SOL");
        let memo = instructions["memo"].as_str().unwrap().to_string();
        assert_eq!(memo.len(), 8);
        let deal_id = body["data"]["deal_id"].as_str().unwrap().to_string();

        // still pending before the transfer
        let path = format!("/v1/deals/{deal_id}/status");
        let response = stack.signed_post(&path, None, unix_now()).await;
        let status: serde_json::Value = response.json().await.unwrap();
        assert_eq!(status["status"], "PENDING");

        // pay and poll again
        stack.payment_for(&memo, 1_600_000_000);
        let response = stack.signed_post(&path, None, unix_now()).await;
        assert_eq!(response.status(), 200);
        let status: serde_json::Value = response.json().await.unwrap();
        assert_eq!(status["status"], "PAID");
        assert!(status["secret"]["reservation_code"]
            .as_str()
            .unwrap()
            .starts_with("RES-"));
        assert_eq!(status["proof"]["tx_hash"], "5igHttp");

        // the reveal is idempotent even with the chain gone
        stack.chain.clear();
        let response = stack.signed_post(&path, None, unix_now()).await;
        let again: serde_json::Value = response.json().await.unwrap();
        assert_eq!(again["status"], "PAID");
        assert_eq!(
            again["secret"]["reservation_code"],
            status["secret"]["reservation_code"]
        );
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        let stack = spawn_stack(false, 100).await;
        let health = stack
            .http
            .get(format!("{}/healthz", stack.base))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status(), 200);

        let ready = stack
            .http
            .get(format!("{}/readyz", stack.base))
            .send()
            .await
            .unwrap();
        assert_eq!(ready.status(), 200);
        let body: serde_json::Value = ready.json().await.unwrap();
        assert_eq!(body["dependencies"]["engine"], "ok");
    }

    // =========================================================================
    // AUTH REJECTIONS
    // =========================================================================

    #[tokio::test]
    async fn test_unsigned_request_is_rejected() {
        let stack = spawn_stack(false, 100).await;
        let response = stack
            .http
            .post(format!("{}/v1/negotiate", stack.base))
            .json(&stack.negotiate_body(160.0))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], "AUTH_MISSING");
    }

    #[tokio::test]
    async fn test_tampered_body_is_rejected() {
        let stack = spawn_stack(false, 100).await;
        // sign one body, send another
        let signed_over = serde_json::to_vec(&stack.negotiate_body(160.0)).unwrap();
        let (_, body_hash) = body_digest(&signed_over).unwrap();
        let timestamp = unix_now().to_string();
        let signature =
            sign_canonical(&stack.key, "POST", "/v1/negotiate", &timestamp, &body_hash);
        let response = stack
            .http
            .post(format!("{}/v1/negotiate", stack.base))
            .header(HEADER_DID, stack.did.to_string())
            .header(HEADER_TIMESTAMP, timestamp)
            .header(HEADER_SIGNATURE, signature)
            .json(&stack.negotiate_body(999.0))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], "AUTH_BAD_SIGNATURE");
    }

    #[tokio::test]
    async fn test_replayed_request_expires() {
        let stack = spawn_stack(false, 100).await;
        // a perfectly signed request from 120 seconds ago
        let response = stack
            .signed_post(
                "/v1/negotiate",
                Some(stack.negotiate_body(160.0)),
                unix_now() - 120,
            )
            .await;
        assert_eq!(response.status(), 401);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], "AUTH_EXPIRED");
    }

    // =========================================================================
    // RATE LIMITING
    // =========================================================================

    #[tokio::test]
    async fn test_over_budget_caller_gets_429() {
        let stack = spawn_stack(false, 3).await;
        for _ in 0..3 {
            let response = stack
                .signed_post("/v1/negotiate", Some(stack.negotiate_body(160.0)), unix_now())
                .await;
            assert_eq!(response.status(), 200);
        }
        let response = stack
            .signed_post("/v1/negotiate", Some(stack.negotiate_body(160.0)), unix_now())
            .await;
        assert_eq!(response.status(), 429);
        let retry_after: u64 = response
            .headers()
            .get("retry-after")
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after >= 1 && retry_after <= 60);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
    }

    // =========================================================================
    // STATUS ENDPOINT EDGES
    // =========================================================================

    #[tokio::test]
    async fn test_status_with_bad_uuid_is_400() {
        let stack = spawn_stack(true, 100).await;
        let response = stack
            .signed_post("/v1/deals/not-a-uuid/status", None, unix_now())
            .await;
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_status_with_unknown_deal_is_404() {
        let stack = spawn_stack(true, 100).await;
        let path = format!("/v1/deals/{}/status", uuid::Uuid::new_v4());
        let response = stack.signed_post(&path, None, unix_now()).await;
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_status_with_crypto_disabled_is_501() {
        let stack = spawn_stack(false, 100).await;
        let path = format!("/v1/deals/{}/status", uuid::Uuid::new_v4());
        let response = stack.signed_post(&path, None, unix_now()).await;
        assert_eq!(response.status(), 501);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], "FEATURE_DISABLED");
    }

    #[tokio::test]
    async fn test_supplied_request_id_is_echoed() {
        let stack = spawn_stack(false, 100).await;
        let supplied = uuid::Uuid::now_v7().to_string();
        let bytes = serde_json::to_vec(&stack.negotiate_body(160.0)).unwrap();
        let (_, body_hash) = body_digest(&bytes).unwrap();
        let timestamp = unix_now().to_string();
        let signature =
            sign_canonical(&stack.key, "POST", "/v1/negotiate", &timestamp, &body_hash);
        let response = stack
            .http
            .post(format!("{}/v1/negotiate", stack.base))
            .header(HEADER_DID, stack.did.to_string())
            .header(HEADER_TIMESTAMP, timestamp)
            .header(HEADER_SIGNATURE, signature)
            .header(HEADER_REQUEST_ID, &supplied)
            .body(bytes)
            .send()
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(HEADER_REQUEST_ID).unwrap(),
            supplied.as_str()
        );
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["request_id"], supplied);
    }
}

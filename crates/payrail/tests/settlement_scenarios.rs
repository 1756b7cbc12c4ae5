//! End-to-end settlement flows against an in-memory store, a manual clock
//! and an in-memory chain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use payrail::config::{CardConfig, ExchangeConfig, OnchainConfig, PriceConfig};
use payrail::providers::{CardAdapter, CryptoExchangeAdapter, IntentRequest};
use payrail::{
    signer, ArtifactKind, Asset, Clock, CreateOrderRequest, InMemoryChainReader, InboundRequest,
    ManualClock, OnchainAdapter, OrderStatus, Orchestrator, PaymentError, PaymentMethod,
    PaymentProvider, PaymentRef, PaymentStatus, Plan, ProviderArtifact, SettlementEvent,
    SettlementKind, SettlementOutcome, StaticPriceOracle, Store, TxObservation, VerifyRequest,
};

const START: i64 = 1_700_000_000;
const CARD_SECRET: &str = "whsec_test";
const EXCHANGE_SECRET: &str = "exchange_secret";
const SEPOLIA: u64 = 11_155_111;
const RECIPIENT: &str = "0x742d35cc6634c0532925a3b8d4c9db96c4b4d8b6";
const SENDER: &str = "0x1111111111111111111111111111111111111111";
const USER: &str = "user-1";

struct StubCard {
    adapter: CardAdapter,
    sessions: AtomicUsize,
    fail_create: AtomicBool,
    remote: Mutex<Option<SettlementKind>>,
}

#[async_trait]
impl PaymentProvider for StubCard {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    async fn create_payment_intent(
        &self,
        _request: &IntentRequest<'_>,
    ) -> Result<ProviderArtifact, PaymentError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PaymentError::ProviderUnavailable("card: HTTP 503".into()));
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let mut artifact = ProviderArtifact::new(ArtifactKind::CheckoutUrl);
        artifact.checkout_url = Some(format!("https://checkout.test/cs_test_{n}"));
        artifact.external.session_id = Some(format!("cs_test_{n}"));
        Ok(artifact)
    }

    fn normalize_inbound(
        &self,
        request: &InboundRequest<'_>,
    ) -> Result<Option<SettlementEvent>, PaymentError> {
        self.adapter.normalize_inbound(request)
    }

    async fn query_remote_status(
        &self,
        payment: &payrail::Payment,
    ) -> Result<Option<SettlementEvent>, PaymentError> {
        let kind = *self.remote.lock().unwrap();
        Ok(kind.map(|kind| SettlementEvent {
            method: PaymentMethod::Card,
            target: PaymentRef::SessionId(payment.external.session_id.clone().unwrap()),
            kind,
            provider_event_kind: "query".into(),
            provider_event_id: None,
            external: Default::default(),
        }))
    }
}

struct StubExchange {
    adapter: CryptoExchangeAdapter,
}

#[async_trait]
impl PaymentProvider for StubExchange {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::CryptoExchange
    }

    async fn create_payment_intent(
        &self,
        request: &IntentRequest<'_>,
    ) -> Result<ProviderArtifact, PaymentError> {
        let mut artifact = ProviderArtifact::new(ArtifactKind::QrCode);
        artifact.external.prepay_id = Some(format!("prepay-{}", request.payment.payment_number));
        artifact.qrcode_link = Some("https://qr.test/code.png".into());
        Ok(artifact)
    }

    fn normalize_inbound(
        &self,
        request: &InboundRequest<'_>,
    ) -> Result<Option<SettlementEvent>, PaymentError> {
        self.adapter.normalize_inbound(request)
    }

    async fn query_remote_status(
        &self,
        _payment: &payrail::Payment,
    ) -> Result<Option<SettlementEvent>, PaymentError> {
        Ok(None)
    }
}

struct Harness {
    orchestrator: Orchestrator,
    clock: Arc<ManualClock>,
    chain: Arc<InMemoryChainReader>,
    card: Arc<StubCard>,
}

fn plan() -> Plan {
    Plan {
        plan_id: 7,
        name: "Pro".into(),
        description: "Pro monthly".into(),
        fiat_price: 1000,
        currency: "USD".into(),
        points_amount: 500,
        plan_type: "subscription".into(),
        benefits: vec!["points".into(), "premium_access".into()],
    }
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(START));
    let chain = Arc::new(InMemoryChainReader::new());

    let mut onchain = OnchainConfig::default();
    onchain.recipients.insert(SEPOLIA, RECIPIENT.parse().unwrap());
    let oracle = Arc::new(StaticPriceOracle::new(PriceConfig::default(), clock.clone()));

    let card = Arc::new(StubCard {
        adapter: CardAdapter::new(
            CardConfig {
                secret_key: "sk_test".into(),
                webhook_secret: CARD_SECRET.into(),
                api_url: "http://127.0.0.1:9".into(),
                webhook_tolerance_secs: 300,
            },
            reqwest::Client::new(),
        ),
        sessions: AtomicUsize::new(0),
        fail_create: AtomicBool::new(false),
        remote: Mutex::new(None),
    });
    let exchange = Arc::new(StubExchange {
        adapter: CryptoExchangeAdapter::new(
            ExchangeConfig {
                api_key: "cert-sn".into(),
                api_secret: EXCHANGE_SECRET.into(),
                api_url: "http://127.0.0.1:9".into(),
            },
            reqwest::Client::new(),
        ),
    });

    let store = Store::open_in_memory().unwrap();
    store.with_tx(|tx| tx.upsert_plan(&plan())).unwrap();

    let orchestrator = Orchestrator::new(store, onchain.clone(), chain.clone(), oracle.clone())
        .with_clock(clock.clone())
        .with_provider(card.clone())
        .with_provider(exchange)
        .with_provider(Arc::new(OnchainAdapter::new(onchain, oracle)));

    Harness {
        orchestrator,
        clock,
        chain,
        card,
    }
}

fn request(method: PaymentMethod) -> CreateOrderRequest {
    CreateOrderRequest {
        plan_id: 7,
        user_id: USER.into(),
        method,
        return_url: Some("https://shop.test/done".into()),
        cancel_url: None,
        chain_id: (method == PaymentMethod::Onchain).then_some(SEPOLIA),
    }
}

impl Harness {
    fn card_webhook(
        &self,
        event: serde_json::Value,
    ) -> Result<Option<SettlementOutcome>, PaymentError> {
        let body = serde_json::to_vec(&event).unwrap();
        let t = self.clock.now();
        let sig = signer::card_signature(CARD_SECRET.as_bytes(), t, &body);
        let headers = HashMap::from([("stripe-signature".to_string(), format!("t={t},v1={sig}"))]);
        self.orchestrator.handle_inbound(
            PaymentMethod::Card,
            &InboundRequest {
                body: &body,
                headers: &headers,
                received_at: t,
            },
        )
    }

    fn exchange_webhook(
        &self,
        signed: &[u8],
        delivered: &[u8],
    ) -> Result<Option<SettlementOutcome>, PaymentError> {
        let ts = (self.clock.now() * 1000).to_string();
        let nonce = "n0nce";
        let sig = signer::sign(EXCHANGE_SECRET.as_bytes(), &ts, nonce, signed);
        let headers = HashMap::from([
            ("binancepay-timestamp".to_string(), ts),
            ("binancepay-nonce".to_string(), nonce.to_string()),
            ("binancepay-signature".to_string(), sig),
        ]);
        self.orchestrator.handle_inbound(
            PaymentMethod::CryptoExchange,
            &InboundRequest {
                body: delivered,
                headers: &headers,
                received_at: self.clock.now(),
            },
        )
    }

    fn status(&self, order_id: &str) -> (OrderStatus, PaymentStatus) {
        let snapshot = self.orchestrator.query_status(USER, order_id).unwrap();
        (snapshot.order.status, snapshot.payment.status)
    }

    fn points(&self) -> i64 {
        self.orchestrator.benefits(USER).unwrap().points
    }

    fn observe(&self, tx_hash: &str, value: &str, confirmations: u64) {
        self.chain.insert(TxObservation {
            tx_hash: tx_hash.into(),
            chain_id: SEPOLIA,
            from: SENDER.into(),
            to: Some(RECIPIENT.into()),
            value: value.into(),
            currency: "ETH".into(),
            asset: Asset::Native,
            block_number: 100,
            head_block: 100 + confirmations - 1,
            confirmations,
            gas_used: Some("21000".into()),
            gas_price: Some("1000000000".into()),
            succeeded: true,
        });
    }
}

fn checkout_completed(event_id: &str, session_id: &str, payment_number: &str) -> serde_json::Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "payment_intent": "pi_123",
            "payment_status": "paid",
            "metadata": { "payment_number": payment_number }
        }}
    })
}

fn tx_hash(byte: &str) -> String {
    format!("0x{}", byte.repeat(32))
}

#[tokio::test]
async fn card_checkout_pays_once() {
    let h = harness();
    let created = h.orchestrator.create_order(request(PaymentMethod::Card)).await.unwrap();
    assert_eq!(created.artifact.kind, ArtifactKind::CheckoutUrl);
    assert_eq!(h.status(&created.order_id), (OrderStatus::Pending, PaymentStatus::Pending));

    let event = checkout_completed("evt_1", "cs_test_1", &created.payment_number);
    let outcome = h.card_webhook(event.clone()).unwrap();
    assert_eq!(
        outcome,
        Some(SettlementOutcome::Applied {
            from: OrderStatus::Pending,
            to: OrderStatus::Paid
        })
    );
    assert_eq!(h.status(&created.order_id), (OrderStatus::Paid, PaymentStatus::Paid));
    assert_eq!(h.points(), 500);

    let snapshot = h.orchestrator.query_status(USER, &created.order_id).unwrap();
    assert_eq!(snapshot.order.paid_at, Some(START));
    assert_eq!(snapshot.payment.external.intent_id.as_deref(), Some("pi_123"));

    // Replayed delivery.
    assert_eq!(h.card_webhook(event).unwrap(), Some(SettlementOutcome::Duplicate));
    assert_eq!(h.points(), 500);
    assert_eq!(h.orchestrator.benefits(USER).unwrap().entitlements.len(), 2);
}

#[tokio::test]
async fn late_completion_after_expiry_is_rejected() {
    let h = harness();
    let created = h.orchestrator.create_order(request(PaymentMethod::Card)).await.unwrap();

    let expired = json!({
        "id": "evt_exp",
        "type": "checkout.session.expired",
        "data": { "object": { "id": "cs_test_1" } }
    });
    h.card_webhook(expired).unwrap();
    assert_eq!(h.status(&created.order_id), (OrderStatus::Expired, PaymentStatus::Expired));

    let late = checkout_completed("evt_late", "cs_test_1", &created.payment_number);
    let err = h.card_webhook(late).unwrap_err();
    assert!(matches!(err, PaymentError::StateConflict(_)));
    assert_eq!(h.status(&created.order_id), (OrderStatus::Expired, PaymentStatus::Expired));
    assert_eq!(h.points(), 0);
}

#[tokio::test]
async fn card_webhook_with_bad_signature_changes_nothing() {
    let h = harness();
    let created = h.orchestrator.create_order(request(PaymentMethod::Card)).await.unwrap();

    let body = serde_json::to_vec(&checkout_completed("evt_1", "cs_test_1", &created.payment_number))
        .unwrap();
    let t = h.clock.now();
    let sig = signer::card_signature(b"wrong_secret", t, &body);
    let headers = HashMap::from([("stripe-signature".to_string(), format!("t={t},v1={sig}"))]);
    let err = h
        .orchestrator
        .handle_inbound(
            PaymentMethod::Card,
            &InboundRequest {
                body: &body,
                headers: &headers,
                received_at: t,
            },
        )
        .unwrap_err();
    assert!(matches!(err, PaymentError::SignatureInvalid(_)));
    assert_eq!(h.status(&created.order_id).0, OrderStatus::Pending);
}

#[tokio::test]
async fn exchange_notification_settles_and_rejects_tampering() {
    let h = harness();
    let created = h
        .orchestrator
        .create_order(request(PaymentMethod::CryptoExchange))
        .await
        .unwrap();
    assert!(created.artifact.external.prepay_id.is_some());

    let data = json!({ "merchantTradeNo": created.payment_number, "transactionId": "T-1" }).to_string();
    let body = serde_json::to_vec(&json!({
        "bizType": "PAY",
        "bizIdStr": "29383937493038367292",
        "bizStatus": "PAY_SUCCESS",
        "data": data,
    }))
    .unwrap();

    let mut tampered = body.clone();
    let last = tampered.len() - 2;
    tampered[last] = b' ';
    let err = h.exchange_webhook(&body, &tampered).unwrap_err();
    assert!(matches!(err, PaymentError::SignatureInvalid(_)));
    assert_eq!(h.status(&created.order_id).0, OrderStatus::Pending);

    let outcome = h.exchange_webhook(&body, &body).unwrap();
    assert!(matches!(outcome, Some(SettlementOutcome::Applied { .. })));
    assert_eq!(h.status(&created.order_id), (OrderStatus::Paid, PaymentStatus::Paid));
    assert_eq!(h.exchange_webhook(&body, &body).unwrap(), Some(SettlementOutcome::Duplicate));
}

#[tokio::test]
async fn refund_revokes_everything_granted() {
    let h = harness();
    let created = h.orchestrator.create_order(request(PaymentMethod::Card)).await.unwrap();
    h.card_webhook(checkout_completed("evt_1", "cs_test_1", &created.payment_number))
        .unwrap();
    assert_eq!(h.points(), 500);

    let refund = json!({
        "id": "evt_refund",
        "type": "charge.refunded",
        "data": { "object": { "id": "ch_1", "payment_intent": "pi_123", "refunded": true } }
    });
    let outcome = h.card_webhook(refund.clone()).unwrap();
    assert_eq!(
        outcome,
        Some(SettlementOutcome::Applied {
            from: OrderStatus::Paid,
            to: OrderStatus::Refunded
        })
    );
    assert_eq!(h.status(&created.order_id), (OrderStatus::Refunded, PaymentStatus::Refunded));
    assert_eq!(h.points(), 0);
    let benefits = h.orchestrator.benefits(USER).unwrap();
    assert!(benefits.entitlements.iter().all(|e| !e.active));

    let net = h
        .orchestrator
        .store()
        .read(|tx| tx.points_net_for_order(&created.order_id))
        .unwrap();
    assert_eq!(net, 0);

    // A second refund event for the same charge.
    let again = json!({
        "id": "evt_refund_2",
        "type": "charge.refunded",
        "data": { "object": { "id": "ch_1", "payment_intent": "pi_123", "refunded": true } }
    });
    assert_eq!(h.card_webhook(again).unwrap(), Some(SettlementOutcome::Unchanged));
    assert_eq!(h.points(), 0);
}

#[tokio::test]
async fn refund_event_without_refunded_flag_still_refunds() {
    let h = harness();
    let created = h.orchestrator.create_order(request(PaymentMethod::Card)).await.unwrap();
    h.card_webhook(checkout_completed("evt_1", "cs_test_1", &created.payment_number))
        .unwrap();

    let refund = json!({
        "id": "evt_refund",
        "type": "charge.refunded",
        "data": { "object": {
            "id": "ch_1",
            "payment_intent": "pi_123",
            "metadata": { "payment_number": created.payment_number }
        }}
    });
    assert_eq!(
        h.card_webhook(refund).unwrap(),
        Some(SettlementOutcome::Applied {
            from: OrderStatus::Paid,
            to: OrderStatus::Refunded
        })
    );
    assert_eq!(h.status(&created.order_id), (OrderStatus::Refunded, PaymentStatus::Refunded));
    assert_eq!(h.points(), 0);
}

#[tokio::test]
async fn onchain_payment_waits_for_confirmations() {
    let h = harness();
    let created = h.orchestrator.create_order(request(PaymentMethod::Onchain)).await.unwrap();
    let quote = created.artifact.onchain.clone().unwrap();
    assert_eq!(quote.price_ttl, START + 900);
    let hash = tx_hash("ab");
    h.observe(&hash, &quote.token_amount, 1);

    let verify = VerifyRequest {
        order_id: created.order_id.clone(),
        tx_hash: hash.clone(),
        from_address: SENDER.into(),
    };
    let partial = h.orchestrator.verify_onchain(USER, verify.clone()).await.unwrap();
    assert!(partial.success);
    assert!(!partial.confirmed);
    assert_eq!(partial.confirmations, 1);
    assert_eq!(partial.required_confirmations, 3);
    assert_eq!(h.status(&created.order_id).0, OrderStatus::Pending);
    let recorded = h.orchestrator.transaction(USER, &hash).unwrap();
    assert_eq!(recorded.status, payrail::TransactionStatus::Pending);

    h.chain.set_confirmations(SEPOLIA, &hash, 3);
    let done = h.orchestrator.verify_onchain(USER, verify.clone()).await.unwrap();
    assert!(done.confirmed);
    assert_eq!(h.status(&created.order_id), (OrderStatus::Paid, PaymentStatus::Paid));
    assert_eq!(h.points(), 500);

    let snapshot = h.orchestrator.query_status(USER, &created.order_id).unwrap();
    assert_eq!(snapshot.payment.external.tx_hash.as_deref(), Some(hash.as_str()));

    // Verifying again reports the settled result without granting twice.
    let again = h.orchestrator.verify_onchain(USER, verify).await.unwrap();
    assert!(again.confirmed);
    assert_eq!(h.points(), 500);
}

#[tokio::test]
async fn quote_deadline_holds_after_partial_verification() {
    let h = harness();
    let created = h.orchestrator.create_order(request(PaymentMethod::Onchain)).await.unwrap();
    let quote = created.artifact.onchain.clone().unwrap();
    let hash = tx_hash("cd");
    h.observe(&hash, &quote.token_amount, 1);
    let verify = VerifyRequest {
        order_id: created.order_id.clone(),
        tx_hash: hash.clone(),
        from_address: SENDER.into(),
    };
    let first = h.orchestrator.verify_onchain(USER, verify.clone()).await.unwrap();
    assert!(!first.confirmed);

    h.clock.advance(901);
    h.chain.set_confirmations(SEPOLIA, &hash, 5);
    let err = h.orchestrator.verify_onchain(USER, verify).await.unwrap_err();
    assert!(matches!(err, PaymentError::PriceExpired { .. }));
    assert_eq!(h.status(&created.order_id), (OrderStatus::Expired, PaymentStatus::Expired));
    assert_eq!(h.points(), 0);
}

#[tokio::test]
async fn expired_quote_expires_order() {
    let h = harness();
    let created = h.orchestrator.create_order(request(PaymentMethod::Onchain)).await.unwrap();
    let quote = created.artifact.onchain.clone().unwrap();
    let hash = tx_hash("ef");
    h.observe(&hash, &quote.token_amount, 10);

    h.clock.advance(901);
    let err = h
        .orchestrator
        .verify_onchain(
            USER,
            VerifyRequest {
                order_id: created.order_id.clone(),
                tx_hash: hash,
                from_address: SENDER.into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::PriceExpired { price_ttl } if price_ttl == START + 900));
    assert_eq!(h.status(&created.order_id), (OrderStatus::Expired, PaymentStatus::Expired));
}

#[tokio::test]
async fn wrong_amount_and_reused_hash_are_invalid() {
    let h = harness();
    let first = h.orchestrator.create_order(request(PaymentMethod::Onchain)).await.unwrap();
    let second = h.orchestrator.create_order(request(PaymentMethod::Onchain)).await.unwrap();
    let quote = first.artifact.onchain.clone().unwrap();

    let short = tx_hash("11");
    h.observe(&short, "1", 5);
    let err = h
        .orchestrator
        .verify_onchain(
            USER,
            VerifyRequest {
                order_id: first.order_id.clone(),
                tx_hash: short,
                from_address: SENDER.into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidTransaction(_)));

    let good = tx_hash("22");
    h.observe(&good, &quote.token_amount, 5);
    h.orchestrator
        .verify_onchain(
            USER,
            VerifyRequest {
                order_id: first.order_id.clone(),
                tx_hash: good.clone(),
                from_address: SENDER.into(),
            },
        )
        .await
        .unwrap();

    let err = h
        .orchestrator
        .verify_onchain(
            USER,
            VerifyRequest {
                order_id: second.order_id.clone(),
                tx_hash: good,
                from_address: SENDER.into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidTransaction(_)));
    assert_eq!(h.status(&second.order_id).0, OrderStatus::Pending);
}

#[tokio::test]
async fn failed_provider_call_persists_nothing() {
    let h = harness();
    h.card.fail_create.store(true, Ordering::SeqCst);
    let err = h
        .orchestrator
        .create_order(request(PaymentMethod::Card))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::ProviderUnavailable(_)));

    let page = h
        .orchestrator
        .list_orders(USER, &payrail::OrderFilter { limit: 20, ..Default::default() })
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn unsupported_chain_and_missing_plan() {
    let h = harness();
    let mut req = request(PaymentMethod::Onchain);
    req.chain_id = Some(137);
    assert!(matches!(
        h.orchestrator.create_order(req).await,
        Err(PaymentError::UnsupportedChain(137))
    ));

    let mut req = request(PaymentMethod::Card);
    req.plan_id = 99;
    assert!(matches!(
        h.orchestrator.create_order(req).await,
        Err(PaymentError::NotFound(_))
    ));
}

#[tokio::test]
async fn plan_priced_in_other_fiat_cannot_be_paid_onchain() {
    let h = harness();
    let euro_plan = Plan {
        plan_id: 8,
        currency: "EUR".into(),
        ..plan()
    };
    h.orchestrator
        .store()
        .with_tx(|tx| tx.upsert_plan(&euro_plan))
        .unwrap();

    let mut req = request(PaymentMethod::Onchain);
    req.plan_id = 8;
    assert!(matches!(
        h.orchestrator.create_order(req).await,
        Err(PaymentError::Validation(_))
    ));
    assert!(matches!(
        h.orchestrator.quote(8, SEPOLIA).await,
        Err(PaymentError::Validation(_))
    ));

    let page = h
        .orchestrator
        .list_orders(USER, &payrail::OrderFilter { limit: 20, ..Default::default() })
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn sweeper_expires_stale_orders() {
    let h = harness();
    let created = h
        .orchestrator
        .create_order(request(PaymentMethod::CryptoExchange))
        .await
        .unwrap();
    assert_eq!(h.orchestrator.expire_stale().unwrap(), 0);

    h.clock.advance(3_601);
    assert_eq!(h.orchestrator.expire_stale().unwrap(), 1);
    assert_eq!(h.status(&created.order_id), (OrderStatus::Expired, PaymentStatus::Expired));
    assert_eq!(h.orchestrator.expire_stale().unwrap(), 0);
}

#[tokio::test]
async fn sweeper_expires_order_whose_transfer_never_confirms() {
    let h = harness();
    let created = h.orchestrator.create_order(request(PaymentMethod::Onchain)).await.unwrap();
    let quote = created.artifact.onchain.clone().unwrap();
    let hash = tx_hash("aa");
    h.observe(&hash, &quote.token_amount, 1);
    h.orchestrator
        .verify_onchain(
            USER,
            VerifyRequest {
                order_id: created.order_id.clone(),
                tx_hash: hash.clone(),
                from_address: SENDER.into(),
            },
        )
        .await
        .unwrap();
    assert!(h.orchestrator.transaction(USER, &hash).is_ok());

    h.clock.advance(30 * 24 * 60 * 60);
    assert_eq!(h.orchestrator.expire_stale().unwrap(), 1);
    assert_eq!(h.status(&created.order_id), (OrderStatus::Expired, PaymentStatus::Expired));
}

#[tokio::test]
async fn reconcile_applies_remote_status() {
    let h = harness();
    let created = h.orchestrator.create_order(request(PaymentMethod::Card)).await.unwrap();

    assert_eq!(h.orchestrator.reconcile(&created.payment_id).await.unwrap(), None);
    *h.card.remote.lock().unwrap() = Some(SettlementKind::Success);
    let outcome = h.orchestrator.reconcile(&created.payment_id).await.unwrap();
    assert!(matches!(outcome, Some(SettlementOutcome::Applied { .. })));
    assert_eq!(h.status(&created.order_id).0, OrderStatus::Paid);
}

#[tokio::test]
async fn manual_refund_requires_paid_order() {
    let h = harness();
    let created = h.orchestrator.create_order(request(PaymentMethod::Card)).await.unwrap();
    assert!(matches!(
        h.orchestrator.refund(&created.order_id, Some("ticket-1")),
        Err(PaymentError::StateConflict(_))
    ));

    h.card_webhook(checkout_completed("evt_1", "cs_test_1", &created.payment_number))
        .unwrap();
    let outcome = h.orchestrator.refund(&created.order_id, Some("ticket-1")).unwrap();
    assert!(matches!(outcome, SettlementOutcome::Applied { to: OrderStatus::Refunded, .. }));
    assert_eq!(h.points(), 0);
}

#[tokio::test]
async fn other_users_cannot_see_orders() {
    let h = harness();
    let created = h.orchestrator.create_order(request(PaymentMethod::Card)).await.unwrap();
    assert!(matches!(
        h.orchestrator.query_status("someone-else", &created.order_id),
        Err(PaymentError::NotFound(_))
    ));
    // Lookup by payment id works for the owner.
    let snapshot = h.orchestrator.query_status(USER, &created.payment_id).unwrap();
    assert_eq!(snapshot.order.order_id, created.order_id);
}

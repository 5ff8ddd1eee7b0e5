//! Payout reconciliation and fee backfill tests.
//!
//! These drive the endpoint the way Stripe does across a payment's life:
//! checkout first, then the payout that deposits it, with the charge-update
//! and sweep paths covering the orderings in between.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use rust_decimal::Decimal;
use tower::ServiceExt;

use payment_recon::config::WebhookConfig;
use payment_recon::domain::{CandidateId, CandidateStatus};
use payment_recon::memory::InMemoryStore;
use payment_recon::notify::NoopNotifier;
use payment_recon::provider::{
    PaymentProvider, PayoutTransaction, ProviderError, TransactionData,
};
use payment_recon::signature::SignatureVerifier;
use payment_recon::sweep::Sweeper;
use payment_recon::webhook::{webhook_router, Stores, WebhookState};

// ============================================================================
// Provider double
// ============================================================================

/// Provider with a canned payout listing. Checkout-time fee lookups report
/// not-ready so fee fields stay null until reconciliation, matching the
/// usual timing in production.
struct ScriptedProvider {
    transactions: Vec<PayoutTransaction>,
    fail_listing: bool,
    list_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn with_transactions(transactions: Vec<PayoutTransaction>) -> Self {
        Self {
            transactions,
            fail_listing: false,
            list_calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            transactions: Vec::new(),
            fail_listing: true,
            list_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    async fn list_payout_transactions(
        &self,
        _payout_id: &str,
    ) -> Result<Vec<PayoutTransaction>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing {
            return Err(ProviderError::Request("balance API unavailable".into()));
        }
        Ok(self.transactions.clone())
    }

    async fn get_transaction_data(
        &self,
        payment_intent_id: &str,
    ) -> Result<TransactionData, ProviderError> {
        Err(ProviderError::NotReady(payment_intent_id.to_string()))
    }
}

fn settled_txn(intent: &str, charge: &str, btxn: &str) -> PayoutTransaction {
    PayoutTransaction {
        charge_id: charge.to_string(),
        payment_intent_id: Some(intent.to_string()),
        balance_transaction_id: btxn.to_string(),
        gross_amount: Decimal::new(15000, 2),
        stripe_fee: Decimal::new(450, 2),
        net_amount: Decimal::new(14550, 2),
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    app: Router,
    store: Arc<InMemoryStore>,
    verifier: SignatureVerifier,
}

fn harness(provider: Arc<dyn PaymentProvider>) -> Harness {
    let config = WebhookConfig::new(
        "whsec_test_secret_12345678901234567890",
        "price_candidate_fee",
        "price_team_fee",
    )
    .unwrap();
    let verifier = SignatureVerifier::new(&config);
    let store = Arc::new(InMemoryStore::new());

    let stores = Stores {
        payments: store.clone(),
        payouts: store.clone(),
        links: store.clone(),
        targets: store.clone(),
    };
    let state = Arc::new(WebhookState::new(
        config,
        stores,
        provider,
        Arc::new(NoopNotifier),
    ));

    Harness {
        app: webhook_router(state),
        store,
        verifier,
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

impl Harness {
    async fn post(&self, body: &str) -> StatusCode {
        let header = self.verifier.sign(body.as_bytes(), now());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/stripe")
            .header("content-type", "application/json")
            .header("stripe-signature", header)
            .body(Body::from(body.to_string()))
            .unwrap();
        self.app.clone().oneshot(request).await.unwrap().status()
    }

    async fn checkout(&self, intent: &str, candidate: i64) {
        self.store
            .seed_candidate(CandidateId(candidate), CandidateStatus::AwaitingPayment)
            .await;
        let body = format!(
            r#"{{
                "id": "evt_c_{intent}",
                "type": "checkout.session.completed",
                "data": {{
                    "object": {{
                        "id": "cs_{intent}",
                        "payment_intent": "{intent}",
                        "amount_total": 15000,
                        "metadata": {{
                            "price_id": "price_candidate_fee",
                            "candidate_id": "{candidate}"
                        }}
                    }}
                }}
            }}"#
        );
        assert_eq!(self.post(&body).await, StatusCode::OK);
    }

    async fn payout(&self, payout_id: &str) -> StatusCode {
        let body = format!(
            r#"{{
                "id": "evt_p_{payout_id}",
                "type": "payout.paid",
                "data": {{
                    "object": {{
                        "id": "{payout_id}",
                        "amount": 14550,
                        "currency": "usd",
                        "status": "paid",
                        "arrival_date": {arrival}
                    }}
                }}
            }}"#,
            arrival = now()
        );
        self.post(&body).await
    }
}

// ============================================================================
// Payout scenarios
// ============================================================================

#[tokio::test]
async fn payout_backfills_checkout_payment() {
    let provider = Arc::new(ScriptedProvider::with_transactions(vec![settled_txn(
        "pi_1", "ch_1", "btxn_1",
    )]));
    let h = harness(provider);

    h.checkout("pi_1", 1).await;
    let before = h.store.payment_by_intent("pi_1").await.unwrap();
    assert!(before.stripe_fee.is_none());

    assert_eq!(h.payout("po_1").await, StatusCode::OK);

    let after = h.store.payment_by_intent("pi_1").await.unwrap();
    assert_eq!(after.stripe_fee, Some(Decimal::new(450, 2)));
    assert_eq!(after.net_amount, Some(Decimal::new(14550, 2)));
    assert_eq!(after.charge_id.as_deref(), Some("ch_1"));
    assert_eq!(after.balance_transaction_id.as_deref(), Some("btxn_1"));
    assert_eq!(after.payout_id.as_deref(), Some("po_1"));
    assert!(after.deposited_at.is_some());
    // Gross amount never changes after creation.
    assert_eq!(after.gross_amount, before.gross_amount);

    assert_eq!(h.store.payout_count().await, 1);
    let link = h.store.link_by_btxn("btxn_1").await.unwrap();
    assert_eq!(link.candidate_payment_id, Some(after.id));
    assert!(link.roster_payment_id.is_none());
}

#[tokio::test]
async fn payout_redelivery_is_idempotent() {
    let provider = Arc::new(ScriptedProvider::with_transactions(vec![settled_txn(
        "pi_1", "ch_1", "btxn_1",
    )]));
    let h = harness(provider);

    h.checkout("pi_1", 1).await;
    assert_eq!(h.payout("po_1").await, StatusCode::OK);
    let first = h.store.payment_by_intent("pi_1").await.unwrap();

    assert_eq!(h.payout("po_1").await, StatusCode::OK);

    assert_eq!(h.store.payout_count().await, 1);
    assert_eq!(h.store.link_count().await, 1);
    let second = h.store.payment_by_intent("pi_1").await.unwrap();
    assert_eq!(second.stripe_fee, first.stripe_fee);
    assert_eq!(second.payout_id, first.payout_id);
}

#[tokio::test]
async fn unmatched_transactions_do_not_fail_the_payout() {
    let provider = Arc::new(ScriptedProvider::with_transactions(vec![
        settled_txn("pi_known", "ch_1", "btxn_1"),
        settled_txn("pi_unknown", "ch_2", "btxn_2"),
    ]));
    let h = harness(provider);

    h.checkout("pi_known", 1).await;
    assert_eq!(h.payout("po_1").await, StatusCode::OK);

    assert!(h
        .store
        .payment_by_intent("pi_known")
        .await
        .unwrap()
        .deposited_at
        .is_some());
    assert!(h.store.link_by_btxn("btxn_2").await.unwrap().is_unmatched());
    assert_eq!(h.store.link_count().await, 2);
}

#[tokio::test]
async fn listing_failure_still_acknowledges() {
    let h = harness(Arc::new(ScriptedProvider::failing()));

    h.checkout("pi_1", 1).await;
    assert_eq!(h.payout("po_1").await, StatusCode::OK);

    // Nothing was reconciled and nothing was recorded for the payout.
    assert_eq!(h.store.payout_count().await, 0);
    assert!(h
        .store
        .payment_by_intent("pi_1")
        .await
        .unwrap()
        .deposited_at
        .is_none());
}

// ============================================================================
// Late checkout and sweep
// ============================================================================

#[tokio::test]
async fn sweep_matches_checkout_that_arrived_after_payout() {
    let provider = Arc::new(ScriptedProvider::with_transactions(vec![settled_txn(
        "pi_late", "ch_1", "btxn_1",
    )]));
    let h = harness(provider);

    // Payout first: the transaction cannot match yet.
    assert_eq!(h.payout("po_1").await, StatusCode::OK);
    assert!(h.store.link_by_btxn("btxn_1").await.unwrap().is_unmatched());

    // The checkout event arrives late.
    h.checkout("pi_late", 3).await;
    let payment = h.store.payment_by_intent("pi_late").await.unwrap();
    assert!(payment.deposited_at.is_none());

    let sweeper = Sweeper::new(h.store.clone(), h.store.clone(), h.store.clone());
    let summary = sweeper.run_once().await.unwrap();
    assert_eq!(summary.matched, 1);

    let payment = h.store.payment_by_intent("pi_late").await.unwrap();
    assert_eq!(payment.payout_id.as_deref(), Some("po_1"));
    assert_eq!(payment.stripe_fee, Some(Decimal::new(450, 2)));
    assert!(!h.store.link_by_btxn("btxn_1").await.unwrap().is_unmatched());
}

// ============================================================================
// Charge-update backfill
// ============================================================================

#[tokio::test]
async fn charge_update_without_balance_transaction_is_noop() {
    let provider = Arc::new(ScriptedProvider::with_transactions(Vec::new()));
    let h = harness(provider);
    h.checkout("pi_1", 1).await;

    let body = r#"{
        "id": "evt_charge",
        "type": "charge.updated",
        "data": {
            "object": {"id": "ch_1", "payment_intent": "pi_1", "balance_transaction": null}
        }
    }"#;
    assert_eq!(h.post(body).await, StatusCode::OK);
    assert!(h
        .store
        .payment_by_intent("pi_1")
        .await
        .unwrap()
        .stripe_fee
        .is_none());
}

#[tokio::test]
async fn charge_update_for_unknown_payment_is_acknowledged() {
    let provider = Arc::new(ScriptedProvider::with_transactions(Vec::new()));
    let h = harness(provider);

    let body = r#"{
        "id": "evt_charge",
        "type": "charge.updated",
        "data": {
            "object": {
                "id": "ch_x",
                "payment_intent": "pi_nobody",
                "balance_transaction": "btxn_x"
            }
        }
    }"#;
    assert_eq!(h.post(body).await, StatusCode::OK);
    assert_eq!(h.store.payment_count().await, 0);
}

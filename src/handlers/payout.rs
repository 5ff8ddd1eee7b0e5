//! `payout.paid` reconciliation.
//!
//! A payout event means the provider deposited a batch of charges into the
//! bank account. This handler records the payout, walks its constituent
//! transactions, stamps matched payments with deposit linkage, backfills fee
//! data that checkout processing could not capture, and writes one audit
//! link per transaction.
//!
//! Downstream failures after the initial payout insert resolve to a 200 with
//! a warning in the summary rather than an error response: redelivery of the
//! whole event cannot fix a missing payment row, and the periodic sweep
//! retries unmatched links anyway.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;

use crate::domain::{
    FeeData, MatchSpace, NewLink, NewPayout, PaymentId, PaymentTransaction, Payout,
};
use crate::error::WebhookResult;
use crate::events::PayoutEvent;
use crate::provider::{PaymentProvider, PayoutTransaction};
use crate::store::{LinkStore, PaymentStore, PayoutStore};

/// Result summary for one payout event, returned in the response body.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutSummary {
    /// External payout id.
    pub payout_id: String,
    /// False when transaction listing failed and reconciliation was skipped.
    pub processed: bool,
    pub candidate_payments_updated: usize,
    pub roster_payments_updated: usize,
    pub links_recorded: usize,
    /// Transactions with no matching payment in either space.
    pub unmatched: usize,
    /// Transactions without a payment-intent id (external charges).
    pub skipped_missing_intent: usize,
    /// Recoverable trouble worth surfacing in the delivery log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl PayoutSummary {
    fn skipped(payout_id: &str, warning: String) -> Self {
        Self {
            payout_id: payout_id.to_string(),
            processed: false,
            candidate_payments_updated: 0,
            roster_payments_updated: 0,
            links_recorded: 0,
            unmatched: 0,
            skipped_missing_intent: 0,
            warning: Some(warning),
        }
    }
}

/// Per-transaction outcome, folded into the summary.
enum TxOutcome {
    Matched(MatchSpace, bool),
    Unmatched(bool),
    SkippedMissingIntent(bool),
    Failed(String),
}

/// Handler for `payout.paid` events.
pub struct PayoutHandler {
    provider: Arc<dyn PaymentProvider>,
    payments: Arc<dyn PaymentStore>,
    payouts: Arc<dyn PayoutStore>,
    links: Arc<dyn LinkStore>,
    /// Cap on concurrent provider lookups while reconciling.
    concurrency: usize,
}

impl PayoutHandler {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        payments: Arc<dyn PaymentStore>,
        payouts: Arc<dyn PayoutStore>,
        links: Arc<dyn LinkStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            provider,
            payments,
            payouts,
            links,
            concurrency: concurrency.max(1),
        }
    }

    /// Reconcile one payout.
    ///
    /// Errors are returned only for the initial payout-row insert, where a
    /// retry can genuinely succeed. Everything after that is reported in the
    /// summary.
    pub async fn handle(&self, event: &PayoutEvent) -> WebhookResult<PayoutSummary> {
        let transactions = match self.provider.list_payout_transactions(&event.id).await {
            Ok(txns) => txns,
            Err(e) => {
                tracing::warn!(
                    payout = %event.id,
                    error = %e,
                    "could not list payout transactions; acknowledging without reconciliation"
                );
                counter!("webhook_payout_total", "outcome" => "list_failed").increment(1);
                return Ok(PayoutSummary::skipped(
                    &event.id,
                    format!("transaction listing failed: {e}"),
                ));
            }
        };

        let inserted = self
            .payouts
            .insert_payout(NewPayout {
                payout_id: event.id.clone(),
                amount: event.amount_dollars(),
                currency: event.currency.clone(),
                status: event.status.clone(),
                arrival_date: event.arrival_datetime(),
                transaction_count: transactions.len() as u32,
            })
            .await?;
        if !inserted.was_created() {
            tracing::info!(payout = %event.id, "payout already recorded; re-running reconciliation");
        }
        let payout = inserted.into_inner();

        let outcomes: Vec<TxOutcome> = stream::iter(transactions)
            .map(|txn| self.reconcile_transaction(&payout, txn))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = PayoutSummary {
            payout_id: event.id.clone(),
            processed: true,
            candidate_payments_updated: 0,
            roster_payments_updated: 0,
            links_recorded: 0,
            unmatched: 0,
            skipped_missing_intent: 0,
            warning: None,
        };
        let mut failures = 0usize;
        for outcome in outcomes {
            match outcome {
                TxOutcome::Matched(space, linked) => {
                    match space {
                        MatchSpace::Candidate => summary.candidate_payments_updated += 1,
                        MatchSpace::Roster => summary.roster_payments_updated += 1,
                    }
                    summary.links_recorded += usize::from(linked);
                }
                TxOutcome::Unmatched(linked) => {
                    summary.unmatched += 1;
                    summary.links_recorded += usize::from(linked);
                }
                TxOutcome::SkippedMissingIntent(linked) => {
                    summary.skipped_missing_intent += 1;
                    summary.unmatched += 1;
                    summary.links_recorded += usize::from(linked);
                }
                TxOutcome::Failed(msg) => {
                    failures += 1;
                    if summary.warning.is_none() {
                        summary.warning = Some(msg);
                    }
                }
            }
        }
        if failures > 1 {
            summary.warning = Some(format!("{failures} transactions failed to reconcile"));
        }

        counter!("webhook_payout_total", "outcome" => "reconciled").increment(1);
        tracing::info!(
            payout = %event.id,
            candidates = summary.candidate_payments_updated,
            roster = summary.roster_payments_updated,
            unmatched = summary.unmatched,
            failures,
            "payout reconciled"
        );
        Ok(summary)
    }

    /// Reconcile one transaction. Infallible by construction: store or
    /// provider trouble becomes a [`TxOutcome::Failed`] entry, never an
    /// error for the whole payout.
    async fn reconcile_transaction(&self, payout: &Payout, txn: PayoutTransaction) -> TxOutcome {
        let matched = match txn.payment_intent_id.as_deref() {
            Some(intent) => match self.find_payment(intent).await {
                Ok(found) => found,
                Err(e) => return TxOutcome::Failed(e),
            },
            None => {
                tracing::debug!(
                    charge = %txn.charge_id,
                    "payout transaction has no payment intent; recording link only"
                );
                let linked = self.record_link(payout, &txn, None).await;
                return TxOutcome::SkippedMissingIntent(linked);
            }
        };

        let Some((space, payment)) = matched else {
            tracing::debug!(
                charge = %txn.charge_id,
                payment_intent = txn.payment_intent_id.as_deref().unwrap_or(""),
                "payout transaction matched no recorded payment"
            );
            let linked = self.record_link(payout, &txn, None).await;
            return TxOutcome::Unmatched(linked);
        };

        if let Err(e) = self.settle_payment(payout, &payment, &txn).await {
            return TxOutcome::Failed(e);
        }

        let linked = self.record_link(payout, &txn, Some((space, payment.id))).await;
        TxOutcome::Matched(space, linked)
    }

    /// Candidate space first, then roster. The id spaces are disjoint so at
    /// most one lookup hits.
    async fn find_payment(
        &self,
        intent: &str,
    ) -> Result<Option<(MatchSpace, PaymentTransaction)>, String> {
        if let Some(p) = self
            .payments
            .find_candidate_payment(intent)
            .await
            .map_err(|e| format!("candidate lookup failed for {intent}: {e}"))?
        {
            return Ok(Some((MatchSpace::Candidate, p)));
        }
        if let Some(p) = self
            .payments
            .find_roster_payment(intent)
            .await
            .map_err(|e| format!("roster lookup failed for {intent}: {e}"))?
        {
            return Ok(Some((MatchSpace::Roster, p)));
        }
        Ok(None)
    }

    /// Stamp deposit linkage and backfill fees on a matched payment.
    async fn settle_payment(
        &self,
        payout: &Payout,
        payment: &PaymentTransaction,
        txn: &PayoutTransaction,
    ) -> Result<(), String> {
        self.payments
            .mark_deposited(
                payment.id,
                &payout.payout_id,
                payout.arrival_date.unwrap_or_else(Utc::now),
            )
            .await
            .map_err(|e| format!("mark_deposited failed for {}: {e}", payment.payment_intent_id))?;

        if !payment.has_fee_data() {
            // Fee fields come from a dedicated per-intent lookup, not the
            // listing's summary columns; the listing is only a fallback when
            // that call fails.
            let fees = match self
                .provider
                .get_transaction_data(&payment.payment_intent_id)
                .await
            {
                Ok(data) => FeeData {
                    stripe_fee: data.stripe_fee,
                    net_amount: data.net_amount,
                    charge_id: data.charge_id,
                    balance_transaction_id: data.balance_transaction_id,
                },
                Err(e) => {
                    tracing::warn!(
                        payment_intent = %payment.payment_intent_id,
                        error = %e,
                        "fee lookup failed; falling back to payout listing"
                    );
                    FeeData {
                        stripe_fee: txn.stripe_fee,
                        net_amount: txn.net_amount,
                        charge_id: txn.charge_id.clone(),
                        balance_transaction_id: txn.balance_transaction_id.clone(),
                    }
                }
            };
            self.payments
                .backfill_fees(payment.id, &fees)
                .await
                .map_err(|e| {
                    format!("fee backfill failed for {}: {e}", payment.payment_intent_id)
                })?;
        }
        Ok(())
    }

    /// Write the audit link. Returns whether a new row was created; link
    /// trouble is logged but never fails the transaction, the sweep can
    /// re-derive matches without it.
    async fn record_link(
        &self,
        payout: &Payout,
        txn: &PayoutTransaction,
        matched: Option<(MatchSpace, PaymentId)>,
    ) -> bool {
        let (candidate_payment_id, roster_payment_id) = match matched {
            Some((MatchSpace::Candidate, id)) => (Some(id), None),
            Some((MatchSpace::Roster, id)) => (None, Some(id)),
            None => (None, None),
        };

        let result = self
            .links
            .insert_link(NewLink {
                payout_ref: payout.id,
                payment_intent_id: txn.payment_intent_id.clone(),
                charge_id: txn.charge_id.clone(),
                balance_transaction_id: txn.balance_transaction_id.clone(),
                gross_amount: txn.gross_amount,
                stripe_fee: txn.stripe_fee,
                net_amount: txn.net_amount,
                candidate_payment_id,
                roster_payment_id,
            })
            .await;

        match result {
            Ok(outcome) => outcome.was_created(),
            Err(e) => {
                tracing::warn!(
                    charge = %txn.charge_id,
                    error = %e,
                    "failed to record payout transaction link"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CandidateId, CandidateStatus, NewPayment, PaymentKind, PaymentMethod, PaymentTarget};
    use crate::memory::InMemoryStore;
    use crate::provider::{NoopProvider, ProviderError, TransactionData};
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        transactions: Vec<PayoutTransaction>,
    }

    #[async_trait]
    impl PaymentProvider for FixedProvider {
        async fn list_payout_transactions(
            &self,
            _payout_id: &str,
        ) -> Result<Vec<PayoutTransaction>, ProviderError> {
            Ok(self.transactions.clone())
        }

        async fn get_transaction_data(
            &self,
            payment_intent_id: &str,
        ) -> Result<TransactionData, ProviderError> {
            Err(ProviderError::NotReady(payment_intent_id.to_string()))
        }
    }

    fn event() -> PayoutEvent {
        PayoutEvent {
            id: "po_1".into(),
            amount: 14550,
            currency: "usd".into(),
            status: "paid".into(),
            arrival_date: Some(1_700_000_000),
        }
    }

    fn txn(intent: Option<&str>) -> PayoutTransaction {
        PayoutTransaction {
            charge_id: "ch_1".into(),
            payment_intent_id: intent.map(str::to_owned),
            balance_transaction_id: "btxn_1".into(),
            gross_amount: Decimal::new(15000, 2),
            stripe_fee: Decimal::new(450, 2),
            net_amount: Decimal::new(14550, 2),
        }
    }

    async fn seed_candidate_payment(store: &InMemoryStore, intent: &str) {
        store
            .seed_candidate(CandidateId(1), CandidateStatus::Confirmed)
            .await;
        store
            .insert_payment(NewPayment {
                payment_intent_id: intent.into(),
                target: PaymentTarget::Candidate(CandidateId(1)),
                kind: PaymentKind::Fee,
                gross_amount: Decimal::new(15000, 2),
                payment_method: PaymentMethod::CreditCard,
                payment_owner: "sponsor".into(),
                notes: None,
                fees: None,
            })
            .await
            .unwrap();
    }

    fn handler(store: Arc<InMemoryStore>, provider: Arc<dyn PaymentProvider>) -> PayoutHandler {
        PayoutHandler::new(provider, store.clone(), store.clone(), store, 4)
    }

    #[tokio::test]
    async fn matched_payment_gains_deposit_and_fees() {
        let store = Arc::new(InMemoryStore::new());
        seed_candidate_payment(&store, "pi_1").await;

        let provider = Arc::new(FixedProvider {
            transactions: vec![txn(Some("pi_1"))],
        });
        let summary = handler(store.clone(), provider).handle(&event()).await.unwrap();

        assert!(summary.processed);
        assert_eq!(summary.candidate_payments_updated, 1);
        assert_eq!(summary.unmatched, 0);
        assert_eq!(summary.links_recorded, 1);

        let payment = store.payment_by_intent("pi_1").await.unwrap();
        assert_eq!(payment.payout_id.as_deref(), Some("po_1"));
        assert!(payment.deposited_at.is_some());
        assert_eq!(payment.stripe_fee, Some(Decimal::new(450, 2)));
        assert_eq!(payment.net_amount, Some(Decimal::new(14550, 2)));
        assert_eq!(payment.charge_id.as_deref(), Some("ch_1"));
        assert_eq!(payment.balance_transaction_id.as_deref(), Some("btxn_1"));

        let link = store.link_by_btxn("btxn_1").await.unwrap();
        assert_eq!(link.candidate_payment_id, Some(payment.id));
        assert!(link.roster_payment_id.is_none());
    }

    /// Listing whose summary fee columns disagree with the per-intent
    /// lookup. The lookup wins.
    struct DivergentProvider {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl PaymentProvider for DivergentProvider {
        async fn list_payout_transactions(
            &self,
            _payout_id: &str,
        ) -> Result<Vec<PayoutTransaction>, ProviderError> {
            Ok(vec![PayoutTransaction {
                charge_id: "ch_1".into(),
                payment_intent_id: Some("pi_1".into()),
                balance_transaction_id: "btxn_1".into(),
                gross_amount: Decimal::new(15000, 2),
                stripe_fee: Decimal::new(999, 2),
                net_amount: Decimal::new(14001, 2),
            }])
        }

        async fn get_transaction_data(
            &self,
            _payment_intent_id: &str,
        ) -> Result<TransactionData, ProviderError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(TransactionData {
                gross_amount: Decimal::new(15000, 2),
                stripe_fee: Decimal::new(450, 2),
                net_amount: Decimal::new(14550, 2),
                charge_id: "ch_1".into(),
                balance_transaction_id: "btxn_1".into(),
            })
        }
    }

    #[tokio::test]
    async fn backfill_uses_fee_lookup_not_listing_columns() {
        let store = Arc::new(InMemoryStore::new());
        seed_candidate_payment(&store, "pi_1").await;

        let provider = Arc::new(DivergentProvider {
            lookups: AtomicUsize::new(0),
        });
        let summary = handler(store.clone(), provider.clone())
            .handle(&event())
            .await
            .unwrap();
        assert_eq!(summary.candidate_payments_updated, 1);

        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);
        let payment = store.payment_by_intent("pi_1").await.unwrap();
        assert_eq!(payment.stripe_fee, Some(Decimal::new(450, 2)));
        assert_eq!(payment.net_amount, Some(Decimal::new(14550, 2)));
    }

    #[tokio::test]
    async fn unmatched_transaction_is_tolerated() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(FixedProvider {
            transactions: vec![txn(Some("pi_unknown"))],
        });

        let summary = handler(store.clone(), provider).handle(&event()).await.unwrap();
        assert!(summary.processed);
        assert_eq!(summary.unmatched, 1);
        assert_eq!(summary.candidate_payments_updated, 0);
        assert!(summary.warning.is_none());

        // The audit link is still recorded, unmatched.
        let link = store.link_by_btxn("btxn_1").await.unwrap();
        assert!(link.is_unmatched());
    }

    #[tokio::test]
    async fn missing_intent_records_link_only() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(FixedProvider {
            transactions: vec![txn(None)],
        });

        let summary = handler(store.clone(), provider).handle(&event()).await.unwrap();
        assert_eq!(summary.skipped_missing_intent, 1);
        assert_eq!(summary.links_recorded, 1);
        assert!(store.link_by_btxn("btxn_1").await.unwrap().is_unmatched());
    }

    #[tokio::test]
    async fn listing_failure_acknowledges_with_warning() {
        let store = Arc::new(InMemoryStore::new());
        let summary = handler(store.clone(), Arc::new(NoopProvider))
            .handle(&event())
            .await
            .unwrap();

        assert!(!summary.processed);
        assert!(summary.warning.is_some());
        assert_eq!(store.payout_count().await, 0);
    }

    #[tokio::test]
    async fn redelivery_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        seed_candidate_payment(&store, "pi_1").await;
        let provider = Arc::new(FixedProvider {
            transactions: vec![txn(Some("pi_1"))],
        });
        let handler = handler(store.clone(), provider);

        let first = handler.handle(&event()).await.unwrap();
        assert_eq!(first.links_recorded, 1);

        let second = handler.handle(&event()).await.unwrap();
        assert!(second.processed);
        assert_eq!(second.links_recorded, 0);
        assert_eq!(store.payout_count().await, 1);
        assert_eq!(store.link_count().await, 1);

        // Fee fields are unchanged after redelivery.
        let payment = store.payment_by_intent("pi_1").await.unwrap();
        assert_eq!(payment.stripe_fee, Some(Decimal::new(450, 2)));
    }
}

//! Periodic reconciliation sweep.
//!
//! Payout events can arrive before the checkout event that records the
//! payment they settle, leaving audit links with no matched payment. The
//! sweep re-runs matching over those links so the late arrival still ends up
//! deposited and fee-complete without waiting for another payout.
//!
//! Each link already carries the fee breakdown captured from the payout
//! listing, so the sweep needs no provider calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;

use crate::domain::{FeeData, MatchSpace, PayoutTransactionLink};
use crate::error::WebhookResult;
use crate::store::{LinkStore, PaymentStore, PayoutStore};

/// Result of one sweep pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    /// Unmatched links examined.
    pub examined: usize,
    /// Links newly tied to a payment.
    pub matched: usize,
    /// Links still waiting for their payment.
    pub still_unmatched: usize,
    /// Links that failed to process this pass.
    pub failed: usize,
}

/// Re-matches unmatched payout transaction links against recorded payments.
pub struct Sweeper {
    payments: Arc<dyn PaymentStore>,
    payouts: Arc<dyn PayoutStore>,
    links: Arc<dyn LinkStore>,
}

impl Sweeper {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        payouts: Arc<dyn PayoutStore>,
        links: Arc<dyn LinkStore>,
    ) -> Self {
        Self {
            payments,
            payouts,
            links,
        }
    }

    /// Run one pass over the unmatched links.
    pub async fn run_once(&self) -> WebhookResult<SweepSummary> {
        let unmatched = self.links.unmatched_links().await?;
        let mut summary = SweepSummary {
            examined: unmatched.len(),
            ..SweepSummary::default()
        };

        for link in unmatched {
            if link.payment_intent_id.is_none() {
                // External charges never match; they stay as audit rows.
                summary.still_unmatched += 1;
                continue;
            }
            match self.try_match(&link).await {
                Ok(true) => summary.matched += 1,
                Ok(false) => summary.still_unmatched += 1,
                Err(e) => {
                    tracing::warn!(
                        link = %link.id,
                        charge = %link.charge_id,
                        error = %e,
                        "sweep failed to process link"
                    );
                    summary.failed += 1;
                }
            }
        }

        if summary.matched > 0 {
            counter!("webhook_sweep_matched_total").increment(summary.matched as u64);
        }
        tracing::info!(
            examined = summary.examined,
            matched = summary.matched,
            still_unmatched = summary.still_unmatched,
            failed = summary.failed,
            "reconciliation sweep finished"
        );
        Ok(summary)
    }

    async fn try_match(&self, link: &PayoutTransactionLink) -> WebhookResult<bool> {
        let intent = match link.payment_intent_id.as_deref() {
            Some(intent) => intent,
            None => return Ok(false),
        };

        let found = match self.payments.find_candidate_payment(intent).await? {
            Some(p) => Some((MatchSpace::Candidate, p)),
            None => self
                .payments
                .find_roster_payment(intent)
                .await?
                .map(|p| (MatchSpace::Roster, p)),
        };
        let Some((space, payment)) = found else {
            return Ok(false);
        };

        let payout = self.payouts.payout_by_ref(link.payout_ref).await?;
        let (payout_id, deposited_at) = match &payout {
            Some(p) => (
                p.payout_id.clone(),
                p.arrival_date.unwrap_or_else(Utc::now),
            ),
            // Link without its payout row should not happen; fall back to
            // the link's own creation time.
            None => (String::new(), link.created_at),
        };
        if !payout_id.is_empty() {
            self.payments
                .mark_deposited(payment.id, &payout_id, deposited_at)
                .await?;
        }

        if !payment.has_fee_data() {
            self.payments
                .backfill_fees(
                    payment.id,
                    &FeeData {
                        stripe_fee: link.stripe_fee,
                        net_amount: link.net_amount,
                        charge_id: link.charge_id.clone(),
                        balance_transaction_id: link.balance_transaction_id.clone(),
                    },
                )
                .await?;
        }

        self.links.set_link_match(link.id, space, payment.id).await?;
        tracing::info!(
            link = %link.id,
            payment_intent = intent,
            "late payment matched by sweep"
        );
        Ok(true)
    }

    /// Run forever on a fixed interval. Spawn this on the runtime; a zero
    /// interval disables the sweep entirely.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            tracing::info!("reconciliation sweep disabled");
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; skip it so startup is quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "reconciliation sweep pass failed");
            }
        }
    }
}

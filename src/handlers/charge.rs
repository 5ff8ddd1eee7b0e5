//! `charge.updated` fee backfill.
//!
//! Stripe fires `charge.updated` when a charge's balance transaction is
//! created, usually within an hour of checkout. If the payment is on file
//! with null fee fields this closes the gap without waiting for the payout,
//! so reports between checkout and deposit already show net amounts.
//!
//! Everything here is opportunistic: any miss (unknown intent, data not
//! ready, fees already recorded) is a quiet skip, never an error, since the
//! payout path backfills the same fields later.

use std::sync::Arc;

use metrics::counter;

use crate::domain::FeeData;
use crate::error::WebhookResult;
use crate::events::ChargeEvent;
use crate::provider::PaymentProvider;
use crate::store::PaymentStore;

/// What a `charge.updated` delivery amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Fee fields were backfilled on a recorded payment.
    Backfilled,
    /// The payment already carried fee data.
    AlreadyComplete,
    /// Nothing to do (no balance transaction yet, no intent, no match, or
    /// the provider lookup failed).
    Skipped,
}

/// Handler for `charge.updated` events.
pub struct ChargeBackfill {
    provider: Arc<dyn PaymentProvider>,
    payments: Arc<dyn PaymentStore>,
}

impl ChargeBackfill {
    pub fn new(provider: Arc<dyn PaymentProvider>, payments: Arc<dyn PaymentStore>) -> Self {
        Self { provider, payments }
    }

    pub async fn handle(&self, charge: &ChargeEvent) -> WebhookResult<ChargeOutcome> {
        if charge.balance_transaction.is_none() {
            return Ok(self.done(ChargeOutcome::Skipped));
        }
        let Some(intent) = charge.payment_intent.as_deref() else {
            return Ok(self.done(ChargeOutcome::Skipped));
        };

        let payment = match self.payments.find_candidate_payment(intent).await? {
            Some(p) => Some(p),
            None => self.payments.find_roster_payment(intent).await?,
        };
        let Some(payment) = payment else {
            tracing::debug!(
                charge = %charge.id,
                payment_intent = intent,
                "charge matched no recorded payment"
            );
            return Ok(self.done(ChargeOutcome::Skipped));
        };

        if payment.has_fee_data() {
            return Ok(self.done(ChargeOutcome::AlreadyComplete));
        }

        let data = match self.provider.get_transaction_data(intent).await {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(
                    charge = %charge.id,
                    payment_intent = intent,
                    error = %e,
                    "fee data still unavailable; leaving for payout backfill"
                );
                return Ok(self.done(ChargeOutcome::Skipped));
            }
        };

        self.payments
            .backfill_fees(
                payment.id,
                &FeeData {
                    stripe_fee: data.stripe_fee,
                    net_amount: data.net_amount,
                    charge_id: data.charge_id,
                    balance_transaction_id: data.balance_transaction_id,
                },
            )
            .await?;

        tracing::info!(
            charge = %charge.id,
            payment_intent = intent,
            "fee data backfilled from charge update"
        );
        Ok(self.done(ChargeOutcome::Backfilled))
    }

    fn done(&self, outcome: ChargeOutcome) -> ChargeOutcome {
        let label = match outcome {
            ChargeOutcome::Backfilled => "backfilled",
            ChargeOutcome::AlreadyComplete => "already_complete",
            ChargeOutcome::Skipped => "skipped",
        };
        counter!("webhook_charge_total", "outcome" => label).increment(1);
        outcome
    }
}

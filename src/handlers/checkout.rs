//! `checkout.session.completed` processing.
//!
//! Records one payment transaction per completed session and transitions its
//! target (candidate to `confirmed`, roster entry to `paid`) exactly once.
//! Redelivery safety comes entirely from the payment table's unique
//! payment-intent constraint: the transition and notification run only when
//! this call created the row.

use std::sync::Arc;

use metrics::counter;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::domain::{
    CandidateId, CandidateStatus, FeeData, NewPayment, PaymentKind, PaymentMethod, PaymentTarget,
    RosterStatus, UserId, WeekendId,
};
use crate::error::{WebhookError, WebhookResult};
use crate::events::CheckoutSession;
use crate::notify::{notify_or_log, Notifier};
use crate::provider::PaymentProvider;
use crate::store::{PaymentStore, TargetStore};

/// What processing a checkout session amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// A new payment row was created and the target transitioned.
    Recorded,
    /// The payment was already on file; nothing was written.
    AlreadyRecorded,
    /// The session is not one of ours (unknown or missing price id).
    Ignored,
}

/// Handler for `checkout.session.completed` events.
pub struct CheckoutHandler {
    config: WebhookConfig,
    payments: Arc<dyn PaymentStore>,
    targets: Arc<dyn TargetStore>,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn Notifier>,
}

impl CheckoutHandler {
    pub fn new(
        config: WebhookConfig,
        payments: Arc<dyn PaymentStore>,
        targets: Arc<dyn TargetStore>,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            payments,
            targets,
            provider,
            notifier,
        }
    }

    /// Process one checkout session.
    pub async fn handle(&self, session: &CheckoutSession) -> WebhookResult<CheckoutOutcome> {
        let payment_intent_id = session
            .payment_intent
            .as_deref()
            .ok_or(WebhookError::MissingField("payment_intent"))?;

        let Some(price_id) = session.metadata.price_id.as_deref() else {
            tracing::warn!(session = %session.id, "checkout session has no price_id; ignoring");
            counter!("webhook_checkout_total", "outcome" => "ignored").increment(1);
            return Ok(CheckoutOutcome::Ignored);
        };

        let outcome = if price_id == self.config.candidate_fee_price_id {
            self.handle_candidate(session, payment_intent_id).await?
        } else if price_id == self.config.team_fee_price_id {
            self.handle_roster(session, payment_intent_id).await?
        } else {
            tracing::warn!(
                session = %session.id,
                price_id,
                "checkout session price_id not recognized; ignoring"
            );
            CheckoutOutcome::Ignored
        };

        let label = match outcome {
            CheckoutOutcome::Recorded => "recorded",
            CheckoutOutcome::AlreadyRecorded => "duplicate",
            CheckoutOutcome::Ignored => "ignored",
        };
        counter!("webhook_checkout_total", "outcome" => label).increment(1);
        Ok(outcome)
    }

    async fn handle_candidate(
        &self,
        session: &CheckoutSession,
        payment_intent_id: &str,
    ) -> WebhookResult<CheckoutOutcome> {
        let candidate_id = session
            .metadata
            .candidate_id
            .as_deref()
            .ok_or(WebhookError::MissingField("metadata.candidate_id"))?;
        let candidate_id = CandidateId(candidate_id.parse().map_err(|_| {
            WebhookError::InvalidPayload(format!("candidate_id is not an integer: {candidate_id}"))
        })?);

        let status = self
            .targets
            .candidate_status(candidate_id)
            .await?
            .ok_or_else(|| WebhookError::TargetNotFound {
                kind: "candidate",
                id: candidate_id.to_string(),
            })?;

        // A confirmed candidate means a previous delivery (or a manual entry)
        // already did the work; fall through so the insert resolves
        // idempotently instead of erroring.
        let needs_transition = match status {
            CandidateStatus::AwaitingPayment => true,
            CandidateStatus::Confirmed => false,
            CandidateStatus::Other(status) => {
                return Err(WebhookError::InvalidTargetState {
                    kind: "candidate",
                    id: candidate_id.to_string(),
                    status,
                });
            }
        };

        let payment = NewPayment {
            payment_intent_id: payment_intent_id.to_string(),
            target: PaymentTarget::Candidate(candidate_id),
            kind: PaymentKind::Fee,
            gross_amount: session.gross_amount(),
            payment_method: PaymentMethod::CreditCard,
            payment_owner: self.payment_owner(session, "sponsor"),
            notes: None,
            fees: self.try_fees(payment_intent_id).await,
        };

        let inserted = self.payments.insert_payment(payment).await?;
        if !inserted.was_created() {
            tracing::info!(
                payment_intent = payment_intent_id,
                candidate = %candidate_id,
                "candidate payment already recorded"
            );
            return Ok(CheckoutOutcome::AlreadyRecorded);
        }

        if needs_transition {
            self.targets.confirm_candidate(candidate_id).await?;
        }

        let amount = inserted.record().gross_amount;
        notify_or_log(
            "candidate_payment_received",
            self.notifier.candidate_payment_received(candidate_id, amount),
        )
        .await;

        tracing::info!(
            payment_intent = payment_intent_id,
            candidate = %candidate_id,
            amount = %amount,
            "candidate payment recorded"
        );
        Ok(CheckoutOutcome::Recorded)
    }

    async fn handle_roster(
        &self,
        session: &CheckoutSession,
        payment_intent_id: &str,
    ) -> WebhookResult<CheckoutOutcome> {
        let user_id = parse_uuid_field(&session.metadata.user_id, "metadata.user_id")?;
        let weekend_id = parse_uuid_field(&session.metadata.weekend_id, "metadata.weekend_id")?;
        let user_id = UserId(user_id);
        let weekend_id = WeekendId(weekend_id);

        let entry = self
            .targets
            .find_roster_entry(user_id, weekend_id)
            .await?
            .ok_or_else(|| WebhookError::TargetNotFound {
                kind: "roster entry",
                id: format!("user {user_id} weekend {weekend_id}"),
            })?;

        let needs_transition = match entry.status {
            RosterStatus::AwaitingPayment => true,
            RosterStatus::Paid => false,
            RosterStatus::Other(status) => {
                return Err(WebhookError::InvalidTargetState {
                    kind: "roster entry",
                    id: entry.id.to_string(),
                    status,
                });
            }
        };

        let payment = NewPayment {
            payment_intent_id: payment_intent_id.to_string(),
            target: PaymentTarget::Roster(entry.id),
            kind: PaymentKind::Fee,
            gross_amount: session.gross_amount(),
            payment_method: PaymentMethod::CreditCard,
            payment_owner: self.payment_owner(session, "team_member"),
            notes: None,
            fees: self.try_fees(payment_intent_id).await,
        };

        let inserted = self.payments.insert_payment(payment).await?;
        if !inserted.was_created() {
            tracing::info!(
                payment_intent = payment_intent_id,
                roster_entry = %entry.id,
                "roster payment already recorded"
            );
            return Ok(CheckoutOutcome::AlreadyRecorded);
        }

        if needs_transition {
            self.targets.mark_roster_paid(entry.id).await?;
        }

        let amount = inserted.record().gross_amount;
        notify_or_log(
            "team_payment_received",
            self.notifier.team_payment_received(user_id, weekend_id, amount),
        )
        .await;

        tracing::info!(
            payment_intent = payment_intent_id,
            roster_entry = %entry.id,
            amount = %amount,
            "roster payment recorded"
        );
        Ok(CheckoutOutcome::Recorded)
    }

    /// Try to fetch the fee breakdown at checkout time. The balance
    /// transaction is often not available yet, so any failure leaves the fee
    /// fields null for payout-time backfill.
    async fn try_fees(&self, payment_intent_id: &str) -> Option<FeeData> {
        match self.provider.get_transaction_data(payment_intent_id).await {
            Ok(data) => Some(FeeData {
                stripe_fee: data.stripe_fee,
                net_amount: data.net_amount,
                charge_id: data.charge_id,
                balance_transaction_id: data.balance_transaction_id,
            }),
            Err(e) => {
                tracing::debug!(
                    payment_intent = payment_intent_id,
                    error = %e,
                    "fee data not available at checkout; will backfill later"
                );
                None
            }
        }
    }

    fn payment_owner(&self, session: &CheckoutSession, default: &str) -> String {
        session
            .metadata
            .payment_owner
            .clone()
            .unwrap_or_else(|| default.to_string())
    }
}

fn parse_uuid_field(value: &Option<String>, field: &'static str) -> WebhookResult<Uuid> {
    let raw = value.as_deref().ok_or(WebhookError::MissingField(field))?;
    raw.parse()
        .map_err(|_| WebhookError::InvalidPayload(format!("{field} is not a UUID: {raw}")))
}

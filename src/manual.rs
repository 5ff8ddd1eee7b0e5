//! Manual payment entry.
//!
//! Cash and check payments never pass through the provider, so an admin
//! records them directly. Entries share the payment table and the target
//! transitions with webhook-recorded payments; a synthesized intent id keeps
//! the unique constraint meaningful and can never collide with a provider
//! `pi_...` id.

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{
    CandidateStatus, NewPayment, PaymentKind, PaymentMethod, PaymentTarget, PaymentTransaction,
    RosterStatus,
};
use crate::error::{WebhookError, WebhookResult};
use crate::store::{PaymentStore, TargetStore};

/// Input for a manually recorded payment.
#[derive(Debug, Clone)]
pub struct ManualPayment {
    pub target: PaymentTarget,
    /// Decimal dollars.
    pub amount: Decimal,
    /// Cash or check; card payments must come through the webhook.
    pub method: PaymentMethod,
    pub payment_owner: String,
    pub notes: Option<String>,
}

/// Records out-of-band payments.
pub struct ManualEntry {
    payments: Arc<dyn PaymentStore>,
    targets: Arc<dyn TargetStore>,
}

impl ManualEntry {
    pub fn new(payments: Arc<dyn PaymentStore>, targets: Arc<dyn TargetStore>) -> Self {
        Self { payments, targets }
    }

    /// Record a manual payment and transition its target.
    pub async fn record(&self, entry: ManualPayment) -> WebhookResult<PaymentTransaction> {
        if entry.method == PaymentMethod::CreditCard {
            return Err(WebhookError::InvalidPayload(
                "card payments are recorded by the webhook, not manually".to_string(),
            ));
        }

        let needs_transition = self.check_target(&entry.target).await?;

        let inserted = self
            .payments
            .insert_payment(NewPayment {
                payment_intent_id: format!("manual_{}", Uuid::new_v4()),
                target: entry.target,
                kind: PaymentKind::Fee,
                gross_amount: entry.amount,
                payment_method: entry.method,
                payment_owner: entry.payment_owner,
                notes: entry.notes,
                fees: None,
            })
            .await?;

        if needs_transition {
            match entry.target {
                PaymentTarget::Candidate(id) => self.targets.confirm_candidate(id).await?,
                PaymentTarget::Roster(id) => self.targets.mark_roster_paid(id).await?,
            }
        }

        tracing::info!(
            payment = %inserted.record().id,
            method = entry.method.as_str(),
            amount = %inserted.record().gross_amount,
            "manual payment recorded"
        );
        Ok(inserted.into_inner())
    }

    /// Validate the target exists and report whether it still needs its
    /// paid transition.
    async fn check_target(&self, target: &PaymentTarget) -> WebhookResult<bool> {
        match target {
            PaymentTarget::Candidate(id) => {
                let status = self.targets.candidate_status(*id).await?.ok_or_else(|| {
                    WebhookError::TargetNotFound {
                        kind: "candidate",
                        id: id.to_string(),
                    }
                })?;
                match status {
                    CandidateStatus::AwaitingPayment => Ok(true),
                    CandidateStatus::Confirmed => Ok(false),
                    CandidateStatus::Other(status) => Err(WebhookError::InvalidTargetState {
                        kind: "candidate",
                        id: id.to_string(),
                        status,
                    }),
                }
            }
            PaymentTarget::Roster(id) => {
                // Roster entries are addressed by id here, not (user, weekend);
                // the admin UI already resolved the pair.
                let status = self.targets.roster_status(*id).await?.ok_or_else(|| {
                    WebhookError::TargetNotFound {
                        kind: "roster entry",
                        id: id.to_string(),
                    }
                })?;
                match status {
                    RosterStatus::AwaitingPayment => Ok(true),
                    RosterStatus::Paid => Ok(false),
                    RosterStatus::Other(status) => Err(WebhookError::InvalidTargetState {
                        kind: "roster entry",
                        id: id.to_string(),
                        status,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CandidateId;
    use crate::memory::InMemoryStore;

    #[tokio::test]
    async fn records_cash_payment_and_confirms_candidate() {
        let store = Arc::new(InMemoryStore::new());
        store
            .seed_candidate(CandidateId(5), CandidateStatus::AwaitingPayment)
            .await;

        let entry = ManualEntry::new(store.clone(), store.clone());
        let payment = entry
            .record(ManualPayment {
                target: PaymentTarget::Candidate(CandidateId(5)),
                amount: Decimal::new(15000, 2),
                method: PaymentMethod::Cash,
                payment_owner: "sponsor".into(),
                notes: Some("paid at the office".into()),
            })
            .await
            .unwrap();

        assert!(payment.payment_intent_id.starts_with("manual_"));
        assert_eq!(
            store.candidate(CandidateId(5)).await,
            Some(CandidateStatus::Confirmed)
        );
    }

    #[tokio::test]
    async fn rejects_card_method() {
        let store = Arc::new(InMemoryStore::new());
        let entry = ManualEntry::new(store.clone(), store);

        let err = entry
            .record(ManualPayment {
                target: PaymentTarget::Candidate(CandidateId(5)),
                amount: Decimal::new(15000, 2),
                method: PaymentMethod::CreditCard,
                payment_owner: "sponsor".into(),
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn two_entries_get_distinct_ids() {
        let store = Arc::new(InMemoryStore::new());
        store
            .seed_candidate(CandidateId(5), CandidateStatus::AwaitingPayment)
            .await;
        let entry = ManualEntry::new(store.clone(), store.clone());

        let make = |notes: &str| ManualPayment {
            target: PaymentTarget::Candidate(CandidateId(5)),
            amount: Decimal::new(100, 2),
            method: PaymentMethod::Check,
            payment_owner: "sponsor".into(),
            notes: Some(notes.into()),
        };

        let first = entry.record(make("check 101")).await.unwrap();
        let second = entry.record(make("check 102")).await.unwrap();
        assert_ne!(first.payment_intent_id, second.payment_intent_id);
        assert_eq!(store.payment_count().await, 2);
    }
}

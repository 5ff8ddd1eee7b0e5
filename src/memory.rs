//! In-memory store implementation.
//!
//! Backs the store traits with `tokio::sync::RwLock`-guarded maps. Suitable
//! for tests and single-instance development; production deployments back
//! the same traits with a relational store whose unique constraints provide
//! the idempotency guarantees.
//!
//! Each insert takes the table's write lock for the whole check-then-insert,
//! which is the in-memory equivalent of a unique constraint: two concurrent
//! deliveries of the same event serialize on the lock and the loser observes
//! the winner's row.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    CandidateId, CandidateStatus, FeeData, MatchSpace, NewLink, NewPayment, NewPayout, PaymentId,
    PaymentTransaction, Payout, PayoutTransactionLink, RosterEntry, RosterId, RosterStatus,
    UserId, WeekendId,
};
use crate::store::{
    InsertOutcome, LinkStore, PaymentStore, PayoutStore, StoreError, TargetStore,
};

/// In-memory tables for payments, payouts, links, and targets.
#[derive(Default)]
pub struct InMemoryStore {
    /// Payment transactions keyed by payment-intent id (the unique key).
    payments: RwLock<HashMap<String, PaymentTransaction>>,
    /// Payouts keyed by external payout id.
    payouts: RwLock<HashMap<String, Payout>>,
    /// Links keyed by balance-transaction id.
    links: RwLock<HashMap<String, PayoutTransactionLink>>,
    /// Candidate statuses.
    candidates: RwLock<HashMap<CandidateId, CandidateStatus>>,
    /// Roster entries keyed by roster id.
    roster: RwLock<HashMap<RosterId, RosterEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Seeding and inspection helpers (used by tests and the dev binary)
    // ------------------------------------------------------------------

    /// Insert or replace a candidate record.
    pub async fn seed_candidate(&self, id: CandidateId, status: CandidateStatus) {
        self.candidates.write().await.insert(id, status);
    }

    /// Insert or replace a roster entry.
    pub async fn seed_roster_entry(&self, entry: RosterEntry) {
        self.roster.write().await.insert(entry.id, entry);
    }

    /// Number of payment rows.
    pub async fn payment_count(&self) -> usize {
        self.payments.read().await.len()
    }

    /// Number of payout rows.
    pub async fn payout_count(&self) -> usize {
        self.payouts.read().await.len()
    }

    /// Number of link rows.
    pub async fn link_count(&self) -> usize {
        self.links.read().await.len()
    }

    /// Fetch a payment by intent id regardless of target space.
    pub async fn payment_by_intent(&self, payment_intent_id: &str) -> Option<PaymentTransaction> {
        self.payments.read().await.get(payment_intent_id).cloned()
    }

    /// Fetch a link by balance-transaction id.
    pub async fn link_by_btxn(&self, balance_transaction_id: &str) -> Option<PayoutTransactionLink> {
        self.links.read().await.get(balance_transaction_id).cloned()
    }

    /// Current status of a candidate, for assertions.
    pub async fn candidate(&self, id: CandidateId) -> Option<CandidateStatus> {
        self.candidates.read().await.get(&id).cloned()
    }

    /// Current roster entry, for assertions.
    pub async fn roster_entry(&self, id: RosterId) -> Option<RosterEntry> {
        self.roster.read().await.get(&id).cloned()
    }

    async fn find_payment_in_space(
        &self,
        payment_intent_id: &str,
        space: MatchSpace,
    ) -> Option<PaymentTransaction> {
        let payments = self.payments.read().await;
        payments
            .get(payment_intent_id)
            .filter(|p| p.target.space() == space)
            .cloned()
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn find_candidate_payment(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<PaymentTransaction>, StoreError> {
        Ok(self
            .find_payment_in_space(payment_intent_id, MatchSpace::Candidate)
            .await)
    }

    async fn find_roster_payment(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<PaymentTransaction>, StoreError> {
        Ok(self
            .find_payment_in_space(payment_intent_id, MatchSpace::Roster)
            .await)
    }

    async fn insert_payment(
        &self,
        payment: NewPayment,
    ) -> Result<InsertOutcome<PaymentTransaction>, StoreError> {
        let mut payments = self.payments.write().await;

        if let Some(existing) = payments.get(&payment.payment_intent_id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        let (stripe_fee, net_amount, charge_id, balance_transaction_id) = match payment.fees {
            Some(fees) => (
                Some(fees.stripe_fee),
                Some(fees.net_amount),
                Some(fees.charge_id),
                Some(fees.balance_transaction_id),
            ),
            None => (None, None, None, None),
        };

        let row = PaymentTransaction {
            id: PaymentId::new(),
            payment_intent_id: payment.payment_intent_id.clone(),
            target: payment.target,
            kind: payment.kind,
            gross_amount: payment.gross_amount,
            stripe_fee,
            net_amount,
            charge_id,
            balance_transaction_id,
            payout_id: None,
            deposited_at: None,
            payment_method: payment.payment_method,
            payment_owner: payment.payment_owner,
            notes: payment.notes,
            created_at: Utc::now(),
        };

        payments.insert(payment.payment_intent_id, row.clone());
        Ok(InsertOutcome::Created(row))
    }

    async fn mark_deposited(
        &self,
        id: PaymentId,
        payout_id: &str,
        deposited_at: DateTime<Utc>,
    ) -> Result<PaymentTransaction, StoreError> {
        let mut payments = self.payments.write().await;
        let row = payments
            .values_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {id}")))?;

        row.payout_id = Some(payout_id.to_string());
        row.deposited_at = Some(deposited_at);
        Ok(row.clone())
    }

    async fn backfill_fees(
        &self,
        id: PaymentId,
        fees: &FeeData,
    ) -> Result<PaymentTransaction, StoreError> {
        let mut payments = self.payments.write().await;
        let row = payments
            .values_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {id}")))?;

        // Only-if-null: previously backfilled values are never overwritten.
        if row.stripe_fee.is_none() {
            row.stripe_fee = Some(fees.stripe_fee);
        }
        if row.net_amount.is_none() {
            row.net_amount = Some(fees.net_amount);
        }
        if row.charge_id.is_none() {
            row.charge_id = Some(fees.charge_id.clone());
        }
        if row.balance_transaction_id.is_none() {
            row.balance_transaction_id = Some(fees.balance_transaction_id.clone());
        }
        Ok(row.clone())
    }
}

#[async_trait]
impl PayoutStore for InMemoryStore {
    async fn find_payout(&self, payout_id: &str) -> Result<Option<Payout>, StoreError> {
        Ok(self.payouts.read().await.get(payout_id).cloned())
    }

    async fn payout_by_ref(&self, id: Uuid) -> Result<Option<Payout>, StoreError> {
        Ok(self
            .payouts
            .read()
            .await
            .values()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn insert_payout(&self, payout: NewPayout) -> Result<InsertOutcome<Payout>, StoreError> {
        let mut payouts = self.payouts.write().await;

        if let Some(existing) = payouts.get(&payout.payout_id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        let row = Payout {
            id: Uuid::new_v4(),
            payout_id: payout.payout_id.clone(),
            amount: payout.amount,
            currency: payout.currency,
            status: payout.status,
            arrival_date: payout.arrival_date,
            transaction_count: payout.transaction_count,
            created_at: Utc::now(),
        };

        payouts.insert(payout.payout_id, row.clone());
        Ok(InsertOutcome::Created(row))
    }
}

#[async_trait]
impl LinkStore for InMemoryStore {
    async fn insert_link(
        &self,
        link: NewLink,
    ) -> Result<InsertOutcome<PayoutTransactionLink>, StoreError> {
        let mut links = self.links.write().await;

        if let Some(existing) = links.get(&link.balance_transaction_id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        let row = PayoutTransactionLink {
            id: Uuid::new_v4(),
            payout_ref: link.payout_ref,
            payment_intent_id: link.payment_intent_id,
            charge_id: link.charge_id,
            balance_transaction_id: link.balance_transaction_id.clone(),
            gross_amount: link.gross_amount,
            stripe_fee: link.stripe_fee,
            net_amount: link.net_amount,
            candidate_payment_id: link.candidate_payment_id,
            roster_payment_id: link.roster_payment_id,
            created_at: Utc::now(),
        };

        links.insert(link.balance_transaction_id, row.clone());
        Ok(InsertOutcome::Created(row))
    }

    async fn unmatched_links(&self) -> Result<Vec<PayoutTransactionLink>, StoreError> {
        Ok(self
            .links
            .read()
            .await
            .values()
            .filter(|l| l.is_unmatched())
            .cloned()
            .collect())
    }

    async fn set_link_match(
        &self,
        id: Uuid,
        space: MatchSpace,
        payment: PaymentId,
    ) -> Result<(), StoreError> {
        let mut links = self.links.write().await;
        let row = links
            .values_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("link {id}")))?;

        match space {
            MatchSpace::Candidate => row.candidate_payment_id = Some(payment),
            MatchSpace::Roster => row.roster_payment_id = Some(payment),
        }
        Ok(())
    }
}

#[async_trait]
impl TargetStore for InMemoryStore {
    async fn candidate_status(
        &self,
        id: CandidateId,
    ) -> Result<Option<CandidateStatus>, StoreError> {
        Ok(self.candidates.read().await.get(&id).cloned())
    }

    async fn confirm_candidate(&self, id: CandidateId) -> Result<(), StoreError> {
        let mut candidates = self.candidates.write().await;
        let status = candidates
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("candidate {id}")))?;
        *status = CandidateStatus::Confirmed;
        Ok(())
    }

    async fn roster_status(&self, id: RosterId) -> Result<Option<RosterStatus>, StoreError> {
        Ok(self.roster.read().await.get(&id).map(|e| e.status.clone()))
    }

    async fn find_roster_entry(
        &self,
        user: UserId,
        weekend: WeekendId,
    ) -> Result<Option<RosterEntry>, StoreError> {
        Ok(self
            .roster
            .read()
            .await
            .values()
            .find(|e| e.user_id == user && e.weekend_id == weekend)
            .cloned())
    }

    async fn mark_roster_paid(&self, id: RosterId) -> Result<(), StoreError> {
        let mut roster = self.roster.write().await;
        let entry = roster
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("roster entry {id}")))?;
        entry.status = RosterStatus::Paid;
        Ok(())
    }
}

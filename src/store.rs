//! Durable store interfaces.
//!
//! The store is an external collaborator; this module defines the contracts
//! the handlers consume, with [`crate::memory`] providing a reference
//! implementation for tests and single-instance deployments.
//!
//! # Idempotency contract
//!
//! Every `insert_*` operation keyed by an external id must behave like
//! `INSERT ... ON CONFLICT DO NOTHING` followed by a read: a uniqueness
//! violation is converted into [`InsertOutcome::Existing`], never surfaced
//! as an error. The store's unique constraints are the only mutual-exclusion
//! mechanism in the subsystem; handlers hold no locks and may run in many
//! process instances concurrently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    CandidateId, CandidateStatus, FeeData, MatchSpace, NewLink, NewPayment, NewPayout, PaymentId,
    PaymentTransaction, Payout, PayoutTransactionLink, RosterEntry, RosterId, RosterStatus,
    UserId, WeekendId,
};

/// Store-level failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique constraint rejected the write. Implementations should
    /// normally fold this into [`InsertOutcome::Existing`] themselves; it is
    /// surfaced only for non-idempotent writes.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: &'static str },

    /// The referenced row does not exist.
    #[error("row not found: {0}")]
    NotFound(String),

    /// The store could not be reached or the query failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of an idempotent insert.
#[derive(Debug, Clone)]
pub enum InsertOutcome<T> {
    /// The row was created by this call.
    Created(T),
    /// A row with the same key already existed; this call wrote nothing.
    Existing(T),
}

impl<T> InsertOutcome<T> {
    /// Whether this call created the row.
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// The row, regardless of who created it.
    pub fn into_inner(self) -> T {
        match self {
            Self::Created(v) | Self::Existing(v) => v,
        }
    }

    /// Borrow the row.
    pub fn record(&self) -> &T {
        match self {
            Self::Created(v) | Self::Existing(v) => v,
        }
    }
}

/// Payment transaction table.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Find a candidate-fee payment by payment-intent id.
    async fn find_candidate_payment(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<PaymentTransaction>, StoreError>;

    /// Find a roster-fee payment by payment-intent id.
    async fn find_roster_payment(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<PaymentTransaction>, StoreError>;

    /// Insert a payment if no row with its payment-intent id exists.
    async fn insert_payment(
        &self,
        payment: NewPayment,
    ) -> Result<InsertOutcome<PaymentTransaction>, StoreError>;

    /// Record settlement linkage: `deposited_at` and `payout_id` are written
    /// unconditionally (a later payout event is authoritative for deposit
    /// timing).
    async fn mark_deposited(
        &self,
        id: PaymentId,
        payout_id: &str,
        deposited_at: DateTime<Utc>,
    ) -> Result<PaymentTransaction, StoreError>;

    /// Backfill fee fields. Implementations must write each field only if it
    /// is currently null; previously backfilled values are never
    /// overwritten.
    async fn backfill_fees(
        &self,
        id: PaymentId,
        fees: &FeeData,
    ) -> Result<PaymentTransaction, StoreError>;
}

/// Payout table.
#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Find a payout by its external id.
    async fn find_payout(&self, payout_id: &str) -> Result<Option<Payout>, StoreError>;

    /// Find a payout by its internal id.
    async fn payout_by_ref(&self, id: Uuid) -> Result<Option<Payout>, StoreError>;

    /// Insert a payout if no row with its external id exists.
    async fn insert_payout(&self, payout: NewPayout) -> Result<InsertOutcome<Payout>, StoreError>;
}

/// Payout transaction link table.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Insert a link if no row with its balance-transaction id exists.
    async fn insert_link(
        &self,
        link: NewLink,
    ) -> Result<InsertOutcome<PayoutTransactionLink>, StoreError>;

    /// Links that have not matched any payment yet. The sweep's work queue.
    async fn unmatched_links(&self) -> Result<Vec<PayoutTransactionLink>, StoreError>;

    /// Stamp a link with the payment it matched, in the given id space.
    async fn set_link_match(
        &self,
        id: Uuid,
        space: MatchSpace,
        payment: PaymentId,
    ) -> Result<(), StoreError>;
}

/// Candidate and roster target records (external collaborator state).
///
/// The core only reads current status and performs one transition per
/// first-time payment.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Current status of a candidate, or None if it does not exist.
    async fn candidate_status(
        &self,
        id: CandidateId,
    ) -> Result<Option<CandidateStatus>, StoreError>;

    /// Transition a candidate to `confirmed`.
    async fn confirm_candidate(&self, id: CandidateId) -> Result<(), StoreError>;

    /// Current status of a roster entry, or None if it does not exist.
    async fn roster_status(&self, id: RosterId) -> Result<Option<RosterStatus>, StoreError>;

    /// Look up the roster entry for a (user, weekend) pair.
    async fn find_roster_entry(
        &self,
        user: UserId,
        weekend: WeekendId,
    ) -> Result<Option<RosterEntry>, StoreError>;

    /// Transition a roster entry to `paid`.
    async fn mark_roster_paid(&self, id: RosterId) -> Result<(), StoreError>;
}

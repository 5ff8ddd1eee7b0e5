//! Domain records for payment ingestion and payout reconciliation.
//!
//! Currency amounts are decimal dollars (`rust_decimal::Decimal`); integer
//! cents exist only at the provider boundary and are converted exactly once
//! on the way in. The candidate and roster id spaces are distinct types so a
//! payment can never be matched across them by accident.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Internal id of a payment transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(pub Uuid);

impl PaymentId {
    /// Mint a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A sponsorship candidate. Integer id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateId(pub i64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A weekend roster entry. UUID id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RosterId(pub Uuid);

impl fmt::Display for RosterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A team member user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A weekend (event) id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekendId(pub Uuid);

impl fmt::Display for WeekendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Payment classification
// ============================================================================

/// What a payment pays for. Polymorphic reference with no store-level FK;
/// the tag keeps the two id spaces apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PaymentTarget {
    /// Sponsorship fee for a candidate.
    Candidate(CandidateId),
    /// Team fee for a weekend roster entry.
    Roster(RosterId),
}

impl PaymentTarget {
    /// The target's space, without the id.
    pub fn space(&self) -> MatchSpace {
        match self {
            Self::Candidate(_) => MatchSpace::Candidate,
            Self::Roster(_) => MatchSpace::Roster,
        }
    }
}

/// Which id space a payout transaction matched into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSpace {
    Candidate,
    Roster,
}

/// Fee vs refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Fee,
    Refund,
}

/// How the payment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    Cash,
    Check,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "credit_card",
            Self::Cash => "cash",
            Self::Check => "check",
        }
    }
}

// ============================================================================
// Payment transaction
// ============================================================================

/// Authoritative fee breakdown for a charged payment, used to backfill the
/// nullable settlement fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeData {
    pub stripe_fee: Decimal,
    pub net_amount: Decimal,
    pub charge_id: String,
    pub balance_transaction_id: String,
}

/// One row per successfully processed payment.
///
/// Created exactly once at checkout processing (or manual entry); the
/// settlement fields are mutated exactly once by payout reconciliation.
#[derive(Debug, Clone)]
pub struct PaymentTransaction {
    pub id: PaymentId,
    /// Provider payment-intent id. Globally unique; the idempotency key.
    pub payment_intent_id: String,
    pub target: PaymentTarget,
    pub kind: PaymentKind,
    /// Decimal dollars, converted from cents once at the boundary.
    pub gross_amount: Decimal,
    /// Null until backfilled from the provider's fee breakdown.
    pub stripe_fee: Option<Decimal>,
    /// Null until backfilled.
    pub net_amount: Option<Decimal>,
    pub charge_id: Option<String>,
    pub balance_transaction_id: Option<String>,
    /// External payout id, set when a payout settles this payment.
    pub payout_id: Option<String>,
    pub deposited_at: Option<DateTime<Utc>>,
    pub payment_method: PaymentMethod,
    pub payment_owner: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentTransaction {
    /// True once the fee breakdown has been recorded.
    pub fn has_fee_data(&self) -> bool {
        self.stripe_fee.is_some() && self.net_amount.is_some()
    }
}

/// Input for creating a payment transaction.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payment_intent_id: String,
    pub target: PaymentTarget,
    pub kind: PaymentKind,
    pub gross_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_owner: String,
    pub notes: Option<String>,
    /// Fee data if it was already available at creation time.
    pub fees: Option<FeeData>,
}

// ============================================================================
// Payout
// ============================================================================

/// One row per provider payout batch. Created once, never mutated.
#[derive(Debug, Clone)]
pub struct Payout {
    /// Internal id, referenced by payout transaction links.
    pub id: Uuid,
    /// External payout id. Unique; the idempotency key.
    pub payout_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub arrival_date: Option<DateTime<Utc>>,
    pub transaction_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a payout record.
#[derive(Debug, Clone)]
pub struct NewPayout {
    pub payout_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub arrival_date: Option<DateTime<Utc>>,
    pub transaction_count: u32,
}

// ============================================================================
// Payout transaction link
// ============================================================================

/// Audit row for one (payout, provider transaction) pair.
///
/// Recorded for every constituent transaction regardless of match outcome;
/// the unique `balance_transaction_id` makes redelivery a no-op, and rows
/// with neither matched reference set are the sweep's work queue.
#[derive(Debug, Clone)]
pub struct PayoutTransactionLink {
    pub id: Uuid,
    /// Internal id of the owning [`Payout`].
    pub payout_ref: Uuid,
    pub payment_intent_id: Option<String>,
    pub charge_id: String,
    /// Unique; the idempotency key.
    pub balance_transaction_id: String,
    pub gross_amount: Decimal,
    pub stripe_fee: Decimal,
    pub net_amount: Decimal,
    /// Set when the transaction matched a candidate-fee payment.
    pub candidate_payment_id: Option<PaymentId>,
    /// Set when the transaction matched a roster-fee payment.
    pub roster_payment_id: Option<PaymentId>,
    pub created_at: DateTime<Utc>,
}

impl PayoutTransactionLink {
    /// True when the transaction has not been tied to any payment yet.
    pub fn is_unmatched(&self) -> bool {
        self.candidate_payment_id.is_none() && self.roster_payment_id.is_none()
    }
}

/// Input for creating a payout transaction link.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub payout_ref: Uuid,
    pub payment_intent_id: Option<String>,
    pub charge_id: String,
    pub balance_transaction_id: String,
    pub gross_amount: Decimal,
    pub stripe_fee: Decimal,
    pub net_amount: Decimal,
    pub candidate_payment_id: Option<PaymentId>,
    pub roster_payment_id: Option<PaymentId>,
}

// ============================================================================
// Target state (external collaborator records)
// ============================================================================

/// Candidate lifecycle states the core cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateStatus {
    AwaitingPayment,
    Confirmed,
    /// Any other state; not payable.
    Other(String),
}

impl CandidateStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AwaitingPayment => "awaiting_payment",
            Self::Confirmed => "confirmed",
            Self::Other(s) => s,
        }
    }
}

/// Roster lifecycle states the core cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterStatus {
    AwaitingPayment,
    Paid,
    Other(String),
}

impl RosterStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AwaitingPayment => "awaiting_payment",
            Self::Paid => "paid",
            Self::Other(s) => s,
        }
    }
}

/// A weekend roster row, looked up by (user, weekend).
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub id: RosterId,
    pub user_id: UserId,
    pub weekend_id: WeekendId,
    pub status: RosterStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_spaces_are_distinct() {
        let candidate = PaymentTarget::Candidate(CandidateId(7));
        let roster = PaymentTarget::Roster(RosterId(Uuid::new_v4()));
        assert_eq!(candidate.space(), MatchSpace::Candidate);
        assert_eq!(roster.space(), MatchSpace::Roster);
        assert_ne!(candidate.space(), roster.space());
    }

    #[test]
    fn link_unmatched_until_either_ref_set() {
        let mut link = PayoutTransactionLink {
            id: Uuid::new_v4(),
            payout_ref: Uuid::new_v4(),
            payment_intent_id: Some("pi_1".into()),
            charge_id: "ch_1".into(),
            balance_transaction_id: "btxn_1".into(),
            gross_amount: Decimal::new(15000, 2),
            stripe_fee: Decimal::new(450, 2),
            net_amount: Decimal::new(14550, 2),
            candidate_payment_id: None,
            roster_payment_id: None,
            created_at: Utc::now(),
        };
        assert!(link.is_unmatched());

        link.candidate_payment_id = Some(PaymentId::new());
        assert!(!link.is_unmatched());
    }
}

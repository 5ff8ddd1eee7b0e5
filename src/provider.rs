//! Payment provider interface.
//!
//! The provider SDK itself is out of scope; handlers consume this trait and
//! the embedding application supplies a client. The trait methods mirror the
//! two calls reconciliation needs: the transaction list composing a payout,
//! and the authoritative fee breakdown for one payment intent (the
//! PaymentIntent → Charge → BalanceTransaction chain).
//!
//! Implementations convert wire amounts (integer cents) to decimal dollars
//! before returning; callers never divide.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// Provider call failures.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The API call failed (network, auth, rate limit).
    #[error("provider request failed: {0}")]
    Request(String),

    /// The data exists but is not available yet (e.g. a charge whose balance
    /// transaction has not been created). Expected shortly after checkout.
    #[error("provider data not ready: {0}")]
    NotReady(String),

    /// No client was wired in.
    #[error("provider client not configured")]
    NotConfigured,
}

/// Authoritative fee breakdown for one payment intent.
#[derive(Debug, Clone)]
pub struct TransactionData {
    pub gross_amount: Decimal,
    pub stripe_fee: Decimal,
    pub net_amount: Decimal,
    pub charge_id: String,
    pub balance_transaction_id: String,
}

/// One charge inside a payout's balance-transaction list.
#[derive(Debug, Clone)]
pub struct PayoutTransaction {
    pub charge_id: String,
    /// Absent for charges created outside the payment-intent flow.
    pub payment_intent_id: Option<String>,
    pub balance_transaction_id: String,
    pub gross_amount: Decimal,
    pub stripe_fee: Decimal,
    pub net_amount: Decimal,
}

/// Read-only client for the payment provider's API.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// List every charge transaction composing a payout. Pagination is the
    /// implementation's concern; callers see one logical fetch.
    async fn list_payout_transactions(
        &self,
        payout_id: &str,
    ) -> Result<Vec<PayoutTransaction>, ProviderError>;

    /// Fetch the fee breakdown for a payment intent. Fails with
    /// [`ProviderError::NotReady`] until the charge has a balance
    /// transaction (guaranteed within an hour of charging).
    async fn get_transaction_data(
        &self,
        payment_intent_id: &str,
    ) -> Result<TransactionData, ProviderError>;
}

/// Provider stub for deployments where no client is wired in. Every call
/// fails with [`ProviderError::NotConfigured`]; checkout processing still
/// works (fees stay null for later backfill) and payout events resolve to
/// the 200-with-warning path.
pub struct NoopProvider;

#[async_trait]
impl PaymentProvider for NoopProvider {
    async fn list_payout_transactions(
        &self,
        _payout_id: &str,
    ) -> Result<Vec<PayoutTransaction>, ProviderError> {
        Err(ProviderError::NotConfigured)
    }

    async fn get_transaction_data(
        &self,
        _payment_intent_id: &str,
    ) -> Result<TransactionData, ProviderError> {
        Err(ProviderError::NotConfigured)
    }
}

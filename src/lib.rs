//! Payment Recon - Stripe webhook ingestion and payout reconciliation
//!
//! This crate receives Stripe webhook events for a community organization's
//! fee payments and turns at-least-once deliveries into exactly-once
//! business effects.
//!
//! # Features
//!
//! - **Signature Verification**: HMAC-SHA256 over the raw body with replay
//!   protection and constant-time comparison
//! - **Checkout Ingestion**: `checkout.session.completed` records one
//!   payment per session and transitions its target exactly once
//! - **Payout Reconciliation**: `payout.paid` stamps deposit linkage,
//!   backfills fee data, and writes per-transaction audit links
//! - **Fee Backfill**: `charge.updated` closes the fee gap before the payout
//!   arrives
//! - **Reconciliation Sweep**: periodic re-matching of payout transactions
//!   whose checkout event arrived late
//! - **Manual Entry**: cash and check payments share the same table and
//!   transitions
//! - **Error Taxonomy**: 4xx terminal vs 5xx retryable, tuned for Stripe's
//!   redelivery behavior
//!
//! # Architecture
//!
//! ```text
//! Stripe ──▶ POST /webhooks/stripe
//!                  │
//!                  ▼
//!            ┌────────────┐     ┌─────────────┐
//!            │ Signature  │────▶│ Event parse │
//!            └────────────┘     └──────┬──────┘
//!                                      │
//!             ┌────────────────┬───────┴────────┐
//!             ▼                ▼                ▼
//!       ┌──────────┐    ┌──────────┐     ┌──────────┐
//!       │ Checkout │    │  Payout  │     │  Charge  │
//!       │ handler  │    │ handler  │     │ backfill │
//!       └────┬─────┘    └────┬─────┘     └────┬─────┘
//!            │               │                │
//!            └───────────────┼────────────────┘
//!                            ▼
//!                  PaymentStore / PayoutStore
//!                  LinkStore  / TargetStore
//!                            ▲
//!                            │
//!                      ┌──────────┐
//!                      │  Sweep   │ (periodic)
//!                      └──────────┘
//! ```
//!
//! Idempotency never relies on in-process state: the stores' unique
//! constraints (payment-intent id, payout id, balance-transaction id) are
//! the only mutual-exclusion mechanism, so any number of instances can
//! receive deliveries concurrently.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use payment_recon::config::WebhookConfig;
//! use payment_recon::memory::InMemoryStore;
//! use payment_recon::notify::NoopNotifier;
//! use payment_recon::provider::NoopProvider;
//! use payment_recon::webhook::{webhook_router, Stores, WebhookState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WebhookConfig::from_env()?;
//!
//!     let store = Arc::new(InMemoryStore::new());
//!     let stores = Stores {
//!         payments: store.clone(),
//!         payouts: store.clone(),
//!         links: store.clone(),
//!         targets: store,
//!     };
//!
//!     let state = Arc::new(WebhookState::new(
//!         config,
//!         stores,
//!         Arc::new(NoopProvider),
//!         Arc::new(NoopNotifier),
//!     ));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, webhook_router(state)).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod handlers;
pub mod manual;
pub mod memory;
pub mod notify;
pub mod provider;
pub mod signature;
pub mod store;
pub mod sweep;
pub mod webhook;

// Re-exports for convenience
pub use config::WebhookConfig;
pub use domain::{
    CandidateId, PaymentTarget, PaymentTransaction, Payout, PayoutTransactionLink, RosterId,
};
pub use error::{WebhookError, WebhookResult};
pub use events::{EventKind, WebhookEvent};
pub use handlers::{ChargeBackfill, CheckoutHandler, PayoutHandler, PayoutSummary};
pub use manual::{ManualEntry, ManualPayment};
pub use memory::InMemoryStore;
pub use notify::{Notifier, NoopNotifier};
pub use provider::{NoopProvider, PaymentProvider};
pub use signature::SignatureVerifier;
pub use store::{InsertOutcome, LinkStore, PaymentStore, PayoutStore, StoreError, TargetStore};
pub use sweep::Sweeper;
pub use webhook::{webhook_router, Stores, WebhookState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

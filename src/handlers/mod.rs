//! Event handlers for the payment webhook subsystem.
//!
//! One handler per event type the subsystem consumes:
//!
//! - [`checkout`] - `checkout.session.completed`: record the payment and
//!   transition its target
//! - [`payout`] - `payout.paid`: reconcile settled transactions against
//!   recorded payments
//! - [`charge`] - `charge.updated`: opportunistic fee backfill
//!
//! Handlers receive already-verified, already-parsed payloads and own the
//! business logic; HTTP concerns stay in [`crate::webhook`].

pub mod charge;
pub mod checkout;
pub mod payout;

pub use charge::{ChargeBackfill, ChargeOutcome};
pub use checkout::{CheckoutHandler, CheckoutOutcome};
pub use payout::{PayoutHandler, PayoutSummary};

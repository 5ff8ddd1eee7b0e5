//! Outbound notification interface.
//!
//! Notification is fire-and-forget: a failure here is logged and must never
//! fail the webhook, since payment correctness cannot depend on email
//! delivery. Handlers call through [`notify_or_log`] to enforce that.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{CandidateId, UserId, WeekendId};

/// Notification delivery failure.
#[derive(Error, Debug)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound email notification (external collaborator).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell the admin team a candidate's fee arrived.
    async fn candidate_payment_received(
        &self,
        candidate: CandidateId,
        amount: Decimal,
    ) -> Result<(), NotifyError>;

    /// Tell the weekend leadership a team member's fee arrived.
    async fn team_payment_received(
        &self,
        user: UserId,
        weekend: WeekendId,
        amount: Decimal,
    ) -> Result<(), NotifyError>;
}

/// Notifier that does nothing. Default for tests and deployments without an
/// email backend.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn candidate_payment_received(
        &self,
        _candidate: CandidateId,
        _amount: Decimal,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn team_payment_received(
        &self,
        _user: UserId,
        _weekend: WeekendId,
        _amount: Decimal,
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Run a notification future and swallow its error with a log line.
pub async fn notify_or_log<F>(what: &'static str, fut: F)
where
    F: std::future::Future<Output = Result<(), NotifyError>>,
{
    match fut.await {
        Ok(()) => tracing::info!(notification = what, "notification sent"),
        Err(e) => tracing::error!(
            notification = what,
            error = %e,
            "notification failed; webhook continues"
        ),
    }
}

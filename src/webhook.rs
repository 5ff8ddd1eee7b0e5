//! Axum handler and router for the payment webhook endpoint.
//!
//! The HTTP layer does three things: capture the exact raw bytes for
//! signature verification, map handler results onto the status codes that
//! drive Stripe's retry behavior, and keep every business decision inside
//! [`crate::handlers`].
//!
//! # Endpoint
//!
//! `POST /webhooks/stripe`
//!
//! Required headers:
//! - `stripe-signature`: timestamp and HMAC over the raw body
//! - `Content-Type: application/json`
//!
//! Events are processed synchronously before the response: a 200 means the
//! business effects are durably applied (or were already), so Stripe's
//! delivery log doubles as a processing log.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use metrics::counter;
use serde::Serialize;

use crate::config::WebhookConfig;
use crate::error::WebhookError;
use crate::events::{EventKind, WebhookEvent};
use crate::handlers::{
    ChargeBackfill, ChargeOutcome, CheckoutHandler, CheckoutOutcome, PayoutHandler, PayoutSummary,
};
use crate::notify::Notifier;
use crate::provider::PaymentProvider;
use crate::signature::SignatureVerifier;
use crate::store::{LinkStore, PaymentStore, PayoutStore, TargetStore};

/// Shared state for the webhook endpoint.
pub struct WebhookState {
    verifier: SignatureVerifier,
    checkout: CheckoutHandler,
    payout: PayoutHandler,
    charge: ChargeBackfill,
}

/// Store handles the webhook needs, typically all pointing at one backend.
#[derive(Clone)]
pub struct Stores {
    pub payments: Arc<dyn PaymentStore>,
    pub payouts: Arc<dyn PayoutStore>,
    pub links: Arc<dyn LinkStore>,
    pub targets: Arc<dyn TargetStore>,
}

impl WebhookState {
    /// Wire up the endpoint from configuration and collaborators.
    pub fn new(
        config: WebhookConfig,
        stores: Stores,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let verifier = SignatureVerifier::new(&config);
        let payout = PayoutHandler::new(
            provider.clone(),
            stores.payments.clone(),
            stores.payouts,
            stores.links,
            config.backfill_concurrency,
        );
        let charge = ChargeBackfill::new(provider.clone(), stores.payments.clone());
        let checkout = CheckoutHandler::new(
            config,
            stores.payments,
            stores.targets,
            provider,
            notifier,
        );

        Self {
            verifier,
            checkout,
            payout,
            charge,
        }
    }
}

/// Acknowledgment body returned to Stripe.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<PayoutSummary>,
}

impl WebhookResponse {
    fn acknowledged(event_id: &str) -> Self {
        Self {
            received: true,
            event_id: Some(event_id.to_string()),
            message: None,
            payout: None,
        }
    }

    fn with_message(event_id: &str, message: &str) -> Self {
        Self {
            received: true,
            event_id: Some(event_id.to_string()),
            message: Some(message.to_string()),
            payout: None,
        }
    }

    fn with_payout(event_id: &str, summary: PayoutSummary) -> Self {
        Self {
            received: true,
            event_id: Some(event_id.to_string()),
            message: None,
            payout: Some(summary),
        }
    }
}

/// Build the webhook router.
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhooks/stripe", post(webhook_handler))
        .with_state(state)
}

/// Main webhook entry point.
///
/// 1. Extracts the `stripe-signature` header
/// 2. Verifies the HMAC over the raw body
/// 3. Parses the event envelope
/// 4. Dispatches to the matching handler
/// 5. Returns 200 once effects are durable, 4xx/5xx per the error taxonomy
pub async fn webhook_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = match headers.get("stripe-signature") {
        Some(sig) => match sig.to_str() {
            Ok(s) => s,
            Err(_) => {
                return WebhookError::InvalidSignatureFormat(
                    "invalid header encoding".to_string(),
                )
                .into_response();
            }
        },
        None => return WebhookError::MissingSignature.into_response(),
    };

    if let Err(e) = state.verifier.verify(signature, &body) {
        counter!("webhook_rejected_total", "reason" => "signature").increment(1);
        return e.into_response();
    }

    let event = match WebhookEvent::from_bytes(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse webhook payload");
            counter!("webhook_rejected_total", "reason" => "payload").increment(1);
            return e.into_response();
        }
    };

    tracing::info!(
        event_id = %event.id,
        event_type = %event.event_type,
        livemode = event.livemode,
        "webhook received"
    );

    match &event.kind {
        EventKind::CheckoutCompleted(session) => {
            match state.checkout.handle(session).await {
                Ok(CheckoutOutcome::Recorded) => ok(WebhookResponse::acknowledged(&event.id)),
                Ok(CheckoutOutcome::AlreadyRecorded) => ok(WebhookResponse::with_message(
                    &event.id,
                    "payment already recorded",
                )),
                Ok(CheckoutOutcome::Ignored) => ok(WebhookResponse::with_message(
                    &event.id,
                    "event not applicable",
                )),
                Err(e) => fail(&event, e),
            }
        }
        EventKind::PayoutPaid(payout) => match state.payout.handle(payout).await {
            Ok(summary) => ok(WebhookResponse::with_payout(&event.id, summary)),
            Err(e) => fail(&event, e),
        },
        EventKind::ChargeUpdated(charge) => match state.charge.handle(charge).await {
            Ok(ChargeOutcome::Backfilled) => ok(WebhookResponse::acknowledged(&event.id)),
            Ok(_) => ok(WebhookResponse::with_message(&event.id, "no backfill needed")),
            Err(e) => fail(&event, e),
        },
        // Acknowledge anything else so Stripe stops redelivering it.
        EventKind::Unsupported => {
            tracing::debug!(event_type = %event.event_type, "unsupported event type acknowledged");
            ok(WebhookResponse::with_message(&event.id, "event type not handled"))
        }
    }
}

fn ok(body: WebhookResponse) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

fn fail(event: &WebhookEvent, err: WebhookError) -> Response {
    tracing::error!(
        event_id = %event.id,
        event_type = %event.event_type,
        error = %err,
        code = err.error_code(),
        retryable = err.should_retry(),
        "webhook processing failed"
    );
    counter!("webhook_failed_total", "code" => err.error_code()).increment(1);
    err.into_response()
}

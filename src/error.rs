//! Webhook error types with HTTP status mapping.
//!
//! The error taxonomy drives Stripe's retry behavior: 4xx responses are
//! terminal (Stripe gives up after its schedule), 5xx responses are retried.
//! Idempotency makes retries of partially-applied events safe, so the only
//! errors mapped to 5xx are those where redelivery can actually help.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Errors produced while receiving and processing webhook deliveries.
#[derive(Error, Debug)]
pub enum WebhookError {
    // Configuration (500)
    /// Required signing secret is not configured.
    #[error("STRIPE_WEBHOOK_SECRET environment variable not set")]
    MissingSecret,

    /// Required configuration value is missing or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Signature (400)
    /// The stripe-signature header is absent.
    #[error("missing stripe-signature header")]
    MissingSignature,

    /// The stripe-signature header could not be parsed.
    #[error("invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    /// HMAC comparison failed.
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    /// Signed timestamp is outside the replay window.
    #[error("webhook timestamp too old: {age_seconds}s (max {max_age_seconds}s)")]
    TimestampTooOld {
        age_seconds: i64,
        max_age_seconds: i64,
    },

    /// Signed timestamp is ahead of the local clock.
    #[error("webhook timestamp in future by {drift_seconds}s")]
    TimestampInFuture { drift_seconds: i64 },

    // Payload (400)
    /// The request body is not a valid event envelope.
    #[error("failed to parse event payload: {0}")]
    InvalidPayload(String),

    /// A field the handler requires is absent from the event.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    // Business preconditions (400). Stripe retries will not help until the
    // underlying condition is fixed, but nothing was written so they are
    // harmless.
    /// The payment target does not exist.
    #[error("{kind} not found: {id}")]
    TargetNotFound { kind: &'static str, id: String },

    /// The payment target exists but is not in a payable state.
    #[error("{kind} {id} not payable (status: {status})")]
    InvalidTargetState {
        kind: &'static str,
        id: String,
        status: String,
    },

    // Downstream collaborators (500 — retryable)
    /// Durable store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Payment provider API call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias for webhook operations.
pub type WebhookResult<T> = std::result::Result<T, WebhookError>;

impl WebhookError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingSignature
            | Self::InvalidSignatureFormat(_)
            | Self::SignatureVerificationFailed
            | Self::TimestampTooOld { .. }
            | Self::TimestampInFuture { .. }
            | Self::InvalidPayload(_)
            | Self::MissingField(_)
            | Self::TargetNotFound { .. }
            | Self::InvalidTargetState { .. } => StatusCode::BAD_REQUEST,

            Self::MissingSecret
            | Self::InvalidConfig(_)
            | Self::Store(_)
            | Self::Provider(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether Stripe should redeliver the event after this response.
    pub fn should_retry(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Stable code for logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingSecret => "MISSING_SECRET",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::MissingSignature => "MISSING_SIGNATURE",
            Self::InvalidSignatureFormat(_) => "INVALID_SIGNATURE_FORMAT",
            Self::SignatureVerificationFailed => "SIGNATURE_VERIFICATION_FAILED",
            Self::TimestampTooOld { .. } => "TIMESTAMP_TOO_OLD",
            Self::TimestampInFuture { .. } => "TIMESTAMP_IN_FUTURE",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::MissingField(_) => "MISSING_FIELD",
            Self::TargetNotFound { .. } => "TARGET_NOT_FOUND",
            Self::InvalidTargetState { .. } => "INVALID_TARGET_STATE",
            Self::Store(_) => "STORE_ERROR",
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Error body returned to Stripe.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Internal details stay out of the response body.
        let error = match &self {
            Self::MissingSecret
            | Self::InvalidConfig(_)
            | Self::Store(_)
            | Self::Provider(_)
            | Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        (status, Json(ErrorBody { error, code })).into_response()
    }
}

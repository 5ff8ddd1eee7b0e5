//! Stripe webhook signature verification.
//!
//! The `stripe-signature` header carries a unix timestamp and an HMAC-SHA256
//! signature over `{timestamp}.{raw body}`:
//!
//! ```text
//! t=1614556800,v1=abcdef123456...
//! ```
//!
//! Verification is a total function over the header and body: it returns a
//! typed rejection rather than panicking or throwing, and the comparison is
//! constant-time so an attacker cannot learn the expected signature from
//! response timing.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::WebhookConfig;
use crate::error::{WebhookError, WebhookResult};

type HmacSha256 = Hmac<Sha256>;

/// Components parsed out of a `stripe-signature` header.
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Unix timestamp the payload was signed at.
    pub timestamp: i64,
    /// Raw bytes of the v1 signature.
    pub signature: Vec<u8>,
}

/// Verifies webhook signatures against the shared signing secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
    max_age: Duration,
    max_drift: Duration,
}

impl SignatureVerifier {
    /// Build a verifier from configuration.
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            secret: config.webhook_secret().as_bytes().to_vec(),
            max_age: config.max_timestamp_age,
            max_drift: config.max_clock_drift,
        }
    }

    /// Verify a delivery.
    ///
    /// `payload` must be the exact bytes received; any re-serialization
    /// invalidates the signature.
    pub fn verify(&self, signature_header: &str, payload: &[u8]) -> WebhookResult<ParsedSignature> {
        let parsed = parse_signature_header(signature_header)?;
        self.validate_timestamp(parsed.timestamp)?;

        let expected = self.compute(parsed.timestamp, payload)?;
        if !constant_time_eq(&parsed.signature, &expected) {
            tracing::warn!(
                timestamp = parsed.timestamp,
                "webhook signature verification failed"
            );
            return Err(WebhookError::SignatureVerificationFailed);
        }

        Ok(parsed)
    }

    fn validate_timestamp(&self, timestamp: i64) -> WebhookResult<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| WebhookError::Internal(e.to_string()))?
            .as_secs() as i64;

        let age = now - timestamp;
        let max_age = self.max_age.as_secs() as i64;

        if age > max_age {
            return Err(WebhookError::TimestampTooOld {
                age_seconds: age,
                max_age_seconds: max_age,
            });
        }
        if age < -(self.max_drift.as_secs() as i64) {
            return Err(WebhookError::TimestampInFuture {
                drift_seconds: -age,
            });
        }
        Ok(())
    }

    fn compute(&self, timestamp: i64, payload: &[u8]) -> WebhookResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| WebhookError::Internal(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Produce a valid header value for `payload` at `timestamp`. Test helper.
    #[doc(hidden)]
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let digest = self
            .compute(timestamp, payload)
            .expect("HMAC accepts any key length");
        format!("t={},v1={}", timestamp, hex::encode(digest))
    }
}

/// Parse `t=...,v1=...` into its components.
///
/// Unknown scheme versions (v0 etc.) are ignored for forward compatibility.
fn parse_signature_header(header: &str) -> WebhookResult<ParsedSignature> {
    let mut timestamp: Option<i64> = None;
    let mut signature: Option<Vec<u8>> = None;

    for part in header.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("t=") {
            timestamp = Some(value.parse::<i64>().map_err(|_| {
                WebhookError::InvalidSignatureFormat("invalid timestamp".to_string())
            })?);
        } else if let Some(value) = part.strip_prefix("v1=") {
            let bytes = hex::decode(value).map_err(|_| {
                WebhookError::InvalidSignatureFormat("signature is not valid hex".to_string())
            })?;
            signature = Some(bytes);
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| WebhookError::InvalidSignatureFormat("missing timestamp (t=)".into()))?;
    let signature = signature
        .ok_or_else(|| WebhookError::InvalidSignatureFormat("missing v1 signature".into()))?;

    Ok(ParsedSignature {
        timestamp,
        signature,
    })
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

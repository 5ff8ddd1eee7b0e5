//! Webhook configuration.
//!
//! All secrets come from environment variables; nothing is read from disk.

use std::env;
use std::time::Duration;

use crate::error::{WebhookError, WebhookResult};

/// Default replay window for signed timestamps (Stripe recommends 5 minutes).
const DEFAULT_MAX_TIMESTAMP_AGE: Duration = Duration::from_secs(300);

/// Default tolerance for future timestamps (clock skew).
const DEFAULT_MAX_CLOCK_DRIFT: Duration = Duration::from_secs(60);

/// Default cap on concurrent fee-backfill lookups per payout event.
const DEFAULT_BACKFILL_CONCURRENCY: usize = 4;

/// Default interval for the unmatched-link reconciliation sweep.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Configuration for webhook verification and payout reconciliation.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Webhook signing secret (whsec_...). Never log this value.
    webhook_secret: String,

    /// Stripe price id that identifies a candidate sponsorship fee.
    pub candidate_fee_price_id: String,

    /// Stripe price id that identifies a team roster fee.
    pub team_fee_price_id: String,

    /// Maximum age for signed timestamps (replay protection).
    pub max_timestamp_age: Duration,

    /// Maximum allowed clock drift for future timestamps.
    pub max_clock_drift: Duration,

    /// Cap on concurrent per-transaction provider lookups in the payout
    /// handler.
    pub backfill_concurrency: usize,

    /// How often the reconciliation sweep runs. Zero disables it.
    pub sweep_interval: Duration,
}

impl WebhookConfig {
    /// Create a configuration with the required values and defaults for the
    /// rest.
    pub fn new(
        webhook_secret: impl Into<String>,
        candidate_fee_price_id: impl Into<String>,
        team_fee_price_id: impl Into<String>,
    ) -> WebhookResult<Self> {
        let webhook_secret = webhook_secret.into();
        Self::validate_secret(&webhook_secret)?;

        Ok(Self {
            webhook_secret,
            candidate_fee_price_id: candidate_fee_price_id.into(),
            team_fee_price_id: team_fee_price_id.into(),
            max_timestamp_age: DEFAULT_MAX_TIMESTAMP_AGE,
            max_clock_drift: DEFAULT_MAX_CLOCK_DRIFT,
            backfill_concurrency: DEFAULT_BACKFILL_CONCURRENCY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        })
    }

    /// Load configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `STRIPE_WEBHOOK_SECRET` (required): signing secret (whsec_...)
    /// - `CANDIDATE_FEE_PRICE_ID` (required): price id for candidate fees
    /// - `TEAM_FEE_PRICE_ID` (required): price id for team roster fees
    /// - `WEBHOOK_MAX_TIMESTAMP_AGE` (optional): replay window in seconds
    /// - `WEBHOOK_BACKFILL_CONCURRENCY` (optional): per-payout lookup cap
    /// - `WEBHOOK_SWEEP_INTERVAL` (optional): sweep period in seconds, 0 off
    pub fn from_env() -> WebhookResult<Self> {
        let webhook_secret =
            env::var("STRIPE_WEBHOOK_SECRET").map_err(|_| WebhookError::MissingSecret)?;
        let candidate_fee_price_id = env::var("CANDIDATE_FEE_PRICE_ID")
            .map_err(|_| WebhookError::InvalidConfig("CANDIDATE_FEE_PRICE_ID not set".into()))?;
        let team_fee_price_id = env::var("TEAM_FEE_PRICE_ID")
            .map_err(|_| WebhookError::InvalidConfig("TEAM_FEE_PRICE_ID not set".into()))?;

        let mut config = Self::new(webhook_secret, candidate_fee_price_id, team_fee_price_id)?;

        if let Some(age) = env_seconds("WEBHOOK_MAX_TIMESTAMP_AGE") {
            config.max_timestamp_age = age;
        }
        if let Some(n) = env::var("WEBHOOK_BACKFILL_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            config.backfill_concurrency = n.max(1);
        }
        if let Some(interval) = env_seconds("WEBHOOK_SWEEP_INTERVAL") {
            config.sweep_interval = interval;
        }

        Ok(config)
    }

    fn validate_secret(secret: &str) -> WebhookResult<()> {
        if secret.is_empty() {
            return Err(WebhookError::InvalidConfig("secret cannot be empty".into()));
        }
        if secret.len() < 20 {
            return Err(WebhookError::InvalidConfig(
                "secret too short (minimum 20 characters)".into(),
            ));
        }
        if !secret.starts_with("whsec_") {
            tracing::warn!("webhook secret does not start with 'whsec_' - may be invalid");
        }
        Ok(())
    }

    /// The signing secret. Never log this value.
    pub(crate) fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }
}

fn env_seconds(var: &str) -> Option<Duration> {
    env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

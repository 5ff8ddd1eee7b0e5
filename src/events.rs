//! Typed webhook event envelope and payloads.
//!
//! Deserialization happens after signature verification, from the exact
//! signed bytes. Unknown event types parse into [`EventKind::Unsupported`]
//! so the endpoint can acknowledge them with a 200 instead of inducing
//! endless provider retries.
//!
//! This module is the cents boundary: every amount arriving from the wire is
//! integer minor units and is converted to decimal dollars here, exactly
//! once.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::error::{WebhookError, WebhookResult};

/// Convert integer cents into decimal dollars. The only place division by
/// 100 happens.
pub fn cents_to_dollars(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Convert unix seconds into a UTC timestamp, discarding invalid values.
pub fn unix_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// A verified, parsed webhook event.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    /// Provider event id (evt_...).
    pub id: String,
    /// Raw event type string, kept for logging.
    pub event_type: String,
    pub livemode: bool,
    pub kind: EventKind,
}

/// Discriminated event payload.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// `checkout.session.completed`
    CheckoutCompleted(CheckoutSession),
    /// `payout.paid`
    PayoutPaid(PayoutEvent),
    /// `charge.updated`
    ChargeUpdated(ChargeEvent),
    /// Anything else; acknowledged and ignored.
    Unsupported,
}

impl WebhookEvent {
    /// Parse the signed body into a typed event.
    pub fn from_bytes(body: &[u8]) -> WebhookResult<Self> {
        let raw: RawEvent = serde_json::from_slice(body)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

        let kind = match raw.event_type.as_str() {
            "checkout.session.completed" => {
                let session: CheckoutSession = serde_json::from_value(raw.data.object)
                    .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
                EventKind::CheckoutCompleted(session)
            }
            "payout.paid" => {
                let payout: PayoutEvent = serde_json::from_value(raw.data.object)
                    .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
                EventKind::PayoutPaid(payout)
            }
            "charge.updated" => {
                let charge: ChargeEvent = serde_json::from_value(raw.data.object)
                    .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
                EventKind::ChargeUpdated(charge)
            }
            _ => EventKind::Unsupported,
        };

        Ok(Self {
            id: raw.id,
            event_type: raw.event_type,
            livemode: raw.livemode,
            kind,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    livemode: bool,
    data: RawData,
}

#[derive(Debug, Deserialize)]
struct RawData {
    object: serde_json::Value,
}

/// `checkout.session.completed` payload fields the handler needs.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Payment-intent id; expandable in the provider's schema.
    #[serde(default, deserialize_with = "expandable_id")]
    pub payment_intent: Option<String>,
    /// Total in cents.
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl CheckoutSession {
    /// Gross amount in decimal dollars.
    pub fn gross_amount(&self) -> Decimal {
        self.amount_total.map(cents_to_dollars).unwrap_or_default()
    }
}

/// Checkout session metadata set by the payment-intent creation flow.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionMetadata {
    pub price_id: Option<String>,
    pub candidate_id: Option<String>,
    pub user_id: Option<String>,
    pub weekend_id: Option<String>,
    pub payment_owner: Option<String>,
}

/// `payout.paid` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PayoutEvent {
    /// External payout id (po_...).
    pub id: String,
    /// Amount in cents.
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_payout_status")]
    pub status: String,
    /// Unix seconds; nullable.
    pub arrival_date: Option<i64>,
}

impl PayoutEvent {
    /// Payout amount in decimal dollars.
    pub fn amount_dollars(&self) -> Decimal {
        cents_to_dollars(self.amount)
    }

    /// Arrival date as a timestamp, if present and valid.
    pub fn arrival_datetime(&self) -> Option<DateTime<Utc>> {
        self.arrival_date.and_then(unix_to_datetime)
    }
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_payout_status() -> String {
    "paid".to_string()
}

/// `charge.updated` payload fields the backfill handler needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeEvent {
    /// Charge id (ch_...).
    pub id: String,
    #[serde(default, deserialize_with = "expandable_id")]
    pub payment_intent: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub balance_transaction: Option<String>,
}

/// Accept either a bare id string or an expanded object carrying an `id`
/// field, which is how the provider serializes expandable references.
fn expandable_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Object(map)) => map
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_owned),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_conversion_is_exact() {
        assert_eq!(cents_to_dollars(4200).to_string(), "42.00");
        assert_eq!(cents_to_dollars(15000).to_string(), "150.00");
        assert_eq!(cents_to_dollars(1).to_string(), "0.01");
        assert_eq!(cents_to_dollars(0).to_string(), "0.00");
    }

    #[test]
    fn parses_checkout_event() {
        let body = br#"{
            "id": "evt_1",
            "type": "checkout.session.completed",
            "livemode": false,
            "data": {
                "object": {
                    "id": "cs_1",
                    "payment_intent": "pi_1",
                    "amount_total": 15000,
                    "metadata": {
                        "price_id": "price_candidate",
                        "candidate_id": "42",
                        "payment_owner": "sponsor"
                    }
                }
            }
        }"#;

        let event = WebhookEvent::from_bytes(body).unwrap();
        assert_eq!(event.id, "evt_1");
        let EventKind::CheckoutCompleted(session) = event.kind else {
            panic!("expected checkout event");
        };
        assert_eq!(session.payment_intent.as_deref(), Some("pi_1"));
        assert_eq!(session.gross_amount().to_string(), "150.00");
        assert_eq!(session.metadata.candidate_id.as_deref(), Some("42"));
    }

    #[test]
    fn parses_expanded_payment_intent_object() {
        let body = br#"{
            "id": "evt_2",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_2",
                    "payment_intent": {"id": "pi_2", "amount": 5000},
                    "amount_total": 5000
                }
            }
        }"#;

        let event = WebhookEvent::from_bytes(body).unwrap();
        let EventKind::CheckoutCompleted(session) = event.kind else {
            panic!("expected checkout event");
        };
        assert_eq!(session.payment_intent.as_deref(), Some("pi_2"));
    }

    #[test]
    fn parses_payout_event() {
        let body = br#"{
            "id": "evt_3",
            "type": "payout.paid",
            "data": {
                "object": {
                    "id": "po_1",
                    "amount": 123456,
                    "currency": "usd",
                    "status": "paid",
                    "arrival_date": 1700000000
                }
            }
        }"#;

        let event = WebhookEvent::from_bytes(body).unwrap();
        let EventKind::PayoutPaid(payout) = event.kind else {
            panic!("expected payout event");
        };
        assert_eq!(payout.amount_dollars().to_string(), "1234.56");
        assert!(payout.arrival_datetime().is_some());
    }

    #[test]
    fn unknown_event_type_is_unsupported() {
        let body = br#"{
            "id": "evt_4",
            "type": "invoice.finalized",
            "data": {"object": {"id": "in_1"}}
        }"#;

        let event = WebhookEvent::from_bytes(body).unwrap();
        assert!(matches!(event.kind, EventKind::Unsupported));
        assert_eq!(event.event_type, "invoice.finalized");
    }

    #[test]
    fn rejects_non_json_body() {
        assert!(matches!(
            WebhookEvent::from_bytes(b"not json"),
            Err(WebhookError::InvalidPayload(_))
        ));
    }

    #[test]
    fn missing_metadata_defaults_empty() {
        let body = br#"{
            "id": "evt_5",
            "type": "checkout.session.completed",
            "data": {"object": {"id": "cs_5", "amount_total": null}}
        }"#;

        let event = WebhookEvent::from_bytes(body).unwrap();
        let EventKind::CheckoutCompleted(session) = event.kind else {
            panic!("expected checkout event");
        };
        assert!(session.metadata.price_id.is_none());
        assert_eq!(session.gross_amount(), Decimal::ZERO);
    }
}

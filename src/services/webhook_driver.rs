//! Provider callback (webhook) driver.
//!
//! Translates an inbound provider callback into a ledger `finalize` call.
//!
//! # Authentication
//!
//! The provider signs `amount_cents`, `currency` and `special_reference`
//! (concatenated in sorted key order) with HMAC-SHA512 and sends the hex
//! digest in the `HMAC` header or the `hmac` query parameter. The digest is
//! checked in constant time before anything else happens; a bad digest is a
//! security event and never reaches the ledger.
//!
//! The order id itself is not signed. A signed callback is only applied to
//! the payment whose id is the `special_reference` and whose recorded amount
//! and currency are the signed ones, so a valid digest cannot be replayed
//! against another order.
//!
//! # Payload Shapes
//!
//! Depending on the provider API version the order id arrives as
//! `obj.order.id`, `order.id` or `order_id`. The signed fields and the
//! `success` flag are read from the top level or from `obj`, as strings,
//! numbers or booleans.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha512;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::payment::{Payment, PaymentOutcome};
use crate::services::ledger::{FinalizeResult, PaymentLedger};

type HmacSha512 = Hmac<Sha512>;

/// Fields extracted from a callback body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackPayload {
    pub order_id: Option<String>,
    pub success: Option<bool>,
    pub pending: bool,
    /// Raw textual form, exactly as signed.
    pub amount_cents: Option<String>,
    pub currency: Option<String>,
    pub special_reference: Option<String>,
}

/// What the driver did with an authenticated callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAck {
    Applied(FinalizeResult),
    /// Provider reports the transaction as still settling; nothing to apply.
    StillPending,
}

/// Render a JSON scalar the way it appears in the signed string.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Top level first, then the transaction object.
fn lookup<'a>(body: &'a Value, name: &str) -> Option<&'a Value> {
    body.get(name)
        .filter(|v| !v.is_null())
        .or_else(|| body.get("obj").and_then(|o| o.get(name)).filter(|v| !v.is_null()))
}

impl CallbackPayload {
    pub fn from_value(body: &Value) -> Self {
        let obj = body.get("obj");

        let order_id = obj
            .and_then(|o| o.get("order"))
            .and_then(|order| order.get("id"))
            .and_then(scalar_text)
            .or_else(|| {
                body.get("order")
                    .and_then(|order| order.get("id"))
                    .and_then(scalar_text)
            })
            .or_else(|| body.get("order_id").and_then(scalar_text));

        let special_reference = lookup(body, "special_reference").and_then(scalar_text).or_else(|| {
            obj.and_then(|o| o.get("order"))
                .and_then(|order| order.get("merchant_order_id"))
                .and_then(scalar_text)
        });

        Self {
            order_id,
            success: lookup(body, "success").and_then(scalar_bool),
            pending: lookup(body, "pending").and_then(scalar_bool).unwrap_or(false),
            amount_cents: lookup(body, "amount_cents").and_then(scalar_text),
            currency: lookup(body, "currency").and_then(scalar_text),
            special_reference,
        }
    }

    /// The string the provider signs.
    fn signed_message(&self) -> String {
        // Keys in sorted order: amount_cents, currency, special_reference.
        [
            self.amount_cents.as_deref(),
            self.currency.as_deref(),
            self.special_reference.as_deref(),
        ]
        .into_iter()
        .map(|v| v.unwrap_or(""))
        .collect()
    }
}

fn mac_for(secret: &str, payload: &CallbackPayload) -> HmacSha512 {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(payload.signed_message().as_bytes());
    mac
}

/// Hex HMAC-SHA512 of a payload's signed fields.
pub fn sign_callback(secret: &str, payload: &CallbackPayload) -> String {
    hex::encode(mac_for(secret, payload).finalize().into_bytes())
}

/// Constant-time check of a hex digest against the payload.
pub fn verify_signature(secret: &str, payload: &CallbackPayload, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    mac_for(secret, payload).verify_slice(&expected).is_ok()
}

/// Check that the signed fields belong to `payment`.
///
/// `special_reference` must be the payment id and the signed amount and
/// currency must equal the recorded ones. Returns the first mismatching field.
pub fn check_binding(payload: &CallbackPayload, payment: &Payment) -> Result<(), &'static str> {
    let reference_matches = payload
        .special_reference
        .as_deref()
        .and_then(|r| Uuid::parse_str(r.trim()).ok())
        == Some(payment.id);
    if !reference_matches {
        return Err("special_reference");
    }

    let amount_matches = payload
        .amount_cents
        .as_deref()
        .and_then(|a| a.trim().parse::<i64>().ok())
        == Some(payment.amount_cents);
    if !amount_matches {
        return Err("amount_cents");
    }

    let currency_matches = payload
        .currency
        .as_deref()
        .is_some_and(|c| c.eq_ignore_ascii_case(&payment.currency));
    if !currency_matches {
        return Err("currency");
    }

    Ok(())
}

pub struct WebhookDriver {
    ledger: Arc<PaymentLedger>,
    hmac_secret: String,
}

impl WebhookDriver {
    pub fn new(ledger: Arc<PaymentLedger>, hmac_secret: String) -> Self {
        Self {
            ledger,
            hmac_secret,
        }
    }

    /// Authenticate a callback and apply it to the ledger.
    ///
    /// # Errors
    ///
    /// - `InvalidSignature`: HMAC missing or wrong, or the signed reference,
    ///   amount or currency do not match the named payment (nothing is mutated)
    /// - `InvalidRequest`: no order id or no success flag in the payload
    /// - `PaymentNotFound`: unknown order id
    pub async fn handle(
        &self,
        signature: Option<&str>,
        body: &Value,
    ) -> Result<CallbackAck, AppError> {
        let payload = CallbackPayload::from_value(body);

        let authentic = signature
            .map(|sig| verify_signature(&self.hmac_secret, &payload, sig))
            .unwrap_or(false);
        if !authentic {
            tracing::warn!(
                order_id = payload.order_id.as_deref().unwrap_or("-"),
                signature_present = signature.is_some(),
                "rejected provider callback with invalid HMAC"
            );
            return Err(AppError::InvalidSignature);
        }

        let order_id = payload
            .order_id
            .as_deref()
            .ok_or_else(|| AppError::InvalidRequest("Callback has no order id".to_string()))?;

        // The order id is not signed; the signed fields must describe the
        // payment it names.
        let payment = self.ledger.payment(order_id).await?;
        if let Err(mismatch) = check_binding(&payload, &payment) {
            tracing::warn!(
                order_id,
                mismatch,
                "rejected signed callback that does not match its payment"
            );
            return Err(AppError::InvalidSignature);
        }

        if payload.pending {
            tracing::info!(order_id, "callback reports transaction still pending");
            return Ok(CallbackAck::StillPending);
        }

        let success = payload
            .success
            .ok_or_else(|| AppError::InvalidRequest("Callback has no success flag".to_string()))?;

        let result = self
            .ledger
            .finalize(
                order_id,
                PaymentOutcome::from_success(success),
                // Amount and currency were checked against the record above.
                None,
                None,
            )
            .await?;

        tracing::info!(order_id, ?result, "provider callback processed");
        Ok(CallbackAck::Applied(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_id_is_found_in_every_payload_shape() {
        let nested = json!({ "obj": { "order": { "id": 318524571 } } });
        let flat = json!({ "order": { "id": "318524571" } });
        let direct = json!({ "order_id": "318524571" });

        for body in [nested, flat, direct] {
            assert_eq!(
                CallbackPayload::from_value(&body).order_id.as_deref(),
                Some("318524571")
            );
        }
    }

    #[test]
    fn nested_shape_wins_over_direct_field() {
        let body = json!({ "obj": { "order": { "id": 1 } }, "order_id": "2" });
        assert_eq!(CallbackPayload::from_value(&body).order_id.as_deref(), Some("1"));
    }

    #[test]
    fn fields_are_read_from_transaction_object() {
        let body = json!({
            "type": "TRANSACTION",
            "obj": {
                "success": "true",
                "pending": false,
                "amount_cents": 10000,
                "currency": "EGP",
                "order": { "id": 77, "merchant_order_id": "ref-77" }
            }
        });

        let payload = CallbackPayload::from_value(&body);
        assert_eq!(payload.success, Some(true));
        assert!(!payload.pending);
        assert_eq!(payload.amount_cents.as_deref(), Some("10000"));
        assert_eq!(payload.special_reference.as_deref(), Some("ref-77"));
        assert_eq!(payload.signed_message(), "10000EGPref-77");
    }

    #[test]
    fn signature_round_trips_and_rejects_tampering() {
        let mut payload = CallbackPayload {
            order_id: Some("1".into()),
            success: Some(true),
            pending: false,
            amount_cents: Some("10000".into()),
            currency: Some("EGP".into()),
            special_reference: Some("ref".into()),
        };
        let signature = sign_callback("shared-secret", &payload);

        assert_eq!(signature.len(), 128);
        assert!(verify_signature("shared-secret", &payload, &signature));
        assert!(!verify_signature("other-secret", &payload, &signature));
        assert!(!verify_signature("shared-secret", &payload, "not-hex"));

        payload.amount_cents = Some("1".into());
        assert!(!verify_signature("shared-secret", &payload, &signature));
    }

    fn recorded_payment() -> Payment {
        Payment {
            id: Uuid::new_v4(),
            provider_order_id: "6001".into(),
            provider_payment_key: "csk_6001".into(),
            amount_cents: 100,
            currency: "EGP".into(),
            status: crate::models::payment::PaymentStatus::Pending,
            donation_id: None,
            user_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn payload_for(payment: &Payment) -> CallbackPayload {
        CallbackPayload {
            order_id: Some(payment.provider_order_id.clone()),
            success: Some(true),
            pending: false,
            amount_cents: Some(payment.amount_cents.to_string()),
            currency: Some("egp".into()),
            special_reference: Some(payment.id.to_string()),
        }
    }

    #[test]
    fn signed_fields_must_describe_the_named_payment() {
        let payment = recorded_payment();
        assert_eq!(check_binding(&payload_for(&payment), &payment), Ok(()));

        let other = recorded_payment();
        assert_eq!(
            check_binding(&payload_for(&other), &payment),
            Err("special_reference")
        );

        let mut payload = payload_for(&payment);
        payload.amount_cents = Some("500000".into());
        assert_eq!(check_binding(&payload, &payment), Err("amount_cents"));

        let mut payload = payload_for(&payment);
        payload.currency = Some("USD".into());
        assert_eq!(check_binding(&payload, &payment), Err("currency"));

        let mut payload = payload_for(&payment);
        payload.special_reference = None;
        assert_eq!(check_binding(&payload, &payment), Err("special_reference"));
    }
}

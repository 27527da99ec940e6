//! Inbound provider callback.

use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::models::payment::PaymentStatus;
use crate::services::webhook_driver::CallbackAck;
use crate::state::AppState;

/// The provider may put the digest in the query string instead of a header.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub hmac: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
}

/// Provider transaction callback.
///
/// # Responses
///
/// - 200 `{"status": "ok", "payment_status": "paid"}` when applied, including
///   repeats of an already applied callback
/// - 200 `{"status": "ok"}` when the provider reports the transaction pending
/// - 401 when the HMAC is missing or wrong (payment untouched)
/// - 404 for an unknown order id
/// - 400 for a payload without order id or success flag
pub async fn paymob_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
    Json(body): Json<Value>,
) -> Result<Json<CallbackResponse>, AppError> {
    let signature = headers
        .get("HMAC")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or(query.hmac);

    let ack = state.webhooks.handle(signature.as_deref(), &body).await?;

    let payment_status = match ack {
        CallbackAck::Applied(result) => Some(result.status()),
        CallbackAck::StillPending => None,
    };

    Ok(Json(CallbackResponse {
        status: "ok",
        payment_status,
    }))
}

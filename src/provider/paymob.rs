//! Paymob Accept client.
//!
//! # Endpoints
//!
//! - `POST /api/auth/tokens`: API key -> bearer token
//! - `POST /api/ecommerce/orders/transaction_inquiry`: 404 while the
//!   transaction is not known yet
//! - `POST /v1/intention/`: create an intention (`Authorization: Token <secret key>`)
//!
//! Every request is bounded by the client timeout.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Inquiry, Intention, IntentionRequest, PaymentProvider, ProviderTransaction};
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct PaymobClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    integration_id: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InquiryResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    pending: bool,
    amount_cents: i64,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    merchant_order_id: Option<String>,
    #[serde(default)]
    order: Option<InquiryOrder>,
}

#[derive(Debug, Deserialize)]
struct InquiryOrder {
    #[serde(default)]
    merchant_order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IntentionResponse {
    client_secret: String,
    intention_order_id: serde_json::Value,
}

impl PaymobClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        secret_key: String,
        integration_id: i64,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Provider(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            secret_key,
            integration_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Turn a non-2xx response into `AppError::Provider`, keeping the body for the log.
async fn ensure_success(
    response: reqwest::Response,
    step: &str,
) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(step, status = status.as_u16(), body = %body, "provider call failed");
    Err(AppError::Provider(format!("{} returned {}", step, status)))
}

fn transport_error(step: &str, e: reqwest::Error) -> AppError {
    tracing::error!(step, error = %e, "provider unreachable");
    AppError::Provider(format!("{} failed: {}", step, e))
}

fn malformed(step: &str, e: reqwest::Error) -> AppError {
    AppError::Provider(format!("{} returned a malformed body: {}", step, e))
}

#[async_trait]
impl PaymentProvider for PaymobClient {
    async fn authenticate(&self) -> Result<String, AppError> {
        let response = self
            .client
            .post(self.url("/api/auth/tokens"))
            .json(&json!({ "api_key": self.api_key }))
            .send()
            .await
            .map_err(|e| transport_error("auth", e))?;

        let body: TokenResponse = ensure_success(response, "auth")
            .await?
            .json()
            .await
            .map_err(|e| malformed("auth", e))?;

        body.token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Provider("auth token missing from response".to_string()))
    }

    async fn inquire(&self, token: &str, order_id: &str) -> Result<Inquiry, AppError> {
        let response = self
            .client
            .post(self.url("/api/ecommerce/orders/transaction_inquiry"))
            .bearer_auth(token)
            .json(&json!({ "order_id": order_id }))
            .send()
            .await
            .map_err(|e| transport_error("inquiry", e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Inquiry::NotFound);
        }

        let body: InquiryResponse = ensure_success(response, "inquiry")
            .await?
            .json()
            .await
            .map_err(|e| malformed("inquiry", e))?;

        let merchant_order_id = body
            .merchant_order_id
            .or_else(|| body.order.and_then(|o| o.merchant_order_id));

        Ok(Inquiry::Transaction(ProviderTransaction {
            success: body.success,
            pending: body.pending,
            amount_cents: body.amount_cents,
            currency: body.currency,
            merchant_order_id,
        }))
    }

    async fn create_intention(&self, request: &IntentionRequest) -> Result<Intention, AppError> {
        let payload = json!({
            "amount": request.amount_cents,
            "currency": request.currency,
            "payment_methods": [self.integration_id],
            "items": [{
                "name": request.item_name,
                "amount": request.amount_cents,
                "description": format!("Donation to {}", request.item_name),
                "quantity": 1
            }],
            "billing_data": {
                "first_name": request.billing_name,
                "last_name": "NA",
                "email": request.billing_email,
                "phone_number": "NA"
            },
            "special_reference": request.special_reference
        });

        let response = self
            .client
            .post(self.url("/v1/intention/"))
            .header("Authorization", format!("Token {}", self.secret_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error("intention", e))?;

        let body: IntentionResponse = ensure_success(response, "intention")
            .await?
            .json()
            .await
            .map_err(|e| malformed("intention", e))?;

        let order_id = match body.intention_order_id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(AppError::Provider(format!(
                    "unexpected intention_order_id: {}",
                    other
                )));
            }
        };

        Ok(Intention {
            order_id,
            client_secret: body.client_secret,
        })
    }
}

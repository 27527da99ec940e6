//! Payment provider boundary.
//!
//! The reconciliation drivers only talk to the provider through
//! [`PaymentProvider`], so tests can script provider answers.

use async_trait::async_trait;

use crate::error::AppError;

pub mod paymob;

pub use paymob::PaymobClient;

/// Transaction as reported by the provider's inquiry endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTransaction {
    pub success: bool,
    /// Still settling at the provider; not a definitive answer yet.
    pub pending: bool,
    pub amount_cents: i64,
    pub currency: String,
    pub merchant_order_id: Option<String>,
}

/// Answer to a transaction inquiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inquiry {
    /// The provider has no transaction for the order yet.
    NotFound,
    Transaction(ProviderTransaction),
}

#[derive(Debug, Clone)]
pub struct IntentionRequest {
    pub amount_cents: i64,
    pub currency: String,
    /// Echoed back by the provider in callbacks and covered by their HMAC
    pub special_reference: String,
    pub item_name: String,
    pub billing_email: String,
    pub billing_name: String,
}

/// Provider-side pending payment.
#[derive(Debug, Clone)]
pub struct Intention {
    pub order_id: String,
    pub client_secret: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Exchange the API key for a short-lived bearer token.
    async fn authenticate(&self) -> Result<String, AppError>;

    /// Look up the transaction of `order_id`.
    async fn inquire(&self, token: &str, order_id: &str) -> Result<Inquiry, AppError>;

    /// Create a payment intention the frontend completes with the provider.
    async fn create_intention(&self, request: &IntentionRequest) -> Result<Intention, AppError>;
}

//! Payment data models and API request/response types.
//!
//! This module defines:
//! - `Payment`: Database entity for one provider transaction attempt
//! - `PaymentStatus` / `PaymentOutcome`: the ledger state machine and what a driver observed
//! - `CreateIntentionRequest` / `IntentionResponse`: intention creation API types
//! - `PaymentResponse`: status view returned to the payer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a payment.
///
/// `Pending` is the only non-terminal state. A payment moves to `Paid` or
/// `Failed` exactly once and never leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definitive answer observed at the provider by one of the drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success,
    Failure,
}

impl PaymentOutcome {
    pub fn from_success(success: bool) -> Self {
        if success {
            PaymentOutcome::Success
        } else {
            PaymentOutcome::Failure
        }
    }

    /// Terminal status this outcome moves a pending payment to.
    pub fn target_status(self) -> PaymentStatus {
        match self {
            PaymentOutcome::Success => PaymentStatus::Paid,
            PaymentOutcome::Failure => PaymentStatus::Failed,
        }
    }
}

/// Represents a payment record from the database.
///
/// # Database Table
///
/// Maps to the `payments` table. `provider_order_id` and
/// `provider_payment_key` carry unique constraints; they are the keys
/// callbacks and inquiries are matched on.
///
/// `donation_id` is set if and only if `status` is `Paid` (also enforced by
/// a CHECK constraint).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Payment {
    pub id: Uuid,

    /// Order id assigned by the provider when the intention was created
    pub provider_order_id: String,

    /// Client secret handed to the frontend to complete the payment
    pub provider_payment_key: String,

    /// Amount in minor units, fixed at creation
    pub amount_cents: i64,

    pub currency: String,

    pub status: PaymentStatus,

    pub donation_id: Option<Uuid>,

    pub user_id: Uuid,

    pub project_id: Uuid,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Fields needed to record a freshly created intention.
///
/// `id` is chosen before the intention is created because it doubles as the
/// `special_reference` the provider echoes back in callbacks.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub provider_order_id: String,
    pub provider_payment_key: String,
    pub amount_cents: i64,
    pub currency: String,
    pub user_id: Uuid,
    pub project_id: Uuid,
}

/// Request body for `POST /api/v1/payments/intentions`.
///
/// # JSON Example
///
/// ```json
/// {
///   "project_id": "550e8400-e29b-41d4-a716-446655440000",
///   "amount_cents": 25000
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateIntentionRequest {
    pub project_id: Uuid,
    pub amount_cents: i64,
}

/// Returned after an intention is created; the frontend completes the
/// payment with the provider directly using `client_secret` and `public_key`.
#[derive(Debug, Serialize)]
pub struct IntentionResponse {
    pub payment_id: Uuid,
    pub order_id: String,
    pub client_secret: String,
    pub public_key: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// Status view of a payment.
///
/// # JSON Example
///
/// ```json
/// {
///   "order_id": "318524571",
///   "status": "paid",
///   "amount_cents": 10000,
///   "currency": "EGP",
///   "donation_id": "770e8400-e29b-41d4-a716-446655440002",
///   "project_id": "550e8400-e29b-41d4-a716-446655440000"
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub order_id: String,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub donation_id: Option<Uuid>,
    pub project_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

/// Convert database Payment to API PaymentResponse.
///
/// The provider payment key and the owning user are not exposed.
impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            order_id: payment.provider_order_id,
            status: payment.status,
            amount_cents: payment.amount_cents,
            currency: payment.currency,
            donation_id: payment.donation_id,
            project_id: payment.project_id,
            updated_at: payment.updated_at,
        }
    }
}

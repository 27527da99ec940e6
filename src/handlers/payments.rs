//! HTTP handlers for payment operations.
//!
//! All endpoints here require bearer authentication. A payment is only
//! visible to the user who opened it; anyone else gets 404.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::payment::{CreateIntentionRequest, Payment, PaymentResponse};
use crate::state::AppState;

async fn owned_payment(
    state: &AppState,
    auth: &AuthContext,
    order_id: &str,
) -> Result<Payment, AppError> {
    let payment = state.ledger.payment(order_id).await?;
    if payment.user_id != auth.user_id {
        return Err(AppError::PaymentNotFound);
    }
    Ok(payment)
}

/// Create a payment intention for a project.
///
/// # Request Body
///
/// ```json
/// {
///   "project_id": "550e8400-e29b-41d4-a716-446655440000",
///   "amount_cents": 10000
/// }
/// ```
///
/// # Response
///
/// 201 Created with the order id and the client secret the checkout needs.
pub async fn create_intention(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateIntentionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let intention = state.intentions.create_intention(&auth, request).await?;

    Ok((StatusCode::CREATED, Json(intention)))
}

/// Current status of one of the caller's payments.
pub async fn get_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentResponse>, AppError> {
    let payment = owned_payment(&state, &auth, &order_id).await?;

    Ok(Json(payment.into()))
}

/// Ask the provider about a payment whose callback has not arrived.
///
/// Verification runs in the background (it may take several provider
/// round-trips), so this returns 202 Accepted with the status as of now.
/// Terminal payments are returned as-is without contacting the provider.
pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let payment = owned_payment(&state, &auth, &order_id).await?;

    if payment.status.is_terminal() {
        return Ok((StatusCode::OK, Json(PaymentResponse::from(payment))));
    }

    state.poller.spawn_verify(order_id);

    Ok((StatusCode::ACCEPTED, Json(PaymentResponse::from(payment))))
}

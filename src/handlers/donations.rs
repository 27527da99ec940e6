//! HTTP handler for manual donations.

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::project::CreateDonationRequest;
use crate::services::donation_service;
use crate::state::AppState;

/// Record a donation without going through the payment provider.
///
/// # Request Body
///
/// ```json
/// {
///   "project_id": "550e8400-e29b-41d4-a716-446655440000",
///   "amount_cents": 2500
/// }
/// ```
///
/// # Response
///
/// 201 Created with the donation. 422 if the project no longer accepts
/// donations, 400 if the amount exceeds what is left of the target.
pub async fn create_donation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateDonationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let donation = donation_service::record_donation(
        state.store.as_ref(),
        &state.dispatcher,
        auth.user_id,
        request,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(donation)))
}

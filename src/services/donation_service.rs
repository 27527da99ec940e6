//! Manual donations - the path that needs no provider reconciliation.
//!
//! The store validates and credits under the project row lock, the same lock
//! the ledger takes when a payment is paid, so a manual donation and a
//! reconciled payment can never both miss (or both claim) the moment the
//! target is reached.

use uuid::Uuid;

use crate::error::AppError;
use crate::models::project::{CreateDonationRequest, Donation};
use crate::services::notifier::{Dispatcher, Notification};
use crate::store::PaymentStore;

/// Record a donation and notify donor (and owner when the target is reached).
///
/// # Errors
///
/// - `ProjectNotFound`: project does not exist
/// - `ProjectClosed`: project is finished or cancelled
/// - `InvalidRequest`: amount not positive or above the remaining target
pub async fn record_donation(
    store: &dyn PaymentStore,
    dispatcher: &Dispatcher,
    user_id: Uuid,
    request: CreateDonationRequest,
) -> Result<Donation, AppError> {
    let credit = store
        .record_donation(user_id, request.project_id, request.amount_cents)
        .await?;

    tracing::info!(
        donation_id = %credit.donation.id,
        project_id = %request.project_id,
        project_total_cents = credit.project.total_donations_cents,
        project_finished = credit.project_finished,
        "manual donation recorded"
    );

    dispatcher.dispatch(Notification::for_credit(&credit)).await;

    Ok(credit.donation)
}

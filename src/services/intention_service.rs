//! Intention creation - opens a pending payment with the provider.
//!
//! # Process
//!
//! 1. Check the project accepts the amount (active, within remaining target)
//! 2. Create the intention at the provider, using the new payment id as the
//!    `special_reference` the provider echoes back in callbacks
//! 3. Record the pending payment in the ledger
//! 4. Return the client secret the frontend completes the payment with

use std::sync::Arc;

use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::payment::{CreateIntentionRequest, IntentionResponse, NewPayment};
use crate::provider::{IntentionRequest, PaymentProvider};
use crate::services::ledger::PaymentLedger;
use crate::store::{PaymentStore, check_donation};

pub struct IntentionService {
    store: Arc<dyn PaymentStore>,
    provider: Arc<dyn PaymentProvider>,
    ledger: Arc<PaymentLedger>,
    currency: String,
    public_key: String,
}

impl IntentionService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        provider: Arc<dyn PaymentProvider>,
        ledger: Arc<PaymentLedger>,
        currency: String,
        public_key: String,
    ) -> Self {
        Self {
            store,
            provider,
            ledger,
            currency,
            public_key,
        }
    }

    /// # Errors
    ///
    /// - `ProjectNotFound`: project does not exist
    /// - `ProjectClosed`: project is finished or cancelled
    /// - `InvalidRequest`: amount not positive or above the remaining target
    /// - `Provider`: the provider refused or could not be reached (nothing recorded)
    pub async fn create_intention(
        &self,
        auth: &AuthContext,
        request: CreateIntentionRequest,
    ) -> Result<IntentionResponse, AppError> {
        let (project, total) = self
            .store
            .project_with_total(request.project_id)
            .await?
            .ok_or(AppError::ProjectNotFound)?;

        check_donation(&project, total, request.amount_cents)?;

        let payment_id = Uuid::new_v4();
        let intention = self
            .provider
            .create_intention(&IntentionRequest {
                amount_cents: request.amount_cents,
                currency: self.currency.clone(),
                special_reference: payment_id.to_string(),
                item_name: project.title.clone(),
                billing_email: auth.email.clone(),
                billing_name: auth.username.clone(),
            })
            .await?;

        let payment = self
            .ledger
            .open_payment(NewPayment {
                id: payment_id,
                provider_order_id: intention.order_id,
                provider_payment_key: intention.client_secret.clone(),
                amount_cents: request.amount_cents,
                currency: self.currency.clone(),
                user_id: auth.user_id,
                project_id: project.id,
            })
            .await?;

        Ok(IntentionResponse {
            payment_id: payment.id,
            order_id: payment.provider_order_id,
            client_secret: intention.client_secret,
            public_key: self.public_key.clone(),
            amount_cents: payment.amount_cents,
            currency: payment.currency,
        })
    }
}

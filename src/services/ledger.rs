//! Payment ledger - authoritative state transitions for payments.
//!
//! Both reconciliation drivers (the provider webhook and the polling task)
//! call [`PaymentLedger::finalize`]; neither writes payment fields itself.
//!
//! # Exactly-once Guarantee
//!
//! The store applies the status check-and-set together with the donation and
//! project writes as one atomic unit. Of any number of concurrent callers for
//! the same order id exactly one observes the pending payment and gets
//! `Finalized`; every other caller gets `AlreadyFinalized` and causes no side
//! effects. Notifications are dispatched only by the winner, after commit.

use std::sync::Arc;

use crate::error::AppError;
use crate::models::payment::{NewPayment, Payment, PaymentOutcome, PaymentStatus};
use crate::services::notifier::{Dispatcher, Notification};
use crate::store::{PaymentStore, Transition};

/// Which branch a `finalize` call executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeResult {
    /// This call moved the payment out of `pending`.
    Finalized(PaymentStatus),
    /// The payment was already terminal; nothing changed.
    AlreadyFinalized(PaymentStatus),
}

impl FinalizeResult {
    pub fn status(self) -> PaymentStatus {
        match self {
            FinalizeResult::Finalized(s) | FinalizeResult::AlreadyFinalized(s) => s,
        }
    }
}

pub struct PaymentLedger {
    store: Arc<dyn PaymentStore>,
    dispatcher: Dispatcher,
}

impl PaymentLedger {
    pub fn new(store: Arc<dyn PaymentStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Record a new pending payment for a freshly created intention.
    pub async fn open_payment(&self, payment: NewPayment) -> Result<Payment, AppError> {
        if payment.amount_cents <= 0 {
            return Err(AppError::InvalidRequest(
                "Amount must be positive".to_string(),
            ));
        }

        let payment = self.store.insert_payment(payment).await?;
        tracing::info!(
            order_id = %payment.provider_order_id,
            payment_id = %payment.id,
            amount_cents = payment.amount_cents,
            "payment opened"
        );
        Ok(payment)
    }

    /// Fetch a payment by provider order id.
    ///
    /// # Errors
    ///
    /// - `PaymentNotFound`: no payment carries this order id
    pub async fn payment(&self, provider_order_id: &str) -> Result<Payment, AppError> {
        self.store
            .payment_by_order_id(provider_order_id)
            .await?
            .ok_or(AppError::PaymentNotFound)
    }

    /// Apply the provider's definitive outcome to a payment, at most once.
    ///
    /// `amount_cents` and `currency` are what the provider reported; they are
    /// compared with the ledger's record for logging only. The donation
    /// always uses the amount fixed when the payment was opened.
    ///
    /// # Errors
    ///
    /// - `PaymentNotFound`: unknown order id
    /// - `Database`: the atomic unit failed and was rolled back; the payment
    ///   is still pending and may be finalized again later
    #[tracing::instrument(skip_all, fields(order_id = %provider_order_id, outcome = ?outcome))]
    pub async fn finalize(
        &self,
        provider_order_id: &str,
        outcome: PaymentOutcome,
        amount_cents: Option<i64>,
        currency: Option<&str>,
    ) -> Result<FinalizeResult, AppError> {
        let transition = self
            .store
            .finalize_payment(provider_order_id, outcome)
            .await?;

        let notifications = match transition {
            Transition::AlreadyFinal(status) => {
                tracing::info!(%status, "payment already finalized, nothing to do");
                return Ok(FinalizeResult::AlreadyFinalized(status));
            }
            Transition::Paid { payment, credit } => {
                warn_on_mismatch(&payment, amount_cents, currency);
                tracing::info!(
                    donation_id = %credit.donation.id,
                    project_id = %payment.project_id,
                    project_total_cents = credit.project.total_donations_cents,
                    project_finished = credit.project_finished,
                    "payment paid, donation recorded"
                );
                Notification::for_credit(&credit)
            }
            Transition::Failed {
                payment,
                donor,
                project_title,
            } => {
                warn_on_mismatch(&payment, amount_cents, currency);
                tracing::info!(project_id = %payment.project_id, "payment failed");
                vec![Notification::PaymentFailed {
                    donor_email: donor.email,
                    project_title,
                    order_id: payment.provider_order_id,
                }]
            }
        };

        self.dispatcher.dispatch(notifications).await;

        Ok(FinalizeResult::Finalized(outcome.target_status()))
    }
}

fn warn_on_mismatch(payment: &Payment, amount_cents: Option<i64>, currency: Option<&str>) {
    if let Some(reported) = amount_cents.filter(|a| *a != payment.amount_cents) {
        tracing::warn!(
            expected_cents = payment.amount_cents,
            reported_cents = reported,
            "provider reported a different amount"
        );
    }
    if let Some(reported) = currency.filter(|c| !c.eq_ignore_ascii_case(&payment.currency)) {
        tracing::warn!(
            expected = %payment.currency,
            reported,
            "provider reported a different currency"
        );
    }
}

//! Polling driver - resolves payments whose callback has not arrived yet.
//!
//! Triggered after the payer is redirected back (the "verify payment"
//! action). Asks the provider for the transaction status a bounded number of
//! times and, on a definitive answer, converges on the same
//! [`PaymentLedger::finalize`] the webhook uses.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::models::payment::PaymentOutcome;
use crate::provider::{Inquiry, PaymentProvider};
use crate::services::ledger::{FinalizeResult, PaymentLedger};

#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Inquiries before giving up
    pub max_attempts: u32,
    /// Pause between inquiries; models settlement latency at the provider
    pub retry_delay: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

pub struct PollingDriver {
    provider: Arc<dyn PaymentProvider>,
    ledger: Arc<PaymentLedger>,
    config: PollingConfig,
}

impl PollingDriver {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        ledger: Arc<PaymentLedger>,
        config: PollingConfig,
    ) -> Self {
        Self {
            provider,
            ledger,
            config,
        }
    }

    /// Interrogate the provider until it gives a definitive answer.
    ///
    /// # Errors
    ///
    /// - `PaymentNotFound`: unknown order id
    /// - `Provider`: auth or inquiry call failed; the payment is untouched
    /// - `VerificationTimeout`: no definitive answer within the attempt
    ///   bound; the payment stays pending for a later webhook or poll
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn verify(&self, order_id: &str) -> Result<FinalizeResult, AppError> {
        let payment = self.ledger.payment(order_id).await?;
        if payment.status.is_terminal() {
            return Ok(FinalizeResult::AlreadyFinalized(payment.status));
        }

        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let token = self.provider.authenticate().await?;

            match self.provider.inquire(&token, order_id).await? {
                Inquiry::Transaction(transaction) if !transaction.pending => {
                    tracing::info!(
                        attempt,
                        success = transaction.success,
                        "provider reported a definitive outcome"
                    );
                    return self
                        .ledger
                        .finalize(
                            order_id,
                            PaymentOutcome::from_success(transaction.success),
                            Some(transaction.amount_cents),
                            Some(transaction.currency.as_str()),
                        )
                        .await;
                }
                Inquiry::Transaction(_) => {
                    tracing::info!(attempt, max_attempts, "transaction still pending at provider");
                }
                Inquiry::NotFound => {
                    tracing::info!(attempt, max_attempts, "transaction not found yet");
                }
            }

            // No sleep after the last attempt.
            if attempt < max_attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        tracing::error!(attempts = max_attempts, "transaction not settled after all attempts");
        Err(AppError::VerificationTimeout {
            attempts: max_attempts,
        })
    }

    /// Run [`verify`](Self::verify) as a background task.
    ///
    /// The outcome is only logged; callers read the payment status later.
    pub fn spawn_verify(self: &Arc<Self>, order_id: String) -> JoinHandle<()> {
        let driver = Arc::clone(self);
        tokio::spawn(async move {
            match driver.verify(&order_id).await {
                Ok(result) => {
                    tracing::info!(%order_id, ?result, "background verification finished")
                }
                Err(e) => tracing::warn!(%order_id, error = %e, "background verification failed"),
            }
        })
    }
}

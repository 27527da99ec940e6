//! Shared application state handed to every handler through `State`.

use std::sync::Arc;

use crate::config::Config;
use crate::provider::PaymentProvider;
use crate::services::intention_service::IntentionService;
use crate::services::ledger::PaymentLedger;
use crate::services::notifier::Dispatcher;
use crate::services::polling_driver::{PollingConfig, PollingDriver};
use crate::services::webhook_driver::WebhookDriver;
use crate::store::PaymentStore;

/// Settings the services need besides their collaborators.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub hmac_secret: String,
    pub currency: String,
    pub public_key: String,
    pub polling: PollingConfig,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hmac_secret: config.paymob_hmac_secret.clone(),
            currency: config.payment_currency.clone(),
            public_key: config.paymob_public_key.clone(),
            polling: PollingConfig {
                max_attempts: config.verify_max_attempts,
                retry_delay: config.verify_retry_delay(),
            },
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaymentStore>,
    pub dispatcher: Dispatcher,
    pub ledger: Arc<PaymentLedger>,
    pub webhooks: Arc<WebhookDriver>,
    pub poller: Arc<PollingDriver>,
    pub intentions: Arc<IntentionService>,
}

impl AppState {
    /// Wire the ledger and both drivers around one store.
    pub fn new(
        store: Arc<dyn PaymentStore>,
        provider: Arc<dyn PaymentProvider>,
        dispatcher: Dispatcher,
        settings: ServiceSettings,
    ) -> Self {
        let ledger = Arc::new(PaymentLedger::new(store.clone(), dispatcher.clone()));

        let webhooks = Arc::new(WebhookDriver::new(ledger.clone(), settings.hmac_secret));
        let poller = Arc::new(PollingDriver::new(
            provider.clone(),
            ledger.clone(),
            settings.polling,
        ));
        let intentions = Arc::new(IntentionService::new(
            store.clone(),
            provider,
            ledger.clone(),
            settings.currency,
            settings.public_key,
        ));

        Self {
            store,
            dispatcher,
            ledger,
            webhooks,
            poller,
            intentions,
        }
    }
}

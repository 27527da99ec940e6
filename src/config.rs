//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables
//! into a type-safe struct.
//! Provider secrets live here and are handed to the drivers when they are built,
//! nothing reads them from global state.

use std::time::Duration;

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `PAYMOB_API_KEY`, `PAYMOB_SECRET_KEY`, `PAYMOB_PUBLIC_KEY`,
///   `PAYMOB_INTEGRATION_ID`, `PAYMOB_HMAC_SECRET` (required): provider credentials
/// - `PAYMOB_BASE_URL` (optional): defaults to `https://accept.paymob.com`
/// - `PAYMENT_CURRENCY` (optional): defaults to `EGP`
/// - `PROVIDER_TIMEOUT_SECS` (optional): per-call provider timeout, defaults to 10
/// - `VERIFY_MAX_ATTEMPTS` / `VERIFY_RETRY_DELAY_SECS` (optional): polling bounds, 3 and 5
/// - `NOTIFICATION_RELAY_URL` / `NOTIFICATION_RELAY_SECRET` (optional): mail relay
/// - `ADMIN_EMAILS` (optional): comma separated list of admin addresses
/// - `PROJECT_SWEEP_INTERVAL_SECS` (optional): deadline sweep period, defaults to 300
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_paymob_base_url")]
    pub paymob_base_url: String,

    pub paymob_api_key: String,

    pub paymob_secret_key: String,

    pub paymob_public_key: String,

    pub paymob_integration_id: i64,

    pub paymob_hmac_secret: String,

    #[serde(default = "default_currency")]
    pub payment_currency: String,

    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    #[serde(default = "default_verify_max_attempts")]
    pub verify_max_attempts: u32,

    #[serde(default = "default_verify_retry_delay_secs")]
    pub verify_retry_delay_secs: u64,

    #[serde(default)]
    pub notification_relay_url: Option<String>,

    #[serde(default)]
    pub notification_relay_secret: Option<String>,

    #[serde(default)]
    pub admin_emails: Vec<String>,

    #[serde(default = "default_sweep_interval_secs")]
    pub project_sweep_interval_secs: u64,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_paymob_base_url() -> String {
    "https://accept.paymob.com".to_string()
}

fn default_currency() -> String {
    "EGP".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    10
}

fn default_verify_max_attempts() -> u32 {
    3
}

fn default_verify_retry_delay_secs() -> u64 {
    5
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn verify_retry_delay(&self) -> Duration {
        Duration::from_secs(self.verify_retry_delay_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.project_sweep_interval_secs)
    }
}

//! Notification dispatch for ledger and project transitions.
//!
//! Notifications are emails in spirit (donor thank-you, owner funded or
//! unfunded, admin digest). They are delivered through a [`Notifier`];
//! the [`Dispatcher`] logs and swallows every delivery failure so nothing
//! here can undo or retry a committed ledger transition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::project::ProjectSnapshot;
use crate::store::Credit;

type HmacSha256 = Hmac<Sha256>;

/// One message to one or more recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Thank-you to the donor once a donation is credited.
    DonationReceived {
        donor_email: String,
        project_title: String,
        amount_cents: i64,
    },
    /// The project just met its target.
    ProjectFunded {
        owner_email: String,
        project_title: String,
    },
    /// The provider reported the payment as failed.
    PaymentFailed {
        donor_email: String,
        project_title: String,
        order_id: String,
    },
    /// The deadline sweep closed the project.
    ProjectClosed {
        owner_email: String,
        project_title: String,
        reached_target: bool,
        total_cents: i64,
        target_cents: i64,
    },
    /// Same closing event, addressed to the site admins.
    AdminDigest {
        admin_emails: Vec<String>,
        project_title: String,
        owner_email: String,
        reached_target: bool,
        total_cents: i64,
        target_cents: i64,
    },
}

impl Notification {
    /// Notifications owed for a credited donation.
    pub fn for_credit(credit: &Credit) -> Vec<Notification> {
        let title = &credit.project.project.title;
        let mut notifications = vec![Notification::DonationReceived {
            donor_email: credit.donor.email.clone(),
            project_title: title.clone(),
            amount_cents: credit.donation.amount_cents,
        }];

        if credit.project_finished {
            notifications.push(Notification::ProjectFunded {
                owner_email: credit.project.owner_email.clone(),
                project_title: title.clone(),
            });
        }

        notifications
    }

    /// Owner message plus, when admins are configured, the admin digest.
    pub fn for_closed_project(
        snapshot: &ProjectSnapshot,
        admin_emails: &[String],
    ) -> Vec<Notification> {
        let project = &snapshot.project;
        let reached_target = snapshot.total_donations_cents >= project.total_target_cents;

        let mut notifications = vec![Notification::ProjectClosed {
            owner_email: snapshot.owner_email.clone(),
            project_title: project.title.clone(),
            reached_target,
            total_cents: snapshot.total_donations_cents,
            target_cents: project.total_target_cents,
        }];

        if !admin_emails.is_empty() {
            notifications.push(Notification::AdminDigest {
                admin_emails: admin_emails.to_vec(),
                project_title: project.title.clone(),
                owner_email: snapshot.owner_email.clone(),
                reached_target,
                total_cents: snapshot.total_donations_cents,
                target_cents: project.total_target_cents,
            });
        }

        notifications
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::DonationReceived { .. } => "donation_received",
            Notification::ProjectFunded { .. } => "project_funded",
            Notification::PaymentFailed { .. } => "payment_failed",
            Notification::ProjectClosed { .. } => "project_closed",
            Notification::AdminDigest { .. } => "admin_digest",
        }
    }

    pub fn recipients(&self) -> Vec<String> {
        match self {
            Notification::DonationReceived { donor_email, .. }
            | Notification::PaymentFailed { donor_email, .. } => vec![donor_email.clone()],
            Notification::ProjectFunded { owner_email, .. }
            | Notification::ProjectClosed { owner_email, .. } => vec![owner_email.clone()],
            Notification::AdminDigest { admin_emails, .. } => admin_emails.clone(),
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Notification::DonationReceived { project_title, .. } => {
                format!("Thank you for your donation to {}", project_title)
            }
            Notification::ProjectFunded { project_title, .. } => format!(
                "Congratulations! Your project '{}' has reached its target",
                project_title
            ),
            Notification::PaymentFailed { project_title, .. } => {
                format!("Your payment to {} did not go through", project_title)
            }
            Notification::ProjectClosed { project_title, .. } => {
                format!("Your project '{}' has finished", project_title)
            }
            Notification::AdminDigest { project_title, .. } => {
                format!("Project '{}' has finished", project_title)
            }
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::DonationReceived {
                project_title,
                amount_cents,
                ..
            } => format!(
                "Thank you for your donation of {} to {}. Your contribution makes a difference!",
                format_amount(*amount_cents),
                project_title
            ),
            Notification::ProjectFunded { project_title, .. } => format!(
                "Your project '{}' has successfully reached its donation target \
                 and is now finished.",
                project_title
            ),
            Notification::PaymentFailed {
                project_title,
                order_id,
                ..
            } => format!(
                "The payment for order {} to {} was declined by the payment provider. \
                 No donation was recorded.",
                order_id, project_title
            ),
            Notification::ProjectClosed {
                project_title,
                reached_target: true,
                ..
            } => format!(
                "Congratulations! Your project '{}' has finished and reached its target.",
                project_title
            ),
            Notification::ProjectClosed {
                project_title,
                target_cents,
                ..
            } => format!(
                "Your project '{}' has finished but did not reach its total target of {}.\n\
                 Would you like to extend the project duration? \
                 Please contact support or update your project.",
                project_title,
                format_amount(*target_cents)
            ),
            Notification::AdminDigest {
                project_title,
                owner_email,
                reached_target,
                total_cents,
                target_cents,
                ..
            } => {
                if *reached_target {
                    format!(
                        "The project '{}' has finished and reached its target.\nOwner: {}",
                        project_title, owner_email
                    )
                } else {
                    format!(
                        "The project '{}' has finished but did not reach its target ({} / {}).\n\
                         Owner: {}\nConsider contacting the owner about extending the project.",
                        project_title,
                        format_amount(*total_cents),
                        format_amount(*target_cents),
                        owner_email
                    )
                }
            }
        }
    }
}

/// Minor units rendered with two decimals, e.g. `12345` -> `123.45`.
fn format_amount(amount_cents: i64) -> String {
    format!("{}.{:02}", amount_cents / 100, (amount_cents % 100).abs())
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("relay request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("relay rejected notification with status {0}")]
    Rejected(u16),

    #[error("failed to serialize notification: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Delivery channel for notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log only. Used when no relay is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            kind = notification.kind(),
            recipients = ?notification.recipients(),
            subject = %notification.subject(),
            "notification"
        );
        Ok(())
    }
}

/// Envelope POSTed to the mail relay.
#[derive(Debug, Serialize)]
struct RelayEnvelope<'a> {
    event_id: Uuid,
    created_at: DateTime<Utc>,
    recipients: Vec<String>,
    subject: String,
    body: String,
    notification: &'a Notification,
}

/// Delivers notifications to an HTTP mail relay.
///
/// # Headers Sent
///
/// - `Content-Type: application/json`
/// - `X-Webhook-Signature: sha256=<hex>` (HMAC-SHA256 of the body with the relay secret)
/// - `X-Webhook-Event-Id: <uuid>`
///
/// # Timeout
///
/// 5 seconds per delivery (prevents hanging on a slow relay)
#[derive(Debug, Clone)]
pub struct RelayNotifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl RelayNotifier {
    pub fn new(url: String, secret: String) -> Result<Self, AppError> {
        validate_relay_url(&url)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::InvalidRequest(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            url,
            secret,
        })
    }
}

#[async_trait]
impl Notifier for RelayNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let event_id = Uuid::new_v4();
        let envelope = RelayEnvelope {
            event_id,
            created_at: Utc::now(),
            recipients: notification.recipients(),
            subject: notification.subject(),
            body: notification.body(),
            notification,
        };
        let payload = serde_json::to_string(&envelope)?;
        let signature = generate_signature(&self.secret, &payload);

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", &signature)
            .header("X-Webhook-Event-Id", event_id.to_string())
            .body(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }

        tracing::debug!(%event_id, kind = notification.kind(), "notification delivered");
        Ok(())
    }
}

/// Generate HMAC-SHA256 signature for a relay payload.
///
/// # Format
///
/// `sha256=<hex_encoded_hmac>`
fn generate_signature(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(payload.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Validate relay URL format.
///
/// # Rules
///
/// - Must be valid URL
/// - Must be HTTPS (HTTP localhost allowed for development)
/// - Maximum 2048 characters
fn validate_relay_url(url: &str) -> Result<(), AppError> {
    if url.len() > 2048 {
        return Err(AppError::InvalidRequest(
            "Relay URL exceeds 2048 characters".to_string(),
        ));
    }

    let parsed = url::Url::parse(url)
        .map_err(|_| AppError::InvalidRequest("Invalid relay URL format".to_string()))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            if matches!(parsed.host_str(), Some("localhost" | "127.0.0.1" | "0.0.0.0")) {
                Ok(())
            } else {
                Err(AppError::InvalidRequest(
                    "HTTP is only allowed for localhost. Use HTTPS for production.".to_string(),
                ))
            }
        }
        _ => Err(AppError::InvalidRequest(
            "Relay URL must use HTTP or HTTPS".to_string(),
        )),
    }
}

/// Fire-and-forget front for a [`Notifier`].
///
/// Callers dispatch after their write has committed. By default delivery
/// runs on its own task, so a slow relay never holds up the response to the
/// provider or the user.
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    background: bool,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            background: true,
        }
    }

    /// Deliver before `dispatch` returns. For tests and one-shot tools that
    /// must observe delivery.
    pub fn inline(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            background: false,
        }
    }

    /// Deliver each notification in order. Failures are logged, never returned.
    pub async fn dispatch(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }

        if self.background {
            tokio::spawn(deliver(self.notifier.clone(), notifications));
        } else {
            deliver(self.notifier.clone(), notifications).await;
        }
    }
}

async fn deliver(notifier: Arc<dyn Notifier>, notifications: Vec<Notification>) {
    for notification in notifications {
        if let Err(e) = notifier.notify(&notification).await {
            tracing::error!(
                kind = notification.kind(),
                error = %e,
                "notification delivery failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FlakyNotifier {
        delivered: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            if let Notification::ProjectFunded { .. } = notification {
                return Err(NotifyError::Rejected(503));
            }
            self.delivered.lock().unwrap().push(notification.kind());
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatcher_swallows_failures_and_keeps_going() {
        let notifier = Arc::new(FlakyNotifier {
            delivered: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::inline(notifier.clone());

        dispatcher
            .dispatch(vec![
                Notification::ProjectFunded {
                    owner_email: "owner@example.com".into(),
                    project_title: "Library".into(),
                },
                Notification::DonationReceived {
                    donor_email: "donor@example.com".into(),
                    project_title: "Library".into(),
                    amount_cents: 2_550,
                },
            ])
            .await;

        assert_eq!(*notifier.delivered.lock().unwrap(), vec!["donation_received"]);
    }

    /// Blocks every delivery until released.
    struct GatedNotifier {
        gate: tokio::sync::Semaphore,
        delivered: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl Notifier for GatedNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            let _permit = self.gate.acquire().await.map_err(|_| NotifyError::Rejected(503))?;
            self.delivered.lock().unwrap().push(notification.kind());
            Ok(())
        }
    }

    #[tokio::test]
    async fn background_dispatch_returns_before_a_slow_delivery() {
        let notifier = Arc::new(GatedNotifier {
            gate: tokio::sync::Semaphore::new(0),
            delivered: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(notifier.clone());

        tokio::time::timeout(
            Duration::from_secs(1),
            dispatcher.dispatch(vec![Notification::ProjectFunded {
                owner_email: "owner@example.com".into(),
                project_title: "Library".into(),
            }]),
        )
        .await
        .expect("dispatch must not wait for the notifier");
        assert!(notifier.delivered.lock().unwrap().is_empty());

        notifier.gate.add_permits(1);
        for _ in 0..100 {
            if !notifier.delivered.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*notifier.delivered.lock().unwrap(), vec!["project_funded"]);
    }

    #[test]
    fn donation_body_renders_major_units() {
        let n = Notification::DonationReceived {
            donor_email: "donor@example.com".into(),
            project_title: "Library".into(),
            amount_cents: 2_505,
        };
        assert!(n.body().contains("25.05 to Library"));
        assert_eq!(n.recipients(), vec!["donor@example.com"]);
    }

    #[test]
    fn relay_url_must_be_https_outside_localhost() {
        assert!(validate_relay_url("https://mail.example.com/hooks").is_ok());
        assert!(validate_relay_url("http://localhost:8025/hooks").is_ok());
        assert!(validate_relay_url("http://mail.example.com/hooks").is_err());
        assert!(validate_relay_url("ftp://mail.example.com").is_err());
    }

    #[test]
    fn relay_signature_has_sha256_prefix() {
        let sig = generate_signature("secret", "{}");
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
    }
}

//! Persistence boundary for the reconciliation core.
//!
//! Every method that changes more than one row runs as one atomic unit:
//! the Postgres store uses a single database transaction with row locks,
//! the memory store holds its mutex for the whole operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::payment::{NewPayment, Payment, PaymentOutcome, PaymentStatus};
use crate::models::project::{Donation, Project, ProjectSnapshot};
use crate::models::user::User;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of crediting a donation to a locked project.
#[derive(Debug, Clone)]
pub struct Credit {
    pub donation: Donation,
    pub donor: User,
    pub project: ProjectSnapshot,
    /// True only for the write that moved the project to `finished`.
    pub project_finished: bool,
}

/// What `finalize_payment` did to the payment row.
#[derive(Debug, Clone)]
pub enum Transition {
    /// `pending -> paid`, with the donation created in the same unit.
    Paid { payment: Payment, credit: Credit },
    /// `pending -> failed`.
    Failed {
        payment: Payment,
        donor: User,
        project_title: String,
    },
    /// The payment was already terminal; nothing was written.
    AlreadyFinal(PaymentStatus),
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Cheap connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), AppError>;

    /// Resolve an active access token (by its SHA-256 hash) to its user.
    async fn user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, AppError>;

    /// Project plus its current donation total.
    async fn project_with_total(&self, project_id: Uuid)
    -> Result<Option<(Project, i64)>, AppError>;

    /// Record a pending payment. Order id and payment key must be unique.
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, AppError>;

    async fn payment_by_order_id(&self, order_id: &str) -> Result<Option<Payment>, AppError>;

    /// Move a pending payment to its terminal status.
    ///
    /// The status check-and-set, the donation insert, the `donation_id`
    /// attach and the project aggregate recomputation commit together or not
    /// at all. Concurrent callers on the same order id serialize; exactly one
    /// of them gets `Paid`/`Failed`, the rest get `AlreadyFinal`.
    async fn finalize_payment(
        &self,
        order_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<Transition, AppError>;

    /// Manual donation path. Validates against the locked project row so it
    /// serializes with `finalize_payment` on the "reached target" check.
    async fn record_donation(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        amount_cents: i64,
    ) -> Result<Credit, AppError>;

    /// Close every active project whose deadline passed before `now`.
    async fn close_expired_projects(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProjectSnapshot>, AppError>;
}

/// Checks shared by every path that accepts new funds for a project.
pub fn check_donation(
    project: &Project,
    total_cents: i64,
    amount_cents: i64,
) -> Result<(), AppError> {
    if amount_cents <= 0 {
        return Err(AppError::InvalidRequest(
            "Amount must be positive".to_string(),
        ));
    }

    if !project.accepts_donations() {
        return Err(AppError::ProjectClosed);
    }

    let remaining = project.remaining_cents(total_cents);
    if amount_cents > remaining {
        return Err(AppError::InvalidRequest(format!(
            "Donation exceeds remaining project target. Maximum allowed: {}",
            remaining
        )));
    }

    Ok(())
}

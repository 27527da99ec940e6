//! PostgreSQL implementation of [`PaymentStore`].
//!
//! # Locking Order
//!
//! `payments` row first, then `projects` row. The manual donation path only
//! takes the project lock, so the two paths cannot deadlock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction as DbTransaction};
use uuid::Uuid;

use super::{Credit, PaymentStore, Transition, check_donation};
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::payment::{NewPayment, Payment, PaymentOutcome, PaymentStatus};
use crate::models::project::{Donation, Project, ProjectSnapshot, ProjectStatus};
use crate::models::user::User;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The guarded update matched no row; report what the payment is now.
    async fn status_after_lost_update(&self, order_id: &str) -> Result<Transition, AppError> {
        let status: Option<PaymentStatus> =
            sqlx::query_scalar("SELECT status FROM payments WHERE provider_order_id = $1")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?;

        lost_update_transition(order_id, status)
    }
}

/// Only a terminal status counts as "already final". A payment that is
/// still pending after its guarded update failed is reported as an error so
/// the caller retries instead of acknowledging.
fn lost_update_transition(
    order_id: &str,
    status: Option<PaymentStatus>,
) -> Result<Transition, AppError> {
    match status {
        None => Err(AppError::PaymentNotFound),
        Some(status) if status.is_terminal() => Ok(Transition::AlreadyFinal(status)),
        Some(_) => {
            tracing::error!(order_id, "guarded update matched no row but payment is pending");
            Err(AppError::Database(sqlx::Error::Protocol(format!(
                "payment {order_id} still pending after guarded update"
            ))))
        }
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.email
            FROM auth_tokens t
            JOIN users u ON u.id = t.user_id
            WHERE t.token_hash = $1 AND t.is_active = true
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn project_with_total(
        &self,
        project_id: Uuid,
    ) -> Result<Option<(Project, i64)>, AppError> {
        let Some(project) = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM donations WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some((project, total)))
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, AppError> {
        let result = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                id,
                provider_order_id,
                provider_payment_key,
                amount_cents,
                currency,
                user_id,
                project_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(payment.id)
        .bind(&payment.provider_order_id)
        .bind(&payment.provider_payment_key)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(payment.user_id)
        .bind(payment.project_id)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(payment) => Ok(payment),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AppError::InvalidRequest(
                    "Provider order id or payment key already recorded".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn payment_by_order_id(&self, order_id: &str) -> Result<Option<Payment>, AppError> {
        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE provider_order_id = $1")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(payment)
    }

    async fn finalize_payment(
        &self,
        order_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<Transition, AppError> {
        let mut tx = self.pool.begin().await?;

        // A concurrent finalizer blocks here until the winner commits, then
        // reads the terminal status.
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE provider_order_id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::PaymentNotFound)?;

        if payment.status.is_terminal() {
            tx.rollback().await?;
            return Ok(Transition::AlreadyFinal(payment.status));
        }

        let transition = match outcome {
            PaymentOutcome::Success => {
                let (project, _) = lock_project(&mut tx, payment.project_id).await?;
                let credit =
                    credit_project(&mut tx, project, payment.user_id, payment.amount_cents).await?;

                // Status and donation reference move together; the CHECK
                // constraint rejects any other combination.
                let updated = sqlx::query_as::<_, Payment>(
                    r#"
                    UPDATE payments
                    SET status = 'paid',
                        donation_id = $2,
                        updated_at = NOW()
                    WHERE id = $1 AND status = 'pending'
                    RETURNING *
                    "#,
                )
                .bind(payment.id)
                .bind(credit.donation.id)
                .fetch_optional(&mut *tx)
                .await?;

                match updated {
                    Some(payment) => Transition::Paid { payment, credit },
                    None => {
                        tx.rollback().await?;
                        return self.status_after_lost_update(order_id).await;
                    }
                }
            }
            PaymentOutcome::Failure => {
                let updated = sqlx::query_as::<_, Payment>(
                    r#"
                    UPDATE payments
                    SET status = 'failed',
                        updated_at = NOW()
                    WHERE id = $1 AND status = 'pending'
                    RETURNING *
                    "#,
                )
                .bind(payment.id)
                .fetch_optional(&mut *tx)
                .await?;

                let Some(payment) = updated else {
                    tx.rollback().await?;
                    return self.status_after_lost_update(order_id).await;
                };

                let donor = fetch_user(&mut tx, payment.user_id).await?;
                let project_title: String =
                    sqlx::query_scalar("SELECT title FROM projects WHERE id = $1")
                        .bind(payment.project_id)
                        .fetch_optional(&mut *tx)
                        .await?
                        .ok_or(AppError::ProjectNotFound)?;

                Transition::Failed {
                    payment,
                    donor,
                    project_title,
                }
            }
        };

        tx.commit().await?;

        Ok(transition)
    }

    async fn record_donation(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        amount_cents: i64,
    ) -> Result<Credit, AppError> {
        let mut tx = self.pool.begin().await?;

        let (project, total) = lock_project(&mut tx, project_id).await?;

        if let Err(e) = check_donation(&project, total, amount_cents) {
            tx.rollback().await?;
            return Err(e);
        }

        let credit = credit_project(&mut tx, project, user_id, amount_cents).await?;

        tx.commit().await?;

        Ok(credit)
    }

    async fn close_expired_projects(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProjectSnapshot>, AppError> {
        let mut tx = self.pool.begin().await?;

        let closed = sqlx::query_as::<_, Project>(
            r#"
            UPDATE projects
            SET status = 'finished'
            WHERE status = 'active' AND end_time < $1
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut snapshots = Vec::with_capacity(closed.len());
        for project in closed {
            let total = donation_total(&mut tx, project.id).await?;
            let owner = fetch_user(&mut tx, project.owner_id).await?;
            snapshots.push(ProjectSnapshot {
                project,
                owner_email: owner.email,
                total_donations_cents: total,
            });
        }

        tx.commit().await?;

        Ok(snapshots)
    }
}

/// Lock the project row and read its current donation total.
async fn lock_project(
    tx: &mut DbTransaction<'_, Postgres>,
    project_id: Uuid,
) -> Result<(Project, i64), AppError> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1 FOR UPDATE")
        .bind(project_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::ProjectNotFound)?;

    let total = donation_total(tx, project_id).await?;

    Ok((project, total))
}

async fn donation_total(
    tx: &mut DbTransaction<'_, Postgres>,
    project_id: Uuid,
) -> Result<i64, AppError> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM donations WHERE project_id = $1",
    )
    .bind(project_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(total)
}

async fn fetch_user(
    tx: &mut DbTransaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<User, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT id, username, email FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;

    Ok(user)
}

/// Insert the donation and apply the guarded `finished` transition.
///
/// The caller must hold the project row lock taken by [`lock_project`].
async fn credit_project(
    tx: &mut DbTransaction<'_, Postgres>,
    mut project: Project,
    user_id: Uuid,
    amount_cents: i64,
) -> Result<Credit, AppError> {
    let donation = sqlx::query_as::<_, Donation>(
        r#"
        INSERT INTO donations (user_id, project_id, amount_cents)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(project.id)
    .bind(amount_cents)
    .fetch_one(&mut **tx)
    .await?;

    // Recomputed from the donations table, never carried forward.
    let total = donation_total(tx, project.id).await?;

    let mut project_finished = false;
    if project.reaches_target(total) {
        let updated = sqlx::query(
            "UPDATE projects SET status = 'finished' WHERE id = $1 AND status <> 'finished'",
        )
        .bind(project.id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if updated == 1 {
            project.status = ProjectStatus::Finished;
            project_finished = true;
        }
    }

    let donor = fetch_user(tx, user_id).await?;
    let owner = fetch_user(tx, project.owner_id).await?;

    Ok(Credit {
        donation,
        donor,
        project: ProjectSnapshot {
            project,
            owner_email: owner.email,
            total_donations_cents: total,
        },
        project_finished,
    })
}

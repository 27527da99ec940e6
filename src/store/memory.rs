//! In-process implementation of [`PaymentStore`].
//!
//! Holds every table behind one mutex. Each trait method takes the lock once
//! and performs all of its fallible lookups before the first write, so an
//! error leaves the state exactly as it was, like a rolled back transaction.
//! Used by the test suites and for running the service without Postgres.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Credit, PaymentStore, Transition, check_donation};
use crate::error::AppError;
use crate::middleware::auth::hash_token;
use crate::models::payment::{NewPayment, Payment, PaymentOutcome, PaymentStatus};
use crate::models::project::{Donation, Project, ProjectSnapshot, ProjectStatus};
use crate::models::user::User;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    /// token hash -> (user id, active)
    tokens: HashMap<String, (Uuid, bool)>,
    projects: HashMap<Uuid, Project>,
    donations: Vec<Donation>,
    /// keyed by provider order id
    payments: HashMap<String, Payment>,
    fail_next_write: bool,
}

impl Tables {
    fn donation_total(&self, project_id: Uuid) -> i64 {
        self.donations
            .iter()
            .filter(|d| d.project_id == project_id)
            .map(|d| d.amount_cents)
            .sum()
    }

    fn user(&self, user_id: Uuid) -> Result<User, AppError> {
        self.users
            .get(&user_id)
            .cloned()
            .ok_or(AppError::Database(sqlx::Error::RowNotFound))
    }

    fn take_injected_failure(&mut self) -> Result<(), AppError> {
        if std::mem::take(&mut self.fail_next_write) {
            return Err(AppError::Database(sqlx::Error::Protocol(
                "injected write failure".to_string(),
            )));
        }
        Ok(())
    }

    fn credit(
        &mut self,
        project_id: Uuid,
        user_id: Uuid,
        amount_cents: i64,
    ) -> Result<Credit, AppError> {
        let mut project = self
            .projects
            .get(&project_id)
            .cloned()
            .ok_or(AppError::ProjectNotFound)?;
        let donor = self.user(user_id)?;
        let owner = self.user(project.owner_id)?;

        let donation = Donation {
            id: Uuid::new_v4(),
            user_id,
            project_id,
            amount_cents,
            created_at: Utc::now(),
        };
        self.donations.push(donation.clone());

        let total = self.donation_total(project_id);
        let project_finished = project.reaches_target(total);
        if project_finished {
            project.status = ProjectStatus::Finished;
            self.projects.insert(project_id, project.clone());
        }

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
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_user(&self, username: &str, email: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
        };
        self.lock().users.insert(user.id, user.clone());
        user
    }

    /// Register `token` (stored hashed) as an active token of `user_id`.
    pub fn issue_token(&self, user_id: Uuid, token: &str) {
        self.lock().tokens.insert(hash_token(token), (user_id, true));
    }

    pub fn revoke_token(&self, token: &str) {
        if let Some(entry) = self.lock().tokens.get_mut(&hash_token(token)) {
            entry.1 = false;
        }
    }

    pub fn add_project(
        &self,
        owner_id: Uuid,
        title: &str,
        total_target_cents: i64,
        end_time: DateTime<Utc>,
    ) -> Project {
        let project = Project {
            id: Uuid::new_v4(),
            owner_id,
            title: title.to_string(),
            total_target_cents,
            status: ProjectStatus::Active,
            end_time,
            created_at: Utc::now(),
        };
        self.lock().projects.insert(project.id, project.clone());
        project
    }

    pub fn project(&self, project_id: Uuid) -> Option<Project> {
        self.lock().projects.get(&project_id).cloned()
    }

    pub fn donations_for(&self, project_id: Uuid) -> Vec<Donation> {
        self.lock()
            .donations
            .iter()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect()
    }

    /// Make the next multi-row write fail before anything is applied.
    pub fn fail_next_write(&self) {
        self.lock().fail_next_write = true;
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, AppError> {
        let tables = self.lock();
        let user = match tables.tokens.get(token_hash) {
            Some((user_id, true)) => tables.users.get(user_id).cloned(),
            _ => None,
        };
        Ok(user)
    }

    async fn project_with_total(
        &self,
        project_id: Uuid,
    ) -> Result<Option<(Project, i64)>, AppError> {
        let tables = self.lock();
        Ok(tables
            .projects
            .get(&project_id)
            .cloned()
            .map(|p| (p, tables.donation_total(project_id))))
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, AppError> {
        let mut tables = self.lock();

        let duplicate = tables.payments.values().any(|p| {
            p.provider_order_id == payment.provider_order_id
                || p.provider_payment_key == payment.provider_payment_key
        });
        if duplicate {
            return Err(AppError::InvalidRequest(
                "Provider order id or payment key already recorded".to_string(),
            ));
        }

        let now = Utc::now();
        let record = Payment {
            id: payment.id,
            provider_order_id: payment.provider_order_id,
            provider_payment_key: payment.provider_payment_key,
            amount_cents: payment.amount_cents,
            currency: payment.currency,
            status: PaymentStatus::Pending,
            donation_id: None,
            user_id: payment.user_id,
            project_id: payment.project_id,
            created_at: now,
            updated_at: now,
        };
        tables
            .payments
            .insert(record.provider_order_id.clone(), record.clone());

        Ok(record)
    }

    async fn payment_by_order_id(&self, order_id: &str) -> Result<Option<Payment>, AppError> {
        Ok(self.lock().payments.get(order_id).cloned())
    }

    async fn finalize_payment(
        &self,
        order_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<Transition, AppError> {
        let mut tables = self.lock();

        let payment = tables
            .payments
            .get(order_id)
            .cloned()
            .ok_or(AppError::PaymentNotFound)?;

        if payment.status.is_terminal() {
            return Ok(Transition::AlreadyFinal(payment.status));
        }

        tables.take_injected_failure()?;

        match outcome {
            PaymentOutcome::Success => {
                let credit =
                    tables.credit(payment.project_id, payment.user_id, payment.amount_cents)?;

                let mut paid = payment;
                paid.status = PaymentStatus::Paid;
                paid.donation_id = Some(credit.donation.id);
                paid.updated_at = Utc::now();
                tables.payments.insert(order_id.to_string(), paid.clone());

                Ok(Transition::Paid {
                    payment: paid,
                    credit,
                })
            }
            PaymentOutcome::Failure => {
                let donor = tables.user(payment.user_id)?;
                let project_title = tables
                    .projects
                    .get(&payment.project_id)
                    .map(|p| p.title.clone())
                    .ok_or(AppError::ProjectNotFound)?;

                let mut failed = payment;
                failed.status = PaymentStatus::Failed;
                failed.updated_at = Utc::now();
                tables.payments.insert(order_id.to_string(), failed.clone());

                Ok(Transition::Failed {
                    payment: failed,
                    donor,
                    project_title,
                })
            }
        }
    }

    async fn record_donation(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        amount_cents: i64,
    ) -> Result<Credit, AppError> {
        let mut tables = self.lock();

        let project = tables
            .projects
            .get(&project_id)
            .cloned()
            .ok_or(AppError::ProjectNotFound)?;
        check_donation(&project, tables.donation_total(project_id), amount_cents)?;
        tables.take_injected_failure()?;

        tables.credit(project_id, user_id, amount_cents)
    }

    async fn close_expired_projects(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProjectSnapshot>, AppError> {
        let mut tables = self.lock();

        let expired: Vec<Project> = tables
            .projects
            .values()
            .filter(|p| p.is_past_deadline(now))
            .cloned()
            .collect();

        let mut snapshots = Vec::with_capacity(expired.len());
        for project in &expired {
            let owner = tables.user(project.owner_id)?;
            snapshots.push(ProjectSnapshot {
                project: Project {
                    status: ProjectStatus::Finished,
                    ..project.clone()
                },
                owner_email: owner.email,
                total_donations_cents: tables.donation_total(project.id),
            });
        }

        for snapshot in &snapshots {
            tables
                .projects
                .insert(snapshot.project.id, snapshot.project.clone());
        }

        Ok(snapshots)
    }
}

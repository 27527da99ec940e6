//! Project and donation models.
//!
//! Projects are provisioned elsewhere; this service only reads them, adds
//! donations to them and flips their status to `finished`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "project_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Finished,
    Cancelled,
}

/// Represents a project record from the database.
///
/// The cumulative donation total is never stored; it is always recomputed
/// as the sum over the `donations` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Project {
    pub id: Uuid,

    pub owner_id: Uuid,

    pub title: String,

    /// Funding goal in minor units
    pub total_target_cents: i64,

    pub status: ProjectStatus,

    /// Deadline after which the sweep closes the project
    pub end_time: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Whether a donation total of `total_cents` moves this project to `finished`.
    ///
    /// False once the project is already finished, so the transition fires at
    /// most once.
    pub fn reaches_target(&self, total_cents: i64) -> bool {
        self.status != ProjectStatus::Finished && total_cents >= self.total_target_cents
    }

    /// Amount still accepted before the target is met.
    pub fn remaining_cents(&self, total_cents: i64) -> i64 {
        (self.total_target_cents - total_cents).max(0)
    }

    pub fn accepts_donations(&self) -> bool {
        self.status == ProjectStatus::Active
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.status == ProjectStatus::Active && self.end_time < now
    }
}

/// Immutable record of funds attributed to a project by a user.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Donation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// Request body for `POST /api/v1/donations`.
#[derive(Debug, Deserialize)]
pub struct CreateDonationRequest {
    pub project_id: Uuid,
    pub amount_cents: i64,
}

/// Snapshot of a project taken inside the transaction that changed it.
#[derive(Debug, Clone)]
pub struct ProjectSnapshot {
    pub project: Project,
    pub owner_email: String,
    pub total_donations_cents: i64,
}

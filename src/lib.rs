//! Crowdfunding payment reconciliation service.
//!
//! A payment opened from a provider intention is finalized exactly once,
//! whether the provider's callback or the polling fallback gets there first.
//! Both drivers funnel into [`services::ledger::PaymentLedger::finalize`],
//! which owns the only `pending -> paid | failed` transition.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod provider;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod workers;

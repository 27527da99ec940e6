//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables.

/// Payment ledger model
pub mod payment;
/// Project and donation models
pub mod project;
/// Users and access tokens
pub mod user;

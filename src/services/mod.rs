//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! The ledger owns payment transitions; the two drivers only call it.

pub mod donation_service;
pub mod intention_service;
pub mod ledger;
pub mod notifier;
pub mod polling_driver;
pub mod webhook_driver;

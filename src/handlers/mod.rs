//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to a service or driver
//! 3. Returns HTTP response (JSON, status code)

pub mod donations;
pub mod health;
pub mod payments;
/// Provider callback endpoint
pub mod webhooks;

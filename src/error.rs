//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// This enum represents all possible errors that can occur in the application.
/// Each variant maps to a specific HTTP status code and error message.
///
/// # Error Categories
///
/// - **Database Errors**: Any sqlx::Error from database operations
/// - **Authentication Errors**: Invalid bearer tokens, forged provider callbacks
/// - **Resource Errors**: Requested payment or project not found
/// - **Reconciliation Errors**: Provider failures and exhausted verification
/// - **Validation Errors**: Invalid request data
///
/// An already finalized payment is not an error; see
/// [`FinalizeResult::AlreadyFinalized`](crate::services::ledger::FinalizeResult).
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    ///
    /// This wraps any sqlx::Error using the `#[from]` attribute, which
    /// automatically implements `From<sqlx::Error> for AppError`.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Bearer token is missing, invalid, or inactive.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid access token")]
    InvalidToken,

    /// Provider callback HMAC is missing or does not match.
    ///
    /// Returns HTTP 401 Unauthorized. Never mutates state.
    #[error("Invalid callback signature")]
    InvalidSignature,

    /// No payment is recorded for the provider order id.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Payment not found")]
    PaymentNotFound,

    /// Project does not exist.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Project not found")]
    ProjectNotFound,

    /// Project is cancelled or finished and accepts no more funds.
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("Project is not accepting donations")]
    ProjectClosed,

    /// Payment provider answered with a non-2xx status or a malformed body.
    ///
    /// Returns HTTP 502 Bad Gateway. The payment stays pending.
    #[error("Payment provider error: {0}")]
    Provider(String),

    /// Polling exhausted its attempts without a definitive provider answer.
    ///
    /// Returns HTTP 504 Gateway Timeout. The payment stays pending.
    #[error("Payment not settled after {attempts} attempts")]
    VerificationTimeout { attempts: u32 },

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    /// The String contains details about what was invalid.
    #[error("Invalid request")]
    InvalidRequest(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `InvalidToken`, `InvalidSignature` → 401 Unauthorized
/// - `PaymentNotFound`, `ProjectNotFound` → 404 Not Found
/// - `ProjectClosed` → 422 Unprocessable Entity
/// - `InvalidRequest` → 400 Bad Request
/// - `Provider` → 502 Bad Gateway
/// - `VerificationTimeout` → 504 Gateway Timeout
/// - `Database` → 500 Internal Server Error (hides details from client)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                self.to_string(),
            ),
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                self.to_string(),
            ),
            AppError::PaymentNotFound => {
                (StatusCode::NOT_FOUND, "payment_not_found", self.to_string())
            }
            AppError::ProjectNotFound => {
                (StatusCode::NOT_FOUND, "project_not_found", self.to_string())
            }
            AppError::ProjectClosed => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "project_closed",
                self.to_string(),
            ),
            AppError::Provider(_) => (
                StatusCode::BAD_GATEWAY,
                "provider_error",
                "The payment provider could not be reached".to_string(),
            ),
            AppError::VerificationTimeout { .. } => (
                StatusCode::GATEWAY_TIMEOUT,
                "verification_timeout",
                self.to_string(),
            ),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

//! Bearer token authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the access token from the Authorization header
//! 2. Hash it and resolve it to a user through the store
//! 3. Inject authentication context into the request
//! 4. Reject unauthorized requests with HTTP 401

use crate::{error::AppError, state::AppState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Authentication context attached to authenticated requests.
///
/// This struct is inserted into the request's extension map and can be
/// extracted by route handlers to know who made the request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Authenticated user; payments and donations are attributed to it
    pub user_id: Uuid,

    pub username: String,

    /// Used as billing email for intentions
    pub email: String,
}

/// Hex-encoded SHA-256 of a raw access token, as stored in `auth_tokens`.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Bearer token authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <token>` header from request
/// 2. Hash the `<token>` using SHA-256
/// 3. Resolve the hash to an active token's user
/// 4. If found: inject `AuthContext` into request, call next handler
/// 5. If not found: return 401 Unauthorized error
///
/// # Returns
///
/// - `Ok(Response)` if authenticated successfully (calls next handler)
/// - `Err(AppError::InvalidToken)` if authentication fails (returns 401)
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidToken)?;

    // Expected format: "Bearer <token>"
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::InvalidToken)?;

    let user = state
        .store
        .user_by_token_hash(&hash_token(token))
        .await?
        .ok_or(AppError::InvalidToken)?;

    // Route handlers can now extract this using Extension<AuthContext>
    request.extensions_mut().insert(AuthContext {
        user_id: user.id,
        username: user.username,
        email: user.email,
    });

    Ok(next.run(request).await)
}

//! User and access token models.
//!
//! Accounts are created by the registration flow, which lives outside this
//! service. Tokens are stored as SHA-256 hashes.

use uuid::Uuid;

/// Represents a user record from the database.
///
/// # Database Tables
///
/// Maps to the `users` table. Access tokens live in `auth_tokens`
/// (`user_id`, `token_hash`, `is_active`) and resolve to a `User`:
/// when a request comes in with "Bearer abc123", we
/// 1. Hash "abc123" with SHA-256
/// 2. Look up this hash among active tokens
/// 3. If found, authenticate the request as the token's user
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

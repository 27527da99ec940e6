//! Database connection pool and migration management.
//!
//! The schema (`migrations/`) holds users and their auth tokens, projects,
//! donations and payments. The `payments` table carries the invariant the
//! ledger relies on as a CHECK constraint: a donation is linked exactly when
//! the payment is `paid`.

use sqlx::{Pool, Postgres};

/// Type alias for PostgreSQL connection pool.
pub type DbPool = Pool<Postgres>;

/// Create a new PostgreSQL connection pool.
///
/// # Configuration
///
/// - Maximum connections: 5
/// - Connections are created lazily as needed
///
/// # Errors
///
/// Returns an error if the connection string is invalid or the server
/// cannot be reached or refuses the credentials.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        // Limit concurrent connections
        .max_connections(5)
        .connect(database_url)
        .await
}

/// Run database migrations from the `migrations/` directory.
///
/// Migrations are tracked in `_sqlx_migrations`, so each runs only once.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    // The macro reads migrations at compile time from ./migrations directory
    sqlx::migrate!("./migrations").run(pool).await
}

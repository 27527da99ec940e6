//! Crowdfunding Payment Service - Main Application Entry Point
//!
//! REST API that opens provider payment intentions for project donations and
//! reconciles their outcome, from the provider callback or from polling,
//! into exactly one donation per paid payment.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: bearer tokens with SHA-256 hashing
//! - **Payment provider**: Paymob Accept over reqwest
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Build the provider client, notifier and application state
//! 4. Spawn the project deadline sweeper
//! 5. Serve HTTP until ctrl-c, then stop the sweeper

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crowdfunding_web_server::{
    config::Config,
    db,
    provider::PaymobClient,
    routes,
    services::notifier::{Dispatcher, LogNotifier, Notifier, RelayNotifier},
    state::{AppState, ServiceSettings},
    store::PgStore,
    workers::project_sweeper::ProjectSweeper,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let store = Arc::new(PgStore::new(pool));

    let provider = Arc::new(PaymobClient::new(
        &config.paymob_base_url,
        config.paymob_api_key.clone(),
        config.paymob_secret_key.clone(),
        config.paymob_integration_id,
        config.provider_timeout(),
    )?);

    let notifier: Arc<dyn Notifier> = match (
        config.notification_relay_url.clone(),
        config.notification_relay_secret.clone(),
    ) {
        (Some(url), Some(secret)) => {
            tracing::info!(relay_url = %url, "Notifications go to mail relay");
            Arc::new(RelayNotifier::new(url, secret)?)
        }
        _ => {
            tracing::info!("No mail relay configured, notifications are only logged");
            Arc::new(LogNotifier)
        }
    };
    let dispatcher = Dispatcher::new(notifier);

    let state = AppState::new(
        store.clone(),
        provider,
        dispatcher.clone(),
        ServiceSettings::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ProjectSweeper::new(
        store,
        dispatcher,
        config.admin_emails.clone(),
        config.sweep_interval(),
    );
    let sweeper_handle = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    let app = routes::router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    sweeper_handle.await?;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

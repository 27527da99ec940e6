//! HTTP routing table.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware;
use crate::state::AppState;

/// Build the application router.
///
/// The provider callback is public (it authenticates with its HMAC), every
/// `/api/v1` route a user calls requires a bearer token.
pub fn router(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        .route(
            "/api/v1/payments/intentions",
            post(handlers::payments::create_intention),
        )
        .route(
            "/api/v1/payments/{order_id}",
            get(handlers::payments::get_payment),
        )
        .route(
            "/api/v1/payments/{order_id}/verify",
            post(handlers::payments::verify_payment),
        )
        .route("/api/v1/donations", post(handlers::donations::create_donation))
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api/v1/payments/paymob/callback",
            post(handlers::webhooks::paymob_callback),
        )
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

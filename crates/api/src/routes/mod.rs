//! HTTP routes

pub mod health;
pub mod members;
pub mod paypal;
pub mod webhooks;


use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::auth::require_webhook_secret;
use crate::state::AppState;

/// Build the application router. Only the shared-secret webhook endpoints sit
/// behind [`require_webhook_secret`]; PayPal deliveries are checked by
/// signature instead.
pub fn create_router(state: AppState) -> Router {
    let secret_webhooks = Router::new()
        .route("/webhook", post(webhooks::member_webhook))
        .route("/webhook/donation", post(webhooks::donation_webhook))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_webhook_secret,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/stats", get(members::stats))
        .route("/members", get(members::list_members))
        .route("/api/paypal/webhook", post(paypal::paypal_webhook))
        .merge(secret_webhooks)
        .with_state(state)
}

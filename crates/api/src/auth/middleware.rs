//! Shared-secret authentication middleware for Axum
//!
//! Webhook senders prove themselves with one shared secret, presented in
//! whichever form the sending platform supports:
//! - `Authorization: Bearer <secret>`
//! - `Authorization: Basic ...` with the secret in the username or password slot
//! - `X-Webhook-Secret: <secret>`

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub const WEBHOOK_SECRET_HEADER: &str = "X-Webhook-Secret";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid webhook secret")]
    InvalidSecret,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = StatusCode::UNAUTHORIZED;
        let body = Json(json!({
            "error": "Unauthorized",
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Every secret-shaped value the request carries
fn presented_secrets(headers: &HeaderMap) -> Vec<String> {
    let mut candidates = Vec::new();

    if let Some(header) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        if let Some(token) = header.strip_prefix("Bearer ") {
            candidates.push(token.to_string());
        } else if let Some(encoded) = header.strip_prefix("Basic ") {
            // Zapier puts the secret in either slot
            if let Some((user, password)) = decode_basic(encoded) {
                candidates.push(user);
                candidates.push(password);
            }
        }
    }

    if let Some(secret) = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|h| h.to_str().ok())
    {
        candidates.push(secret.to_string());
    }

    candidates
}

fn decode_basic(encoded: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (user, password) = credentials.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn secret_matches(candidate: &str, secret: &str) -> bool {
    candidate.as_bytes().ct_eq(secret.as_bytes()).into()
}

/// Check the request headers against the shared secret
pub fn authorize(headers: &HeaderMap, secret: &str) -> Result<(), AuthError> {
    let candidates = presented_secrets(headers);
    if candidates.is_empty() {
        return Err(AuthError::MissingAuth);
    }

    // Compare against every candidate so timing does not reveal which slot matched
    let matched = candidates
        .iter()
        .fold(false, |found, candidate| found | secret_matches(candidate, secret));

    if matched {
        Ok(())
    } else {
        Err(AuthError::InvalidSecret)
    }
}

/// Middleware that requires the shared webhook secret
pub async fn require_webhook_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match authorize(request.headers(), &state.config.webhook_secret) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            tracing::warn!(
                path = %request.uri().path(),
                error = %err,
                "require_webhook_secret: authentication failed"
            );
            err.into_response()
        }
    }
}

//! PayPal subscription webhooks
//!
//! PayPal cannot send our shared secret, so deliveries are checked against
//! PayPal's signature API instead. A failed check is logged and processing
//! continues.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use donorsync_membership::{PaypalEvent, TransmissionHeaders, WebhookLogEntry, WebhookSource};

use super::webhooks::{acknowledge, parse_payload, WebhookAck};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn transmission_headers(headers: &HeaderMap) -> TransmissionHeaders {
    TransmissionHeaders {
        auth_algo: header(headers, "paypal-auth-algo"),
        cert_url: header(headers, "paypal-cert-url"),
        transmission_id: header(headers, "paypal-transmission-id"),
        transmission_sig: header(headers, "paypal-transmission-sig"),
        transmission_time: header(headers, "paypal-transmission-time"),
    }
}

async fn check_signature(state: &AppState, headers: &HeaderMap, payload: &serde_json::Value) {
    let Some(verifier) = &state.paypal_verifier else {
        return;
    };

    let transmission = transmission_headers(headers);
    match verifier.verify(&transmission, payload).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(
            transmission_id = %transmission.transmission_id,
            "Invalid PayPal webhook signature, processing anyway"
        ),
        Err(e) => tracing::warn!(
            transmission_id = %transmission.transmission_id,
            error = %e,
            "Could not verify PayPal webhook signature, processing anyway"
        ),
    }
}

pub async fn paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let (payload, event): (_, PaypalEvent) = parse_payload(&body)?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "PayPal webhook received"
    );

    check_signature(&state, &headers, &payload).await;

    let normalized = event.normalize().map_err(|e| {
        tracing::warn!(event_id = %event.id, error = %e, "Rejected PayPal webhook");
        ApiError::from(e)
    })?;

    let Some(normalized) = normalized else {
        let entry = WebhookLogEntry {
            source: WebhookSource::Paypal,
            email: None,
            status: None,
            payload,
        };
        if let Err(e) = state.store.log_webhook(&entry).await {
            tracing::warn!(error = %e, "Failed to log webhook");
        }
        return Ok(Json(WebhookAck::ignored()));
    };

    let result = state
        .reconciler
        .ingest(WebhookSource::Paypal, &payload, &normalized)
        .await;
    acknowledge(&state, WebhookSource::Paypal, result)
}

//! Shared-secret webhook endpoints
//!
//! `POST /webhook` takes the generic automation-platform shape and
//! `POST /webhook/donation` the donation-platform shape with amounts. Both
//! normalize, write the audit log and reconcile.

use axum::{body::Bytes, extract::State, Json};
use donorsync_membership::{
    DonationWebhook, MembershipResult, MemberWebhook, Outcome, WebhookSource,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body returned to webhook senders
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl WebhookAck {
    pub fn processed(outcome: Outcome) -> Self {
        Self {
            status: "ok",
            outcome: Some(outcome),
        }
    }

    /// Processing failed but the sender is told to stop retrying
    pub fn accepted() -> Self {
        Self {
            status: "accepted",
            outcome: None,
        }
    }

    pub fn ignored() -> Self {
        Self {
            status: "ignored",
            outcome: None,
        }
    }
}

/// Parse the raw body, keeping the untyped payload for the audit log
pub(crate) fn parse_payload<T: DeserializeOwned>(body: &Bytes) -> ApiResult<(serde_json::Value, T)> {
    let payload: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ApiError::InvalidJson(e.to_string()))?;
    let typed =
        serde_json::from_value(payload.clone()).map_err(|e| ApiError::InvalidJson(e.to_string()))?;
    Ok((payload, typed))
}

/// Turn a reconciliation result into the sender-facing response.
///
/// With `always_acknowledge_webhooks` on, failures are logged and the sender
/// still gets 200.
pub(crate) fn acknowledge(
    state: &AppState,
    source: WebhookSource,
    result: MembershipResult<Outcome>,
) -> ApiResult<Json<WebhookAck>> {
    match result {
        Ok(outcome) => Ok(Json(WebhookAck::processed(outcome))),
        Err(e) if state.config.always_acknowledge_webhooks => {
            tracing::error!(
                source = source.as_str(),
                error = %e,
                "Webhook processing failed, acknowledging to suppress retries"
            );
            Ok(Json(WebhookAck::accepted()))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn member_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let (payload, webhook): (_, MemberWebhook) = parse_payload(&body)?;

    let event = webhook.normalize().map_err(|e| {
        tracing::warn!(error = %e, "Rejected member webhook");
        ApiError::from(e)
    })?;

    tracing::info!(
        email = %event.identity.describe(),
        status = %event.status,
        anonymous = event.is_anonymous,
        "Member webhook received"
    );

    let result = state
        .reconciler
        .ingest(WebhookSource::Generic, &payload, &event)
        .await;
    acknowledge(&state, WebhookSource::Generic, result)
}

pub async fn donation_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let (payload, webhook): (_, DonationWebhook) = parse_payload(&body)?;

    let event = webhook.normalize().map_err(|e| {
        tracing::warn!(error = %e, "Rejected donation webhook");
        ApiError::from(e)
    })?;

    tracing::info!(
        email = %event.identity.describe(),
        status = %event.status,
        amount = ?event.payment.as_ref().map(|p| p.amount.as_str()),
        recurring = event.monthly_amount.is_some(),
        "Donation webhook received"
    );

    let result = state
        .reconciler
        .ingest(WebhookSource::Donation, &payload, &event)
        .await;
    acknowledge(&state, WebhookSource::Donation, result)
}

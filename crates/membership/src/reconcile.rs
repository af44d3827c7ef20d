//! Reconciliation engine
//!
//! Merges one [`NormalizedEvent`] into the member store: find-or-create the
//! member, apply the update rules, and append status history only when the
//! status actually changes.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{MembershipError, MembershipResult};
use crate::normalize::{IdentityKeys, NormalizedEvent};
use crate::store::{MemberStore, MemberUpdate, NewMember, WebhookLogEntry, WebhookSource};

/// What a reconciliation did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// First event for this identity; member and initial history row created
    Created,
    /// Existing member moved to a new status; one history row appended
    Updated,
    /// Existing member refreshed, status unchanged; no history row
    Unchanged,
    /// Nothing matched and the event has no email to create a member from
    Unmatched,
}

/// Build the row for a first-seen member
pub fn new_member(email: &str, event: &NormalizedEvent) -> NewMember {
    NewMember {
        email: email.to_string(),
        name: stored_name(event),
        is_anonymous: event.is_anonymous,
        status: event.status,
        subscription_id: event.identity.subscription_id.clone(),
        payer_id: event.identity.payer_id.clone(),
        monthly_amount: event.monthly_amount.clone(),
        referred_by: event.referred_by.clone(),
    }
}

/// Build the in-place update for an existing member.
///
/// The name is kept when the event is anonymous or carries no name;
/// anonymity is checked first. Anonymity is always overwritten, and status is
/// too unless the event only reports a payment.
pub fn plan_update(event: &NormalizedEvent) -> MemberUpdate {
    MemberUpdate {
        name: stored_name(event),
        is_anonymous: event.is_anonymous,
        status: (!event.payment_only).then_some(event.status),
        subscription_id: event.identity.subscription_id.clone(),
        payer_id: event.identity.payer_id.clone(),
        monthly_amount: event.monthly_amount.clone(),
    }
}

fn stored_name(event: &NormalizedEvent) -> Option<String> {
    if event.is_anonymous || event.name.is_empty() {
        None
    } else {
        Some(event.name.clone())
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn MemberStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn MemberStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MemberStore> {
        &self.store
    }

    /// Write the audit log entry, then reconcile.
    ///
    /// The audit write is best-effort: a failure is logged and processing
    /// continues.
    pub async fn ingest(
        &self,
        source: WebhookSource,
        payload: &serde_json::Value,
        event: &NormalizedEvent,
    ) -> MembershipResult<Outcome> {
        let entry = WebhookLogEntry {
            source,
            email: event.identity.email.clone(),
            status: (!event.payment_only).then_some(event.status),
            payload: payload.clone(),
        };
        if let Err(e) = self.store.log_webhook(&entry).await {
            tracing::warn!(
                source = source.as_str(),
                member = %event.identity.describe(),
                error = %e,
                "Failed to log webhook"
            );
        }

        self.reconcile(event).await
    }

    pub async fn reconcile(&self, event: &NormalizedEvent) -> MembershipResult<Outcome> {
        match self.store.find_member(&event.identity).await? {
            Some(member) => self.update_existing(member.id, &member.email, event).await,
            None => self.create_new(event).await,
        }
    }

    async fn create_new(&self, event: &NormalizedEvent) -> MembershipResult<Outcome> {
        if event.payment_only {
            tracing::warn!(
                member = %event.identity.describe(),
                "No member matches payment, not recorded"
            );
            return Ok(Outcome::Unmatched);
        }

        let Some(email) = event.email() else {
            tracing::warn!(
                subscription_id = ?event.identity.subscription_id,
                payer_id = ?event.identity.payer_id,
                status = %event.status,
                "No member matches event and it carries no email"
            );
            return Ok(Outcome::Unmatched);
        };

        let Some(member_id) = self.store.insert_member(&new_member(email, event)).await? else {
            // Another request created this email between our lookup and insert
            tracing::debug!(email = %email, "Member created concurrently, updating instead");
            let member = self
                .store
                .find_member(&IdentityKeys::from_email(email.to_string()))
                .await?
                .ok_or_else(|| MembershipError::MemberNotFound(email.to_string()))?;
            return self.update_existing(member.id, &member.email, event).await;
        };

        self.store.append_history(member_id, event.status).await?;
        self.record_payment(member_id, email, event).await;

        tracing::info!(
            email = %email,
            member_id = %member_id,
            status = %event.status,
            "Created new member"
        );
        Ok(Outcome::Created)
    }

    async fn update_existing(
        &self,
        member_id: Uuid,
        email: &str,
        event: &NormalizedEvent,
    ) -> MembershipResult<Outcome> {
        let update = plan_update(event);
        let previous = self
            .store
            .update_member(member_id, &update)
            .await?
            .ok_or_else(|| MembershipError::MemberNotFound(email.to_string()))?;

        self.record_payment(member_id, email, event).await;

        let Some(status) = update.status.filter(|s| *s != previous) else {
            tracing::info!(
                email = %email,
                member_id = %member_id,
                status = %previous,
                "Member status unchanged"
            );
            return Ok(Outcome::Unchanged);
        };

        self.store.append_history(member_id, status).await?;
        tracing::info!(
            email = %email,
            member_id = %member_id,
            from = %previous,
            to = %status,
            "Updated member status"
        );
        Ok(Outcome::Updated)
    }

    /// Payment recording never fails the reconciliation
    async fn record_payment(&self, member_id: Uuid, email: &str, event: &NormalizedEvent) {
        let Some(payment) = &event.payment else {
            return;
        };

        match self.store.record_payment(member_id, payment).await {
            Ok(true) => tracing::info!(
                email = %email,
                transaction_id = %payment.transaction_id,
                amount = %payment.amount,
                currency = ?payment.currency,
                "Payment recorded"
            ),
            Ok(false) => tracing::debug!(
                transaction_id = %payment.transaction_id,
                "Payment already recorded"
            ),
            Err(e) => tracing::warn!(
                email = %email,
                transaction_id = %payment.transaction_id,
                error = %e,
                "Failed to record payment"
            ),
        }
    }
}

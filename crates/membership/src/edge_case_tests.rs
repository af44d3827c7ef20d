// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Membership Reconciliation
//!
//! End-to-end paths through normalizer, reconciler and store:
//! - Webhook scenarios (MEM-W01 to MEM-W06)
//! - PayPal lifecycle (MEM-P01 to MEM-P05)
//! - Webhook then batch round trips (MEM-B01 to MEM-B03)

#[cfg(test)]
mod webhook_tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::normalize::{DonationWebhook, IdentityKeys, MemberWebhook};
    use crate::reconcile::{Outcome, Reconciler};
    use crate::status::MemberStatus;
    use crate::store::{InMemoryMemberStore, MemberStore};

    fn setup() -> (Arc<InMemoryMemberStore>, Reconciler) {
        let store = Arc::new(InMemoryMemberStore::new());
        (store.clone(), Reconciler::new(store))
    }

    async fn reconcile_json(reconciler: &Reconciler, payload: serde_json::Value) -> Outcome {
        let webhook: MemberWebhook = serde_json::from_value(payload).unwrap();
        reconciler.reconcile(&webhook.normalize().unwrap()).await.unwrap()
    }

    // =========================================================================
    // MEM-W01: Mixed-case padded email, anonymous "True" with a name
    // =========================================================================
    #[tokio::test]
    async fn test_anonymous_success_creates_nameless_active_member() {
        let (store, reconciler) = setup();

        let outcome = reconcile_json(
            &reconciler,
            json!({
                "email": "A@B.com ",
                "status": "Payment Succeeded",
                "anonymous": "True",
                "name": "Jane"
            }),
        )
        .await;
        assert_eq!(outcome, Outcome::Created);

        let member = store
            .find_member(&IdentityKeys::from_email("a@b.com".into()))
            .await
            .unwrap()
            .expect("member stored under normalized email");
        assert_eq!(member.email, "a@b.com");
        assert_eq!(member.status, MemberStatus::Active);
        assert!(member.is_anonymous);
        assert_eq!(member.name, None);
    }

    // =========================================================================
    // MEM-W02: Follow-up "Failed" cancels with exactly one new history row
    // =========================================================================
    #[tokio::test]
    async fn test_failed_follow_up_cancels_with_one_history_row() {
        let (store, reconciler) = setup();

        reconcile_json(
            &reconciler,
            json!({ "email": "A@B.com ", "status": "Payment Succeeded", "anonymous": "True", "name": "Jane" }),
        )
        .await;
        let outcome =
            reconcile_json(&reconciler, json!({ "email": "a@b.com", "status": "Failed" })).await;
        assert_eq!(outcome, Outcome::Updated);

        let member = store
            .find_member(&IdentityKeys::from_email("a@b.com".into()))
            .await
            .unwrap()
            .unwrap();
        let history = store.status_history(member.id).await.unwrap();
        assert_eq!(history.len(), 2, "initial row plus one transition");
        assert_eq!(history[1].status, MemberStatus::Cancelled);
    }

    // =========================================================================
    // MEM-W03: Boolean anonymous flag is accepted like the string form
    // =========================================================================
    #[tokio::test]
    async fn test_boolean_anonymous_flag() {
        let (store, reconciler) = setup();

        reconcile_json(
            &reconciler,
            json!({ "email": "b@c.com", "status": "active", "anonymous": true, "name": "Bob" }),
        )
        .await;

        let member = store
            .find_member(&IdentityKeys::from_email("b@c.com".into()))
            .await
            .unwrap()
            .unwrap();
        assert!(member.is_anonymous);
        assert_eq!(member.name, None);
    }

    // =========================================================================
    // MEM-W04: Empty name on a later event keeps the stored one
    // =========================================================================
    #[tokio::test]
    async fn test_empty_name_keeps_stored_name() {
        let (store, reconciler) = setup();

        reconcile_json(&reconciler, json!({ "email": "c@d.com", "name": "Carol" })).await;
        reconcile_json(&reconciler, json!({ "email": "c@d.com", "name": "  " })).await;

        let member = store
            .find_member(&IdentityKeys::from_email("c@d.com".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(member.name.as_deref(), Some("Carol"));
    }

    // =========================================================================
    // MEM-W05: Unrecognized status falls through to active
    // =========================================================================
    #[tokio::test]
    async fn test_unrecognized_status_defaults_active() {
        let (store, reconciler) = setup();

        reconcile_json(&reconciler, json!({ "email": "d@e.com", "status": "foobar" })).await;

        let member = store
            .find_member(&IdentityKeys::from_email("d@e.com".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(member.status, MemberStatus::Active);
    }

    // =========================================================================
    // MEM-W06: Recurring donation sets monthly amount and records payment once
    // =========================================================================
    #[tokio::test]
    async fn test_recurring_donation_tracks_money() {
        let (store, reconciler) = setup();

        let payload = json!({
            "email": "donor@x.org",
            "status": "succeeded",
            "amount": 25,
            "currency": "USD",
            "frequency": "Monthly",
            "donation_id": "don-1"
        });
        let webhook: DonationWebhook = serde_json::from_value(payload).unwrap();
        let event = webhook.normalize().unwrap();

        reconciler.reconcile(&event).await.unwrap();
        reconciler.reconcile(&event).await.unwrap();

        assert_eq!(store.monthly_amount("donor@x.org").await, Some(25.0));
        assert_eq!(store.total_donated("donor@x.org").await, Some(25.0));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.monthly_revenue, 25.0);
        assert_eq!(stats.total_donated, 25.0);
    }
}

#[cfg(test)]
mod paypal_tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::normalize::{IdentityKeys, PaypalEvent};
    use crate::reconcile::{Outcome, Reconciler};
    use crate::status::MemberStatus;
    use crate::store::{InMemoryMemberStore, MemberStore};

    fn setup() -> (Arc<InMemoryMemberStore>, Reconciler) {
        let store = Arc::new(InMemoryMemberStore::new());
        (store.clone(), Reconciler::new(store))
    }

    fn subscription_event(event_type: &str, email: &str) -> PaypalEvent {
        serde_json::from_value(json!({
            "id": "WH-1",
            "event_type": event_type,
            "resource": {
                "id": "I-SUB1",
                "custom_id": "referrer:friend@x.org",
                "subscriber": {
                    "email_address": email,
                    "payer_id": "PAYER1",
                    "name": { "given_name": "Pat", "surname": "Lee" }
                }
            }
        }))
        .unwrap()
    }

    async fn reconcile(reconciler: &Reconciler, event: &PaypalEvent) -> Outcome {
        let normalized = event.normalize().unwrap().expect("handled event type");
        reconciler.reconcile(&normalized).await.unwrap()
    }

    async fn member_status(store: &InMemoryMemberStore) -> MemberStatus {
        store
            .find_member(&IdentityKeys::from_email("pat@x.org".into()))
            .await
            .unwrap()
            .unwrap()
            .status
    }

    // =========================================================================
    // MEM-P01: Created subscription starts pending, activation moves to active
    // =========================================================================
    #[tokio::test]
    async fn test_created_then_activated() {
        let (store, reconciler) = setup();

        let created = subscription_event("BILLING.SUBSCRIPTION.CREATED", "pat@x.org");
        assert_eq!(reconcile(&reconciler, &created).await, Outcome::Created);
        assert_eq!(member_status(&store).await, MemberStatus::Pending);

        let activated = subscription_event("BILLING.SUBSCRIPTION.ACTIVATED", "pat@x.org");
        assert_eq!(reconcile(&reconciler, &activated).await, Outcome::Updated);
        assert_eq!(member_status(&store).await, MemberStatus::Active);
        assert_eq!(store.monthly_amount("pat@x.org").await, Some(10.0));
    }

    // =========================================================================
    // MEM-P02: Referrer from custom_id is kept on creation
    // =========================================================================
    #[tokio::test]
    async fn test_referrer_recorded_on_creation() {
        let (store, reconciler) = setup();

        let activated = subscription_event("BILLING.SUBSCRIPTION.ACTIVATED", "pat@x.org");
        reconcile(&reconciler, &activated).await;

        assert_eq!(
            store.referred_by("pat@x.org").await.as_deref(),
            Some("friend@x.org")
        );
    }

    // =========================================================================
    // MEM-P03: Cancellation without an email finds member by subscription id
    // =========================================================================
    #[tokio::test]
    async fn test_cancellation_matched_by_subscription_id() {
        let (store, reconciler) = setup();

        reconcile(
            &reconciler,
            &subscription_event("BILLING.SUBSCRIPTION.ACTIVATED", "pat@x.org"),
        )
        .await;
        let cancelled = subscription_event("BILLING.SUBSCRIPTION.CANCELLED", "");
        assert_eq!(reconcile(&reconciler, &cancelled).await, Outcome::Updated);

        assert_eq!(member_status(&store).await, MemberStatus::Cancelled);
        assert_eq!(store.member_count().await, 1);
    }

    // =========================================================================
    // MEM-P04: Suspension for an unknown subscription without email is unmatched
    // =========================================================================
    #[tokio::test]
    async fn test_unknown_subscription_is_unmatched() {
        let (store, reconciler) = setup();

        let suspended = subscription_event("BILLING.SUBSCRIPTION.SUSPENDED", "");
        assert_eq!(reconcile(&reconciler, &suspended).await, Outcome::Unmatched);
        assert_eq!(store.member_count().await, 0);
    }

    // =========================================================================
    // MEM-P05: Completed sale for a known payer records the payment
    // =========================================================================
    #[tokio::test]
    async fn test_sale_completed_records_payment() {
        let (store, reconciler) = setup();

        reconcile(
            &reconciler,
            &subscription_event("BILLING.SUBSCRIPTION.ACTIVATED", "pat@x.org"),
        )
        .await;

        let sale: PaypalEvent = serde_json::from_value(json!({
            "id": "WH-2",
            "event_type": "PAYMENT.SALE.COMPLETED",
            "resource": {
                "id": "SALE-1",
                "billing_agreement_id": "I-SUB1",
                "amount": { "total": "10.00", "currency": "USD" }
            }
        }))
        .unwrap();

        assert_eq!(reconcile(&reconciler, &sale).await, Outcome::Unchanged);
        assert_eq!(store.total_donated("pat@x.org").await, Some(10.0));
    }
}

#[cfg(test)]
mod batch_round_trip_tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::batch::{BatchMode, BatchReconciler};
    use crate::csv_import::parse_snapshot;
    use crate::normalize::MemberWebhook;
    use crate::reconcile::Reconciler;
    use crate::store::{InMemoryMemberStore, MemberStore};

    fn setup() -> (Arc<InMemoryMemberStore>, Reconciler) {
        let store = Arc::new(InMemoryMemberStore::new());
        (store.clone(), Reconciler::new(store))
    }

    async fn webhook(reconciler: &Reconciler, email: &str, status: &str) {
        let webhook: MemberWebhook =
            serde_json::from_value(json!({ "email": email, "status": status })).unwrap();
        reconciler
            .reconcile(&webhook.normalize().unwrap())
            .await
            .unwrap();
    }

    // =========================================================================
    // MEM-B01: Webhook state matching the export yields an empty diff
    // =========================================================================
    #[tokio::test]
    async fn test_matching_export_is_a_no_op() {
        let (_, reconciler) = setup();
        webhook(&reconciler, "A@x.com", "Payment Succeeded").await;
        webhook(&reconciler, "b@x.com", "Cancelled").await;

        let import = parse_snapshot(
            "Email,Frequency,Payment Status\n\
             a@x.com,Monthly,Succeeded\n\
             b@x.com,Monthly,Cancelled\n"
                .as_bytes(),
        )
        .unwrap();

        let batch = BatchReconciler::new(reconciler);
        let diff = batch.diff(&import.snapshot).await.unwrap();
        assert!(diff.is_empty(), "unexpected diff: {:?}", diff);
    }

    // =========================================================================
    // MEM-B02: Applying twice changes nothing the second time
    // =========================================================================
    #[tokio::test]
    async fn test_second_apply_is_empty() {
        let (store, reconciler) = setup();
        webhook(&reconciler, "stale@x.com", "active").await;

        let import = parse_snapshot(
            "Email,Frequency,Payment Status,Name\n\
             fresh@x.com,Monthly,Succeeded,Fran\n"
                .as_bytes(),
        )
        .unwrap();

        let batch = BatchReconciler::new(reconciler);
        let first = batch.run(&import.snapshot, BatchMode::Apply).await.unwrap();
        assert_eq!((first.added, first.deactivated), (1, 1));

        let second = batch.run(&import.snapshot, BatchMode::Apply).await.unwrap();
        assert!(second.diff.is_empty());
        assert_eq!(store.member_count().await, 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.active_members, 1);
        assert_eq!(stats.cancelled_members, 1);
    }

    // =========================================================================
    // MEM-B03: One-time donors in the export never affect the store
    // =========================================================================
    #[tokio::test]
    async fn test_one_time_rows_excluded_from_active_set() {
        let (store, reconciler) = setup();
        webhook(&reconciler, "once@x.com", "Succeeded").await;

        let import = parse_snapshot(
            "Email,Frequency,Payment Status\n\
             once@x.com,One-Time,Succeeded\n"
                .as_bytes(),
        )
        .unwrap();
        assert!(import.snapshot.is_empty());

        let batch = BatchReconciler::new(reconciler);
        let report = batch.run(&import.snapshot, BatchMode::Apply).await.unwrap();

        assert_eq!(report.diff.to_deactivate, vec!["once@x.com"]);
        assert_eq!(store.stats().await.unwrap().active_members, 0);
    }
}

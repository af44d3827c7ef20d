//! Canonical member store
//!
//! One row per member identity plus an append-only status history, an audit
//! log of raw webhooks and an idempotent payments ledger. The Postgres store is
//! what the service runs on; the in-memory store backs tests and fixtures.

mod memory;
mod postgres;

pub use memory::InMemoryMemberStore;
pub use postgres::PgMemberStore;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::MembershipResult;
use crate::normalize::{IdentityKeys, PaymentDetails};
use crate::status::MemberStatus;

/// Hard cap on listing size
pub const MAX_LIST_LIMIT: i64 = 100;

/// Stored member as seen by the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub is_anonymous: bool,
    pub status: MemberStatus,
    pub subscription_id: Option<String>,
    pub payer_id: Option<String>,
    pub first_seen: Date,
    pub last_updated: OffsetDateTime,
}

/// Data for a first-seen member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMember {
    pub email: String,
    pub name: Option<String>,
    pub is_anonymous: bool,
    pub status: MemberStatus,
    pub subscription_id: Option<String>,
    pub payer_id: Option<String>,
    pub monthly_amount: Option<String>,
    pub referred_by: Option<String>,
}

/// In-place update of an existing member.
///
/// `None` fields keep the stored value; anonymity and the last-updated
/// timestamp are always written. A secondary key already held by another
/// member is not moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberUpdate {
    pub name: Option<String>,
    pub is_anonymous: bool,
    pub status: Option<MemberStatus>,
    pub subscription_id: Option<String>,
    pub payer_id: Option<String>,
    pub monthly_amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusHistoryEntry {
    pub member_id: Uuid,
    pub status: MemberStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub changed_at: OffsetDateTime,
}

/// Where a logged webhook came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookSource {
    Generic,
    Donation,
    Paypal,
}

impl WebhookSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookSource::Generic => "generic",
            WebhookSource::Donation => "donation",
            WebhookSource::Paypal => "paypal",
        }
    }
}

/// Raw inbound payload kept for auditing
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookLogEntry {
    pub source: WebhookSource,
    pub email: Option<String>,
    pub status: Option<MemberStatus>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct MemberStats {
    pub total_members: i64,
    pub active_members: i64,
    pub cancelled_members: i64,
    pub suspended_members: i64,
    pub pending_members: i64,
    pub payment_failed_members: i64,
    pub anonymous_members: i64,
    pub monthly_revenue: f64,
    pub total_donated: f64,
}

/// Listing row; the name is withheld for anonymous members
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberSummary {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub is_anonymous: bool,
    pub status: MemberStatus,
    pub monthly_amount: Option<f64>,
    pub total_donated: f64,
    pub first_seen: Date,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl MemberSummary {
    fn visible_name(name: Option<String>, is_anonymous: bool) -> Option<String> {
        if is_anonymous {
            None
        } else {
            name.filter(|n| !n.is_empty())
        }
    }
}

/// Clamp a requested listing size into `1..=MAX_LIST_LIMIT`
pub fn clamp_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

#[async_trait]
pub trait MemberStore: Send + Sync {
    /// Look up by email, then subscription id, then payer id.
    async fn find_member(&self, identity: &IdentityKeys) -> MembershipResult<Option<MemberRecord>>;

    /// Insert a new member. Returns `None` when the email already exists.
    /// Secondary keys already held by another member are left unset.
    async fn insert_member(&self, member: &NewMember) -> MembershipResult<Option<Uuid>>;

    /// Apply an update and return the status the row held before it, or
    /// `None` if the member no longer exists.
    async fn update_member(
        &self,
        id: Uuid,
        update: &MemberUpdate,
    ) -> MembershipResult<Option<MemberStatus>>;

    /// Overwrite only the status of the member with this email. Returns the
    /// member id and previous status, or `None` if no such member.
    async fn set_status(
        &self,
        email: &str,
        status: MemberStatus,
    ) -> MembershipResult<Option<(Uuid, MemberStatus)>>;

    async fn append_history(&self, member_id: Uuid, status: MemberStatus) -> MembershipResult<()>;

    /// Record a payment once per transaction id and add it to the member's
    /// running total. Returns `false` for an already-recorded transaction.
    async fn record_payment(
        &self,
        member_id: Uuid,
        payment: &PaymentDetails,
    ) -> MembershipResult<bool>;

    async fn log_webhook(&self, entry: &WebhookLogEntry) -> MembershipResult<()>;

    /// `email -> status` projection of every member
    async fn member_statuses(&self) -> MembershipResult<HashMap<String, MemberStatus>>;

    async fn stats(&self) -> MembershipResult<MemberStats>;

    /// Newest-updated first, at most `limit` rows
    async fn list_members(
        &self,
        status: Option<MemberStatus>,
        limit: i64,
    ) -> MembershipResult<Vec<MemberSummary>>;

    /// Oldest first
    async fn status_history(&self, member_id: Uuid) -> MembershipResult<Vec<StatusHistoryEntry>>;

    async fn ping(&self) -> MembershipResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), 100);
        assert_eq!(clamp_limit(Some(5)), 5);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-3)), 1);
        assert_eq!(clamp_limit(Some(1000)), 100);
    }

    #[test]
    fn test_anonymous_summary_hides_name() {
        assert_eq!(MemberSummary::visible_name(Some("Jane".into()), true), None);
        assert_eq!(MemberSummary::visible_name(Some(String::new()), false), None);
        assert_eq!(
            MemberSummary::visible_name(Some("Jane".into()), false).as_deref(),
            Some("Jane")
        );
    }
}

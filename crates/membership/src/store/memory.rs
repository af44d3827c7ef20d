//! In-memory member store
//!
//! Mirrors the Postgres store's semantics (unique email, transition-only
//! history, idempotent payments) behind a single lock.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    MemberRecord, MemberStats, MemberStore, MemberSummary, MemberUpdate, NewMember,
    StatusHistoryEntry, WebhookLogEntry,
};
use crate::error::MembershipResult;
use crate::normalize::{IdentityKeys, PaymentDetails};
use crate::status::MemberStatus;

#[derive(Debug, Clone)]
struct StoredMember {
    record: MemberRecord,
    monthly_amount: Option<f64>,
    total_donated: f64,
    referred_by: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    members: Vec<StoredMember>,
    history: Vec<StatusHistoryEntry>,
    webhook_logs: Vec<WebhookLogEntry>,
    payments: HashSet<String>,
}

impl MemoryState {
    fn position_by_email(&self, email: &str) -> Option<usize> {
        self.members.iter().position(|m| m.record.email == email)
    }

    fn position_by_id(&self, id: Uuid) -> Option<usize> {
        self.members.iter().position(|m| m.record.id == id)
    }

    /// Keep a secondary key only if no member other than `owner` holds it
    fn unclaimed(
        &self,
        key: Option<&String>,
        owner: Option<Uuid>,
        field: fn(&MemberRecord) -> Option<&str>,
    ) -> Option<String> {
        let key = key?;
        let taken = self
            .members
            .iter()
            .any(|m| Some(m.record.id) != owner && field(&m.record) == Some(key.as_str()));
        (!taken).then(|| key.clone())
    }
}

fn subscription_key(record: &MemberRecord) -> Option<&str> {
    record.subscription_id.as_deref()
}

fn payer_key(record: &MemberRecord) -> Option<&str> {
    record.payer_id.as_deref()
}

fn parse_amount(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(0.0)
}

#[derive(Debug, Default)]
pub struct InMemoryMemberStore {
    state: RwLock<MemoryState>,
}

impl InMemoryMemberStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every webhook logged so far, oldest first
    pub async fn webhook_logs(&self) -> Vec<WebhookLogEntry> {
        self.state.read().await.webhook_logs.clone()
    }

    pub async fn member_count(&self) -> usize {
        self.state.read().await.members.len()
    }

    pub async fn referred_by(&self, email: &str) -> Option<String> {
        let state = self.state.read().await;
        state
            .position_by_email(email)
            .and_then(|idx| state.members[idx].referred_by.clone())
    }

    pub async fn total_donated(&self, email: &str) -> Option<f64> {
        let state = self.state.read().await;
        state
            .position_by_email(email)
            .map(|idx| state.members[idx].total_donated)
    }

    pub async fn monthly_amount(&self, email: &str) -> Option<f64> {
        let state = self.state.read().await;
        state
            .position_by_email(email)
            .and_then(|idx| state.members[idx].monthly_amount)
    }
}

#[async_trait]
impl MemberStore for InMemoryMemberStore {
    async fn find_member(&self, identity: &IdentityKeys) -> MembershipResult<Option<MemberRecord>> {
        let state = self.state.read().await;

        let by_email = identity
            .email
            .as_deref()
            .and_then(|email| state.members.iter().find(|m| m.record.email == email));
        let by_subscription = || {
            identity.subscription_id.as_deref().and_then(|sub| {
                state
                    .members
                    .iter()
                    .find(|m| m.record.subscription_id.as_deref() == Some(sub))
            })
        };
        let by_payer = || {
            identity.payer_id.as_deref().and_then(|payer| {
                state
                    .members
                    .iter()
                    .find(|m| m.record.payer_id.as_deref() == Some(payer))
            })
        };

        Ok(by_email
            .or_else(by_subscription)
            .or_else(by_payer)
            .map(|m| m.record.clone()))
    }

    async fn insert_member(&self, member: &NewMember) -> MembershipResult<Option<Uuid>> {
        let mut state = self.state.write().await;
        if state.position_by_email(&member.email).is_some() {
            return Ok(None);
        }

        let subscription_id =
            state.unclaimed(member.subscription_id.as_ref(), None, subscription_key);
        let payer_id = state.unclaimed(member.payer_id.as_ref(), None, payer_key);

        let now = OffsetDateTime::now_utc();
        let id = Uuid::new_v4();
        state.members.push(StoredMember {
            record: MemberRecord {
                id,
                email: member.email.clone(),
                name: member.name.clone(),
                is_anonymous: member.is_anonymous,
                status: member.status,
                subscription_id,
                payer_id,
                first_seen: now.date(),
                last_updated: now,
            },
            monthly_amount: member.monthly_amount.as_deref().map(parse_amount),
            total_donated: 0.0,
            referred_by: member.referred_by.clone(),
        });
        Ok(Some(id))
    }

    async fn update_member(
        &self,
        id: Uuid,
        update: &MemberUpdate,
    ) -> MembershipResult<Option<MemberStatus>> {
        let mut state = self.state.write().await;
        let Some(idx) = state.position_by_id(id) else {
            return Ok(None);
        };

        let subscription_id =
            state.unclaimed(update.subscription_id.as_ref(), Some(id), subscription_key);
        let payer_id = state.unclaimed(update.payer_id.as_ref(), Some(id), payer_key);

        let member = &mut state.members[idx];
        let previous = member.record.status;
        if let Some(name) = &update.name {
            member.record.name = Some(name.clone());
        }
        member.record.is_anonymous = update.is_anonymous;
        if let Some(status) = update.status {
            member.record.status = status;
        }
        if subscription_id.is_some() {
            member.record.subscription_id = subscription_id;
        }
        if payer_id.is_some() {
            member.record.payer_id = payer_id;
        }
        if let Some(amount) = &update.monthly_amount {
            member.monthly_amount = Some(parse_amount(amount));
        }
        member.record.last_updated = OffsetDateTime::now_utc();

        Ok(Some(previous))
    }

    async fn set_status(
        &self,
        email: &str,
        status: MemberStatus,
    ) -> MembershipResult<Option<(Uuid, MemberStatus)>> {
        let email = email.trim().to_lowercase();
        let mut state = self.state.write().await;
        let Some(idx) = state.position_by_email(&email) else {
            return Ok(None);
        };

        let member = &mut state.members[idx];
        let previous = member.record.status;
        member.record.status = status;
        member.record.last_updated = OffsetDateTime::now_utc();
        Ok(Some((member.record.id, previous)))
    }

    async fn append_history(&self, member_id: Uuid, status: MemberStatus) -> MembershipResult<()> {
        self.state.write().await.history.push(StatusHistoryEntry {
            member_id,
            status,
            changed_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }

    async fn record_payment(
        &self,
        member_id: Uuid,
        payment: &PaymentDetails,
    ) -> MembershipResult<bool> {
        let mut state = self.state.write().await;
        if !state.payments.insert(payment.transaction_id.clone()) {
            return Ok(false);
        }
        if let Some(idx) = state.position_by_id(member_id) {
            state.members[idx].total_donated += parse_amount(&payment.amount);
        }
        Ok(true)
    }

    async fn log_webhook(&self, entry: &WebhookLogEntry) -> MembershipResult<()> {
        self.state.write().await.webhook_logs.push(entry.clone());
        Ok(())
    }

    async fn member_statuses(&self) -> MembershipResult<HashMap<String, MemberStatus>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .iter()
            .map(|m| (m.record.email.to_lowercase(), m.record.status))
            .collect())
    }

    async fn stats(&self) -> MembershipResult<MemberStats> {
        let state = self.state.read().await;
        let count = |status: MemberStatus| {
            state
                .members
                .iter()
                .filter(|m| m.record.status == status)
                .count() as i64
        };

        Ok(MemberStats {
            total_members: state.members.len() as i64,
            active_members: count(MemberStatus::Active),
            cancelled_members: count(MemberStatus::Cancelled),
            suspended_members: count(MemberStatus::Suspended),
            pending_members: count(MemberStatus::Pending),
            payment_failed_members: count(MemberStatus::PaymentFailed),
            anonymous_members: state
                .members
                .iter()
                .filter(|m| m.record.is_anonymous)
                .count() as i64,
            monthly_revenue: state
                .members
                .iter()
                .filter(|m| m.record.status.is_active())
                .filter_map(|m| m.monthly_amount)
                .sum(),
            total_donated: state.members.iter().map(|m| m.total_donated).sum(),
        })
    }

    async fn list_members(
        &self,
        status: Option<MemberStatus>,
        limit: i64,
    ) -> MembershipResult<Vec<MemberSummary>> {
        let state = self.state.read().await;
        let mut members: Vec<&StoredMember> = state
            .members
            .iter()
            .filter(|m| status.map_or(true, |s| m.record.status == s))
            .collect();
        members.sort_by(|a, b| b.record.last_updated.cmp(&a.record.last_updated));

        Ok(members
            .into_iter()
            .take(super::clamp_limit(Some(limit)) as usize)
            .map(|m| MemberSummary {
                email: m.record.email.clone(),
                name: MemberSummary::visible_name(m.record.name.clone(), m.record.is_anonymous),
                is_anonymous: m.record.is_anonymous,
                status: m.record.status,
                monthly_amount: m.monthly_amount,
                total_donated: m.total_donated,
                first_seen: m.record.first_seen,
                last_updated: m.record.last_updated,
            })
            .collect())
    }

    async fn status_history(&self, member_id: Uuid) -> MembershipResult<Vec<StatusHistoryEntry>> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .filter(|h| h.member_id == member_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> MembershipResult<()> {
        Ok(())
    }
}

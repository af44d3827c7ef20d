//! Postgres-backed member store

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::{
    MemberRecord, MemberStats, MemberStore, MemberSummary, MemberUpdate, NewMember,
    StatusHistoryEntry, WebhookLogEntry,
};
use crate::error::{MembershipError, MembershipResult};
use crate::normalize::{IdentityKeys, PaymentDetails};
use crate::status::MemberStatus;

/// Database row for member lookup
#[derive(Debug, FromRow)]
struct MemberRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    is_anonymous: bool,
    status: String,
    subscription_id: Option<String>,
    payer_id: Option<String>,
    first_seen: Date,
    last_updated: OffsetDateTime,
}

impl TryFrom<MemberRow> for MemberRecord {
    type Error = MembershipError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        Ok(MemberRecord {
            id: row.id,
            email: row.email,
            name: row.name,
            is_anonymous: row.is_anonymous,
            status: parse_stored_status(&row.status)?,
            subscription_id: row.subscription_id,
            payer_id: row.payer_id,
            first_seen: row.first_seen,
            last_updated: row.last_updated,
        })
    }
}

/// Database row for the member listing
#[derive(Debug, FromRow)]
struct MemberSummaryRow {
    email: String,
    name: Option<String>,
    is_anonymous: bool,
    status: String,
    monthly_amount: Option<f64>,
    total_donated: f64,
    first_seen: Date,
    last_updated: OffsetDateTime,
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    member_id: Uuid,
    status: String,
    changed_at: OffsetDateTime,
}

fn parse_stored_status(raw: &str) -> MembershipResult<MemberStatus> {
    raw.parse()
        .map_err(|_| MembershipError::Store(format!("invalid stored status '{}'", raw)))
}

#[derive(Clone)]
pub struct PgMemberStore {
    pool: PgPool,
}

impl PgMemberStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemberStore for PgMemberStore {
    async fn find_member(&self, identity: &IdentityKeys) -> MembershipResult<Option<MemberRecord>> {
        let row: Option<MemberRow> = sqlx::query_as(
            r#"
            SELECT id, email, name, is_anonymous, status, subscription_id, payer_id,
                   first_seen, last_updated
            FROM members
            WHERE email = $1 OR subscription_id = $2 OR payer_id = $3
            ORDER BY (email = $1) IS TRUE DESC,
                     (subscription_id = $2) IS TRUE DESC
            LIMIT 1
            "#,
        )
        .bind(identity.email.as_deref())
        .bind(identity.subscription_id.as_deref())
        .bind(identity.payer_id.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        row.map(MemberRecord::try_from).transpose()
    }

    async fn insert_member(&self, member: &NewMember) -> MembershipResult<Option<Uuid>> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO members (
                id, email, name, is_anonymous, status, subscription_id, payer_id,
                monthly_amount, referred_by, first_seen, last_updated
            ) VALUES (
                $1, $2, $3, $4, $5,
                CASE WHEN EXISTS (SELECT 1 FROM members WHERE subscription_id = $6)
                     THEN NULL ELSE $6 END,
                CASE WHEN EXISTS (SELECT 1 FROM members WHERE payer_id = $7)
                     THEN NULL ELSE $7 END,
                $8::NUMERIC, $9, CURRENT_DATE, NOW()
            )
            ON CONFLICT (email) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&member.email)
        .bind(member.name.as_deref())
        .bind(member.is_anonymous)
        .bind(member.status.as_str())
        .bind(member.subscription_id.as_deref())
        .bind(member.payer_id.as_deref())
        .bind(member.monthly_amount.as_deref())
        .bind(member.referred_by.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted.map(|(id,)| id))
    }

    async fn update_member(
        &self,
        id: Uuid,
        update: &MemberUpdate,
    ) -> MembershipResult<Option<MemberStatus>> {
        // The locked sub-select hands back the status as it was before this
        // statement, so concurrent updates each see the true prior value.
        // Secondary keys owned by another member stay where they are.
        let previous: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE members AS m SET
                name = COALESCE($2, m.name),
                is_anonymous = $3,
                status = COALESCE($4, m.status),
                subscription_id = CASE
                    WHEN $5::VARCHAR IS NULL THEN m.subscription_id
                    WHEN EXISTS (SELECT 1 FROM members o WHERE o.subscription_id = $5 AND o.id <> m.id)
                        THEN m.subscription_id
                    ELSE $5
                END,
                payer_id = CASE
                    WHEN $6::VARCHAR IS NULL THEN m.payer_id
                    WHEN EXISTS (SELECT 1 FROM members o WHERE o.payer_id = $6 AND o.id <> m.id)
                        THEN m.payer_id
                    ELSE $6
                END,
                monthly_amount = COALESCE($7::NUMERIC, m.monthly_amount),
                last_updated = NOW()
            FROM (SELECT id, status FROM members WHERE id = $1 FOR UPDATE) AS previous
            WHERE m.id = previous.id
            RETURNING previous.status
            "#,
        )
        .bind(id)
        .bind(update.name.as_deref())
        .bind(update.is_anonymous)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.subscription_id.as_deref())
        .bind(update.payer_id.as_deref())
        .bind(update.monthly_amount.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        previous
            .map(|(status,)| parse_stored_status(&status))
            .transpose()
    }

    async fn set_status(
        &self,
        email: &str,
        status: MemberStatus,
    ) -> MembershipResult<Option<(Uuid, MemberStatus)>> {
        let previous: Option<(Uuid, String)> = sqlx::query_as(
            r#"
            UPDATE members AS m SET
                status = $2,
                last_updated = NOW()
            FROM (SELECT id, status FROM members WHERE email = $1 FOR UPDATE) AS previous
            WHERE m.id = previous.id
            RETURNING m.id, previous.status
            "#,
        )
        .bind(email.trim().to_lowercase())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        previous
            .map(|(id, status)| parse_stored_status(&status).map(|s| (id, s)))
            .transpose()
    }

    async fn append_history(&self, member_id: Uuid, status: MemberStatus) -> MembershipResult<()> {
        sqlx::query("INSERT INTO status_history (member_id, status) VALUES ($1, $2)")
            .bind(member_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_payment(
        &self,
        member_id: Uuid,
        payment: &PaymentDetails,
    ) -> MembershipResult<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO payments (member_id, transaction_id, amount, currency)
            VALUES ($1, $2, $3::NUMERIC, $4)
            ON CONFLICT (transaction_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(member_id)
        .bind(&payment.transaction_id)
        .bind(&payment.amount)
        .bind(payment.currency.as_deref())
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE members
            SET total_donated = total_donated + $2::NUMERIC
            WHERE id = $1
            "#,
        )
        .bind(member_id)
        .bind(&payment.amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn log_webhook(&self, entry: &WebhookLogEntry) -> MembershipResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_logs (source, email, status, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entry.source.as_str())
        .bind(entry.email.as_deref())
        .bind(entry.status.map(|s| s.as_str()))
        .bind(&entry.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn member_statuses(&self) -> MembershipResult<HashMap<String, MemberStatus>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT email, status FROM members")
            .fetch_all(&self.pool)
            .await?;

        let mut statuses = HashMap::with_capacity(rows.len());
        for (email, status) in rows {
            match status.parse::<MemberStatus>() {
                Ok(status) => {
                    statuses.insert(email.to_lowercase(), status);
                }
                Err(e) => {
                    tracing::warn!(email = %email, error = %e, "Skipping member with invalid status");
                }
            }
        }
        Ok(statuses)
    }

    async fn stats(&self) -> MembershipResult<MemberStats> {
        let stats: MemberStats = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) AS total_members,
                COUNT(*) FILTER (WHERE status = 'active') AS active_members,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled_members,
                COUNT(*) FILTER (WHERE status = 'suspended') AS suspended_members,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending_members,
                COUNT(*) FILTER (WHERE status = 'payment_failed') AS payment_failed_members,
                COUNT(*) FILTER (WHERE is_anonymous) AS anonymous_members,
                COALESCE(SUM(monthly_amount) FILTER (WHERE status = 'active'), 0)::FLOAT8
                    AS monthly_revenue,
                COALESCE(SUM(total_donated), 0)::FLOAT8 AS total_donated
            FROM members
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    async fn list_members(
        &self,
        status: Option<MemberStatus>,
        limit: i64,
    ) -> MembershipResult<Vec<MemberSummary>> {
        let rows: Vec<MemberSummaryRow> = sqlx::query_as(
            r#"
            SELECT email, name, is_anonymous, status,
                   monthly_amount::FLOAT8 AS monthly_amount,
                   total_donated::FLOAT8 AS total_donated,
                   first_seen, last_updated
            FROM members
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY last_updated DESC
            LIMIT $2
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(super::clamp_limit(Some(limit)))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(MemberSummary {
                    name: MemberSummary::visible_name(row.name, row.is_anonymous),
                    email: row.email,
                    is_anonymous: row.is_anonymous,
                    status: parse_stored_status(&row.status)?,
                    monthly_amount: row.monthly_amount,
                    total_donated: row.total_donated,
                    first_seen: row.first_seen,
                    last_updated: row.last_updated,
                })
            })
            .collect()
    }

    async fn status_history(&self, member_id: Uuid) -> MembershipResult<Vec<StatusHistoryEntry>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT member_id, status, changed_at
            FROM status_history
            WHERE member_id = $1
            ORDER BY changed_at ASC, id ASC
            "#,
        )
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(StatusHistoryEntry {
                    member_id: row.member_id,
                    status: parse_stored_status(&row.status)?,
                    changed_at: row.changed_at,
                })
            })
            .collect()
    }

    async fn ping(&self) -> MembershipResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

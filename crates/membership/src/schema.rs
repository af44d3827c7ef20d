//! Table bootstrap
//!
//! Creates the four tables the service needs if they are missing. Statements
//! are idempotent so this runs on every start.

use sqlx::PgPool;

use crate::error::MembershipResult;

const SCHEMA: &str = r#"
-- Members: one row per identity, keyed by normalized email
CREATE TABLE IF NOT EXISTS members (
    id UUID PRIMARY KEY,
    email VARCHAR(255) UNIQUE NOT NULL,
    name VARCHAR(255),
    is_anonymous BOOLEAN NOT NULL DEFAULT FALSE,
    status VARCHAR(20) NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'cancelled', 'suspended', 'pending', 'payment_failed')),
    subscription_id VARCHAR(64) UNIQUE,
    payer_id VARCHAR(64) UNIQUE,
    monthly_amount NUMERIC(10, 2),
    total_donated NUMERIC(12, 2) NOT NULL DEFAULT 0,
    referred_by VARCHAR(255),
    first_seen DATE NOT NULL DEFAULT CURRENT_DATE,
    last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Status history: append-only, one row per observed transition
CREATE TABLE IF NOT EXISTS status_history (
    id BIGSERIAL PRIMARY KEY,
    member_id UUID NOT NULL REFERENCES members(id) ON DELETE CASCADE,
    status VARCHAR(20) NOT NULL,
    changed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Raw webhook payloads for auditing
CREATE TABLE IF NOT EXISTS webhook_logs (
    id BIGSERIAL PRIMARY KEY,
    source VARCHAR(20) NOT NULL,
    email VARCHAR(255),
    status VARCHAR(20),
    payload JSONB NOT NULL,
    received_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Payments: idempotent on the vendor transaction id
CREATE TABLE IF NOT EXISTS payments (
    id BIGSERIAL PRIMARY KEY,
    member_id UUID NOT NULL REFERENCES members(id) ON DELETE CASCADE,
    transaction_id VARCHAR(64) UNIQUE NOT NULL,
    amount NUMERIC(10, 2) NOT NULL,
    currency VARCHAR(3),
    paid_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_members_status ON members(status);
CREATE INDEX IF NOT EXISTS idx_members_last_updated ON members(last_updated DESC);
CREATE INDEX IF NOT EXISTS idx_status_history_member ON status_history(member_id);
CREATE INDEX IF NOT EXISTS idx_payments_member ON payments(member_id);
"#;

/// Create tables and indexes if they don't exist
pub async fn ensure_schema(pool: &PgPool) -> MembershipResult<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    tracing::info!("Database tables created/verified successfully");
    Ok(())
}

// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! DonorSync Membership Module
//!
//! Turns donation and subscription platform events into a canonical member
//! record.
//!
//! ## Features
//!
//! - **Normalization**: Loosely-typed webhook payloads and CSV rows become a typed `NormalizedEvent`
//! - **Reconciliation**: Find-or-create members, transition-only status history
//! - **Payments**: Idempotent payment ledger keyed by vendor transaction id
//! - **Batch Sync**: Diff a full donor export against the store and correct drift
//! - **PayPal**: Webhook signature verification against the PayPal API

pub mod batch;
pub mod csv_import;
pub mod db;
pub mod error;
pub mod normalize;
pub mod paypal;
pub mod reconcile;
pub mod schema;
pub mod status;
pub mod store;

#[cfg(test)]
mod edge_case_tests;

// Batch
pub use batch::{
    BatchAction, BatchFailure, BatchMode, BatchReconciler, BatchReport, Snapshot, SnapshotDiff,
};

// CSV
pub use csv_import::{parse_snapshot, CsvImport, InvalidRow};

// Database
pub use db::{create_pool, PoolSettings};
pub use schema::ensure_schema;

// Error
pub use error::{MembershipError, MembershipResult, ValidationError};

// Normalization
pub use normalize::{
    CsvRow, DonationWebhook, IdentityKeys, MemberWebhook, NormalizedEvent, PaymentDetails,
    PaypalEvent, PaypalEventKind,
};

// PayPal
pub use paypal::{PaypalConfig, PaypalVerifier, TransmissionHeaders, DEFAULT_PAYPAL_BASE_URL};

// Reconciliation
pub use reconcile::{Outcome, Reconciler};

// Status
pub use status::MemberStatus;

// Store
pub use store::{
    InMemoryMemberStore, MemberRecord, MemberStats, MemberStore, MemberSummary, PgMemberStore,
    StatusHistoryEntry, WebhookLogEntry, WebhookSource, MAX_LIST_LIMIT,
};

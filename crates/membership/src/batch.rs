//! Batch reconciliation against a full external snapshot
//!
//! A snapshot is the set of members a donor export says are actively paying.
//! Diffing it against the store's `email -> status` projection yields three
//! sets; applying them is collect-and-continue so one bad email never blocks
//! the rest of the batch.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::{MembershipError, MembershipResult};
use crate::normalize::NormalizedEvent;
use crate::reconcile::{Outcome, Reconciler};
use crate::status::MemberStatus;

/// Active recurring members keyed by normalized email
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    members: BTreeMap<String, NormalizedEvent>,
    duplicates: usize,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event. The first row for an email wins; later rows are counted
    /// as duplicates and dropped. Events without an email cannot be keyed and
    /// are rejected.
    pub fn insert(&mut self, event: NormalizedEvent) -> bool {
        let Some(email) = event.email().map(str::to_string) else {
            return false;
        };

        if self.members.contains_key(&email) {
            self.duplicates += 1;
            tracing::debug!(email = %email, "Duplicate snapshot row ignored");
            return false;
        }

        self.members.insert(email, event);
        true
    }

    pub fn get(&self, email: &str) -> Option<&NormalizedEvent> {
        self.members.get(email)
    }

    pub fn contains(&self, email: &str) -> bool {
        self.members.contains_key(email)
    }

    pub fn emails(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

impl FromIterator<NormalizedEvent> for Snapshot {
    fn from_iter<I: IntoIterator<Item = NormalizedEvent>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for event in iter {
            snapshot.insert(event);
        }
        snapshot
    }
}

/// Emails staged for each batch action, sorted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    /// In the snapshot, unknown to the store
    pub to_add: Vec<String>,
    /// In the snapshot, stored with a non-active status
    pub to_activate: Vec<String>,
    /// Stored as active, missing from the snapshot
    pub to_deactivate: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_activate.is_empty() && self.to_deactivate.is_empty()
    }

    pub fn total(&self) -> usize {
        self.to_add.len() + self.to_activate.len() + self.to_deactivate.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Compute and report only
    DryRun,
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchAction {
    Add,
    Activate,
    Deactivate,
}

impl fmt::Display for BatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self {
            BatchAction::Add => "add",
            BatchAction::Activate => "activate",
            BatchAction::Deactivate => "deactivate",
        };
        f.write_str(action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub email: String,
    pub action: BatchAction,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub mode: BatchMode,
    pub diff: SnapshotDiff,
    pub added: usize,
    pub activated: usize,
    pub deactivated: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    fn new(mode: BatchMode, diff: SnapshotDiff) -> Self {
        Self {
            mode,
            diff,
            added: 0,
            activated: 0,
            deactivated: 0,
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, email: &str, action: BatchAction, error: &MembershipError) {
        tracing::error!(email = %email, action = %action, error = %error, "Batch action failed");
        self.failures.push(BatchFailure {
            email: email.to_string(),
            action,
            error: error.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct BatchReconciler {
    reconciler: Reconciler,
}

impl BatchReconciler {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }

    /// Compare a snapshot with what the store currently holds
    pub async fn diff(&self, snapshot: &Snapshot) -> MembershipResult<SnapshotDiff> {
        let stored = self.reconciler.store().member_statuses().await?;
        let mut diff = SnapshotDiff::default();

        for email in snapshot.emails() {
            match stored.get(email) {
                None => diff.to_add.push(email.to_string()),
                Some(status) if !status.is_active() => diff.to_activate.push(email.to_string()),
                Some(_) => {}
            }
        }

        diff.to_deactivate = stored
            .iter()
            .filter(|(email, status)| status.is_active() && !snapshot.contains(email))
            .map(|(email, _)| email.clone())
            .collect();

        // BTreeMap iteration already sorts the first two
        diff.to_deactivate.sort();

        Ok(diff)
    }

    /// Apply a diff. Additions, then activations, then deactivations, each
    /// email independently.
    pub async fn apply(
        &self,
        snapshot: &Snapshot,
        diff: SnapshotDiff,
        mode: BatchMode,
    ) -> BatchReport {
        let mut report = BatchReport::new(mode, diff);
        if mode == BatchMode::DryRun {
            tracing::info!(
                to_add = report.diff.to_add.len(),
                to_activate = report.diff.to_activate.len(),
                to_deactivate = report.diff.to_deactivate.len(),
                "Dry run, store left untouched"
            );
            return report;
        }

        let to_add = report.diff.to_add.clone();
        for email in &to_add {
            match self.add(snapshot, email).await {
                Ok(()) => report.added += 1,
                Err(e) => report.fail(email, BatchAction::Add, &e),
            }
        }

        let to_activate = report.diff.to_activate.clone();
        for email in &to_activate {
            match self.transition(email, MemberStatus::Active).await {
                Ok(()) => report.activated += 1,
                Err(e) => report.fail(email, BatchAction::Activate, &e),
            }
        }

        let to_deactivate = report.diff.to_deactivate.clone();
        for email in &to_deactivate {
            match self.transition(email, MemberStatus::Cancelled).await {
                Ok(()) => report.deactivated += 1,
                Err(e) => report.fail(email, BatchAction::Deactivate, &e),
            }
        }

        tracing::info!(
            added = report.added,
            activated = report.activated,
            deactivated = report.deactivated,
            failed = report.failures.len(),
            "Batch reconciliation applied"
        );
        report
    }

    pub async fn run(&self, snapshot: &Snapshot, mode: BatchMode) -> MembershipResult<BatchReport> {
        let diff = self.diff(snapshot).await?;
        Ok(self.apply(snapshot, diff, mode).await)
    }

    async fn add(&self, snapshot: &Snapshot, email: &str) -> MembershipResult<()> {
        let event = snapshot
            .get(email)
            .ok_or_else(|| MembershipError::MemberNotFound(email.to_string()))?;

        let event = NormalizedEvent {
            status: MemberStatus::Active,
            ..event.clone()
        };
        match self.reconciler.reconcile(&event).await? {
            Outcome::Unmatched => Err(MembershipError::MemberNotFound(email.to_string())),
            _ => Ok(()),
        }
    }

    async fn transition(&self, email: &str, status: MemberStatus) -> MembershipResult<()> {
        let store = self.reconciler.store();
        let (member_id, previous) = store
            .set_status(email, status)
            .await?
            .ok_or_else(|| MembershipError::MemberNotFound(email.to_string()))?;

        if previous != status {
            store.append_history(member_id, status).await?;
            tracing::info!(email = %email, from = %previous, to = %status, "Batch status change");
        }
        Ok(())
    }
}

//! DonorSync Batch Sync
//!
//! One-shot reconciliation of a donor platform export against the member
//! store:
//! - Members in the export but unknown to the store are added
//! - Lapsed members present in the export are reactivated
//! - Active members missing from the export are cancelled

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use donorsync_membership::{
    create_pool, ensure_schema, parse_snapshot, BatchMode, BatchReconciler, BatchReport,
    CsvImport, PgMemberStore, PoolSettings, Reconciler,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reconcile a donor CSV export with the member store.
#[derive(Parser, Debug)]
#[command(name = "donorsync-sync")]
#[command(about = "Batch-reconcile a donor CSV export with the member store", long_about = None)]
struct Args {
    /// Donor export with at least an `Email` column
    csv: PathBuf,

    /// Report what would change without touching the store
    #[arg(long)]
    dry_run: bool,

    /// Print the full report as JSON on stdout
    #[arg(long)]
    json: bool,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,

    #[arg(long, env = "DATABASE_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    acquire_timeout_secs: u64,
}

/// Parse the export off the async runtime (file I/O and CSV decoding are blocking)
async fn load_export(path: PathBuf) -> anyhow::Result<CsvImport> {
    let import = tokio::task::spawn_blocking(move || -> anyhow::Result<CsvImport> {
        let file = std::fs::File::open(&path)?;
        Ok(parse_snapshot(file)?)
    })
    .await??;

    for invalid in &import.invalid_rows {
        warn!(line = invalid.line, reason = %invalid.reason, "Skipped CSV row");
    }
    Ok(import)
}

/// Log results of a batch run
fn log_report(report: &BatchReport) {
    info!(
        mode = ?report.mode,
        to_add = report.diff.to_add.len(),
        to_activate = report.diff.to_activate.len(),
        to_deactivate = report.diff.to_deactivate.len(),
        added = report.added,
        activated = report.activated,
        deactivated = report.deactivated,
        failed = report.failures.len(),
        "Batch sync complete"
    );

    // Log individual errors
    for failure in &report.failures {
        error!(
            email = %failure.email,
            action = %failure.action,
            error = %failure.error,
            "Batch action failed"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,donorsync_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mode = if args.dry_run {
        BatchMode::DryRun
    } else {
        BatchMode::Apply
    };
    info!(csv = %args.csv.display(), mode = ?mode, "Starting DonorSync batch sync");

    let import = load_export(args.csv.clone()).await?;
    info!(
        rows = import.rows_read,
        active = import.snapshot.len(),
        one_time = import.skipped_one_time,
        inactive = import.skipped_inactive,
        duplicates = import.duplicates(),
        invalid = import.invalid_rows.len(),
        "Export loaded"
    );

    let pool = create_pool(&PoolSettings {
        max_connections: args.max_connections,
        acquire_timeout: Duration::from_secs(args.acquire_timeout_secs),
        ..PoolSettings::new(args.database_url.clone())
    })
    .await?;
    ensure_schema(&pool).await?;

    let store = Arc::new(PgMemberStore::new(pool));
    let batch = BatchReconciler::new(Reconciler::new(store));
    let report = batch.run(&import.snapshot, mode).await?;

    log_report(&report);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if !report.is_clean() {
        anyhow::bail!("{} batch action(s) failed", report.failures.len());
    }
    Ok(())
}

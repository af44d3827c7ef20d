//! Donor export parsing
//!
//! Turns a CSV export into a [`Snapshot`] of active recurring members. Columns
//! are found by header name, ignoring case and surrounding whitespace. Only
//! `Email` is required.

use std::io::Read;

use serde::Serialize;

use crate::batch::Snapshot;
use crate::error::{MembershipError, MembershipResult};
use crate::normalize::CsvRow;

const EMAIL: &str = "Email";
const FREQUENCY: &str = "Frequency";
const PAYMENT_STATUS: &str = "Payment Status";
const NAME: &str = "Name";
const ANONYMOUS: &str = "Anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidRow {
    /// 1-based line in the file, header included
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct CsvImport {
    pub snapshot: Snapshot,
    pub rows_read: usize,
    pub skipped_one_time: usize,
    pub skipped_inactive: usize,
    pub invalid_rows: Vec<InvalidRow>,
}

impl CsvImport {
    pub fn duplicates(&self) -> usize {
        self.snapshot.duplicates()
    }
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    email: usize,
    frequency: Option<usize>,
    payment_status: Option<usize>,
    name: Option<usize>,
    anonymous: Option<usize>,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> MembershipResult<Self> {
        let find = |wanted: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(wanted))
        };

        Ok(Self {
            email: find(EMAIL).ok_or(MembershipError::MissingColumn(EMAIL))?,
            frequency: find(FREQUENCY),
            payment_status: find(PAYMENT_STATUS),
            name: find(NAME),
            anonymous: find(ANONYMOUS),
        })
    }

    fn row(&self, record: &csv::StringRecord) -> CsvRow {
        // A short row still "has" the column; its cell reads as empty
        let cell = |idx: usize| record.get(idx).unwrap_or_default().to_string();

        CsvRow {
            email: cell(self.email),
            frequency: self.frequency.map(cell),
            payment_status: self.payment_status.map(cell),
            name: self.name.map(cell),
            anonymous: self.anonymous.map(cell),
        }
    }
}

/// Parse a donor export into a snapshot.
///
/// A missing `Email` header fails the whole import. Bad rows are reported and
/// skipped.
pub fn parse_snapshot<R: Read>(reader: R) -> MembershipResult<CsvImport> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = Columns::locate(csv_reader.headers()?)?;
    let mut import = CsvImport::default();

    for (idx, result) in csv_reader.records().enumerate() {
        import.rows_read += 1;
        let fallback_line = idx as u64 + 2;

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map_or(fallback_line, |p| p.line());
                tracing::warn!(line, error = %e, "Unreadable CSV row");
                import.invalid_rows.push(InvalidRow {
                    line,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let line = record.position().map_or(fallback_line, |p| p.line());

        match columns.row(&record).normalize() {
            Ok(None) => import.skipped_one_time += 1,
            Ok(Some(event)) if !event.status.is_active() => import.skipped_inactive += 1,
            Ok(Some(event)) => {
                import.snapshot.insert(event);
            }
            Err(e) => {
                tracing::warn!(line, error = %e, "Invalid CSV row");
                import.invalid_rows.push(InvalidRow {
                    line,
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        rows = import.rows_read,
        active = import.snapshot.len(),
        one_time = import.skipped_one_time,
        inactive = import.skipped_inactive,
        invalid = import.invalid_rows.len(),
        duplicates = import.duplicates(),
        "Parsed donor export"
    );
    Ok(import)
}

// 🔄 Ingestion pipeline
//
// size gate → parse → (transform → dedup write) per row → audit → summarize → deliver
//
// Strictly sequential. Source and store errors stop the run; row errors and
// duplicates are logged, counted and skipped.

use crate::dedup::{write_record, WriteOutcome};
use crate::delivery::{is_valid_email, DeliverySink};
use crate::error::{PipelineError, RowError, SourceError, StoreError};
use crate::models::{ImportRun, RawRow, SummaryReport};
use crate::parser::{check_file_size, check_len, parse_reader};
use crate::report::build_summary;
use crate::store::{SummarySource, TransactionStore};
use crate::transform::{RowTransformer, YearPolicy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
    pub line: usize,
    #[serde(serialize_with = "serialize_display")]
    pub error: RowError,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub run_id: String,
    pub source: String,
    pub checksum: String,
    pub rows: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: Vec<RejectedRow>,
}

impl IngestReport {
    fn new(source: &str, bytes: &[u8]) -> Self {
        IngestReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            source: source.to_string(),
            checksum: format!("{:x}", Sha256::digest(bytes)),
            rows: 0,
            inserted: 0,
            duplicates: 0,
            rejected: Vec::new(),
        }
    }

    pub fn audit_record(&self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> ImportRun {
        ImportRun {
            run_id: self.run_id.clone(),
            source: self.source.clone(),
            checksum: self.checksum.clone(),
            started_at,
            finished_at,
            rows: self.rows,
            inserted: self.inserted,
            duplicates: self.duplicates,
            rejected: self.rejected.len(),
        }
    }
}

/// Ingest + summary, as produced by [`Pipeline::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub ingest: IngestReport,
    pub report: SummaryReport,
}

fn serialize_display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: std::fmt::Display,
    S: serde::Serializer,
{
    serializer.collect_str(value)
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline<'a, S: ?Sized> {
    store: &'a S,
    transformer: RowTransformer,
    size_limit: Option<u64>,
}

impl<'a, S: ?Sized> Pipeline<'a, S> {
    pub fn new(store: &'a S, year: YearPolicy) -> Self {
        Pipeline {
            store,
            transformer: RowTransformer::new(year),
            size_limit: None,
        }
    }

    /// Builder pattern: reject inputs larger than `limit` bytes
    pub fn with_size_limit(mut self, limit: u64) -> Self {
        self.size_limit = Some(limit);
        self
    }

    pub fn year(&self) -> i32 {
        self.transformer.year()
    }
}

impl<'a, S> Pipeline<'a, S>
where
    S: TransactionStore + ?Sized,
{
    /// Read, validate and persist a CSV file.
    pub fn ingest_path(&self, path: &Path) -> Result<IngestReport, PipelineError> {
        if let Some(limit) = self.size_limit {
            check_file_size(path, limit)?;
        }

        let bytes = std::fs::read(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.csv");

        self.ingest_bytes(name, &bytes)
    }

    /// Validate and persist an in-memory CSV payload.
    ///
    /// The whole payload is structurally validated before the first insert.
    pub fn ingest_bytes(&self, source: &str, bytes: &[u8]) -> Result<IngestReport, PipelineError> {
        let started_at = Utc::now();

        if let Some(limit) = self.size_limit {
            check_len(bytes.len() as u64, limit)?;
        }

        let rows = parse_reader(bytes)?;

        let mut report = IngestReport::new(source, bytes);
        info!(run_id = %report.run_id, source, rows = rows.len(), year = self.year(), "ingesting transactions");

        self.write_rows(&rows, &mut report)?;

        self.store.record_run(&report.audit_record(started_at, Utc::now()))?;

        info!(
            run_id = %report.run_id,
            inserted = report.inserted,
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            "ingestion finished"
        );

        Ok(report)
    }

    fn write_rows(&self, rows: &[RawRow], report: &mut IngestReport) -> Result<(), StoreError> {
        for row in rows {
            report.rows += 1;

            let record = match self.transformer.transform(row) {
                Ok(record) => record,
                Err(error) => {
                    warn!(line = row.line, error = %error, "skipping row");
                    report.rejected.push(RejectedRow {
                        line: row.line,
                        error,
                    });
                    continue;
                }
            };

            debug!(line = row.line, ?record, "converted row");

            match write_record(self.store, &record)? {
                WriteOutcome::Inserted { .. } => report.inserted += 1,
                WriteOutcome::Duplicate => report.duplicates += 1,
            }
        }

        Ok(())
    }
}

impl<'a, S> Pipeline<'a, S>
where
    S: SummarySource + ?Sized,
{
    /// Summarize everything currently in the store.
    pub fn summarize(&self, recipient: &str) -> Result<SummaryReport, PipelineError> {
        Ok(build_summary(self.store, recipient)?)
    }
}

impl<'a, S> Pipeline<'a, S>
where
    S: TransactionStore + SummarySource + ?Sized,
{
    /// Full run: ingest `path`, summarize the store, hand the report to `sink`.
    ///
    /// The recipient is validated before anything is read.
    pub fn run(
        &self,
        path: &Path,
        recipient: &str,
        sink: &dyn DeliverySink,
    ) -> Result<RunOutcome, PipelineError> {
        if !is_valid_email(recipient) {
            return Err(PipelineError::InvalidRecipient(recipient.to_string()));
        }

        let ingest = self.ingest_path(path)?;
        let report = self.summarize(recipient)?;
        sink.deliver(&report)?;

        Ok(RunOutcome { ingest, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use crate::store::SqliteStore;
    use rust_decimal::dec;
    use std::sync::Mutex;

    const SAMPLE: &str = "Id,Date,Transaction
0,7/15,+60.5
1,7/28,-10.3
2,8/2,-20.46
3,8/13,+10
";

    #[derive(Default)]
    struct CapturingSink {
        delivered: Mutex<Vec<SummaryReport>>,
    }

    impl DeliverySink for CapturingSink {
        fn deliver(&self, report: &SummaryReport) -> Result<(), DeliveryError> {
            self.delivered.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    fn pipeline(store: &SqliteStore) -> Pipeline<'_, SqliteStore> {
        Pipeline::new(store, YearPolicy::Fixed(2024))
    }

    #[test]
    fn test_ingest_sample() {
        let store = SqliteStore::open_in_memory().unwrap();
        let report = pipeline(&store).ingest_bytes("txns.csv", SAMPLE.as_bytes()).unwrap();

        assert_eq!(report.rows, 4);
        assert_eq!(report.inserted, 4);
        assert_eq!(report.duplicates, 0);
        assert!(report.rejected.is_empty());
        assert_eq!(report.checksum.len(), 64);
        assert_eq!(store.count().unwrap(), 4);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = pipeline(&store);

        p.ingest_bytes("txns.csv", SAMPLE.as_bytes()).unwrap();
        let second = p.ingest_bytes("txns.csv", SAMPLE.as_bytes()).unwrap();

        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 4);
        assert_eq!(store.count().unwrap(), 4);
        assert_eq!(store.import_runs().unwrap().len(), 2);
    }

    #[test]
    fn test_bad_rows_are_isolated() {
        let csv = "Id,Date,Transaction
1,01/05,100.00
x,01/06,5
2,2024-01-07,5
3,01/08,abc
4,03/02,-25.50
";
        let store = SqliteStore::open_in_memory().unwrap();
        let report = pipeline(&store).ingest_bytes("mixed.csv", csv.as_bytes()).unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.rejected.len(), 3);
        assert_eq!(report.rejected[0].line, 3);
        assert!(matches!(report.rejected[0].error, RowError::InvalidIdentifier(_)));
        assert!(matches!(report.rejected[1].error, RowError::InvalidDate(_)));
        assert!(matches!(report.rejected[2].error, RowError::InvalidAmount(_)));
        assert!(store.exists(1).unwrap());
        assert!(store.exists(4).unwrap());
    }

    #[test]
    fn test_duplicate_inside_one_file() {
        let csv = "Id,Date,Transaction\n1,01/05,10\n1,02/05,20\n";
        let store = SqliteStore::open_in_memory().unwrap();
        let report = pipeline(&store).ingest_bytes("dup.csv", csv.as_bytes()).unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(store.list_records().unwrap()[0].amount, dec!(10));
    }

    #[test]
    fn test_structural_error_persists_nothing() {
        let csv = "Id,Date,Transaction\n1,01/05,10\n2,01/06\n";
        let store = SqliteStore::open_in_memory().unwrap();
        let err = pipeline(&store).ingest_bytes("bad.csv", csv.as_bytes()).unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Source(SourceError::ColumnCount { line: 3, .. })
        ));
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.import_runs().unwrap().is_empty());
    }

    #[test]
    fn test_size_limit() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = pipeline(&store)
            .with_size_limit(10)
            .ingest_bytes("big.csv", SAMPLE.as_bytes())
            .unwrap_err();

        assert!(matches!(err, PipelineError::Source(SourceError::TooLarge { .. })));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_rejected_row_serializes_message() {
        let row = RejectedRow {
            line: 4,
            error: RowError::InvalidAmount("abc".to_string()),
        };
        let json = serde_json::to_value(&row).unwrap();

        assert_eq!(json["line"], 4);
        assert_eq!(json["error"], "invalid amount `abc`: expected a signed decimal");
    }

    #[test]
    fn test_run_delivers_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("txns.csv");
        std::fs::write(&path, SAMPLE).unwrap();

        let store = SqliteStore::open_in_memory().unwrap();
        let sink = CapturingSink::default();

        let outcome = pipeline(&store).run(&path, "alice@example.com", &sink).unwrap();

        assert_eq!(outcome.ingest.source, "txns.csv");
        assert_eq!(outcome.report.total_balance(), dec!(39.74));
        assert_eq!(outcome.report.average_debit(), Some(dec!(-15.38)));
        assert_eq!(outcome.report.average_credit(), Some(dec!(35.25)));
        assert_eq!(outcome.report.monthly_counts().len(), 2);
        assert_eq!(outcome.report.monthly_counts()[0].month, "July");

        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0], outcome.report);
    }

    #[test]
    fn test_run_rejects_invalid_recipient_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        let sink = CapturingSink::default();

        let err = pipeline(&store)
            .run(Path::new("does_not_exist.csv"), "nope", &sink)
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidRecipient(_)));
        assert!(sink.delivered.lock().unwrap().is_empty());
    }
}

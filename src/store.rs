// 🗄️ Store - capability traits + SQLite adapter
//
// The pipeline and the aggregation engine only see the traits, so tests can
// swap in doubles. `SqliteStore` is the relational implementation.

use crate::error::StoreError;
use crate::models::{ImportRun, TransactionRecord};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// How dates are written to the `date` column
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// CAPABILITIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New row, with the surrogate key the store assigned
    Inserted(i64),
    /// Rejected by the uniqueness constraint on `transaction_id`
    Conflict,
}

/// Write side: existence check + insert.
pub trait TransactionStore {
    fn exists(&self, transaction_id: i64) -> Result<bool, StoreError>;

    /// Insert a record. A uniqueness violation is `Ok(Conflict)`, not an error.
    fn insert(&self, record: &TransactionRecord) -> Result<InsertOutcome, StoreError>;

    /// Persist an audit entry for a finished run. Stores without an audit log ignore it.
    fn record_run(&self, _run: &ImportRun) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Read side: the four aggregate queries the summary is built from.
pub trait SummarySource {
    /// Exact sum of all amounts; zero for an empty store
    fn total_balance(&self) -> Result<Decimal, StoreError>;

    /// Mean of amounts < 0, `None` when there are no debits
    fn average_debit(&self) -> Result<Option<Decimal>, StoreError>;

    /// Mean of amounts > 0, `None` when there are no credits
    fn average_credit(&self) -> Result<Option<Decimal>, StoreError>;

    /// Month number (1-12) → number of records dated in that month.
    /// Months without records may be absent.
    fn count_by_month(&self) -> Result<BTreeMap<u32, u64>, StoreError>;
}

// ============================================================================
// CONNECTION POLICY
// ============================================================================

/// Connect retry policy, owned by whoever builds the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// SQLITE ADAPTER
// ============================================================================

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, retrying per `retry`.
    ///
    /// The schema is created on first successful connect.
    pub fn open(path: &Path, retry: &RetryPolicy) -> Result<Self, StoreError> {
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match Self::connect(path) {
                Ok(store) => {
                    info!(path = %path.display(), "database connection established and schema migrated");
                    return Ok(store);
                }
                Err(source) if attempt >= max_attempts => {
                    return Err(StoreError::Connect {
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "failed to connect to database, retrying in {:?}",
                        retry.backoff
                    );
                    std::thread::sleep(retry.backoff);
                }
            }
        }
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    fn connect(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for crash recovery
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;

        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }

    /// All records, oldest date first.
    pub fn list_records(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, transaction_id, date, amount
             FROM transactions
             ORDER BY date, transaction_id",
        )?;

        let records = stmt
            .query_map([], |row| {
                let date_str: String = row.get(2)?;
                let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
                })?;

                Ok(TransactionRecord {
                    id: Some(row.get(0)?),
                    transaction_id: row.get(1)?,
                    date,
                    amount: amount_column(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Audit log, most recent run first.
    pub fn import_runs(&self) -> Result<Vec<ImportRun>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, source, checksum, started_at, finished_at,
                    row_count, inserted, duplicates, rejected
             FROM import_runs
             ORDER BY id DESC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, i64>(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(run_id, source, checksum, started, finished, rows, inserted, duplicates, rejected)| {
                Ok(ImportRun {
                    run_id,
                    source,
                    checksum,
                    started_at: parse_timestamp(&started)?,
                    finished_at: parse_timestamp(&finished)?,
                    rows: to_count(rows)?,
                    inserted: to_count(inserted)?,
                    duplicates: to_count(duplicates)?,
                    rejected: to_count(rejected)?,
                })
            })
            .collect()
    }

    /// Amounts matching `condition`, parsed back into exact decimals.
    fn amounts_where(&self, condition: &str) -> Result<Vec<Decimal>, StoreError> {
        let sql = format!("SELECT amount FROM transactions WHERE {condition}");
        let mut stmt = self.conn.prepare_cached(&sql)?;

        let amounts = stmt
            .query_map([], |row| amount_column(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(amounts)
    }

    fn average_where(&self, condition: &str) -> Result<Option<Decimal>, StoreError> {
        let amounts = self.amounts_where(condition)?;
        if amounts.is_empty() {
            return Ok(None);
        }

        checked_sum(&amounts)?
            .checked_div(Decimal::from(amounts.len()))
            .map(Some)
            .ok_or_else(|| StoreError::Corrupt(format!("cannot average {} amounts", amounts.len())))
    }
}

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id INTEGER NOT NULL UNIQUE,
            date TEXT NOT NULL,
            amount TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);

        CREATE TABLE IF NOT EXISTS import_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            source TEXT NOT NULL,
            checksum TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            inserted INTEGER NOT NULL,
            duplicates INTEGER NOT NULL,
            rejected INTEGER NOT NULL
        );",
    )
}

impl TransactionStore for SqliteStore {
    fn exists(&self, transaction_id: i64) -> Result<bool, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM transactions WHERE transaction_id = ?1")?;
        Ok(stmt.exists(params![transaction_id])?)
    }

    fn insert(&self, record: &TransactionRecord) -> Result<InsertOutcome, StoreError> {
        let result = self.conn.execute(
            "INSERT INTO transactions (transaction_id, date, amount) VALUES (?1, ?2, ?3)",
            params![
                record.transaction_id,
                record.date.format(DATE_FORMAT).to_string(),
                record.amount.to_string(),
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted(self.conn.last_insert_rowid())),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(InsertOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn record_run(&self, run: &ImportRun) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO import_runs (
                run_id, source, checksum, started_at, finished_at,
                row_count, inserted, duplicates, rejected
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.run_id,
                run.source,
                run.checksum,
                run.started_at.to_rfc3339(),
                run.finished_at.to_rfc3339(),
                run.rows as i64,
                run.inserted as i64,
                run.duplicates as i64,
                run.rejected as i64,
            ],
        )?;

        Ok(())
    }
}

impl SummarySource for SqliteStore {
    fn total_balance(&self) -> Result<Decimal, StoreError> {
        checked_sum(&self.amounts_where("amount IS NOT NULL")?)
    }

    fn average_debit(&self) -> Result<Option<Decimal>, StoreError> {
        self.average_where("CAST(amount AS REAL) < 0")
    }

    fn average_credit(&self) -> Result<Option<Decimal>, StoreError> {
        self.average_where("CAST(amount AS REAL) > 0")
    }

    fn count_by_month(&self) -> Result<BTreeMap<u32, u64>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT CAST(strftime('%m', date) AS INTEGER) AS month, COUNT(*)
             FROM transactions
             GROUP BY month",
        )?;

        let pairs = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        pairs
            .into_iter()
            .map(|(month, count)| {
                let month = u32::try_from(month)
                    .map_err(|_| StoreError::Corrupt(format!("month {month}")))?;
                let count = u64::try_from(count)
                    .map_err(|_| StoreError::Corrupt(format!("count {count}")))?;
                Ok((month, count))
            })
            .collect()
    }
}

fn checked_sum(amounts: &[Decimal]) -> Result<Decimal, StoreError> {
    amounts
        .iter()
        .try_fold(Decimal::ZERO, |total, amount| total.checked_add(*amount))
        .ok_or_else(|| StoreError::Corrupt("sum of amounts overflows".to_string()))
}

/// Amounts are stored as decimal text so no precision is lost.
fn amount_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp `{text}`: {e}")))
}

fn to_count(value: i64) -> Result<usize, StoreError> {
    usize::try_from(value).map_err(|_| StoreError::Corrupt(format!("count {value}")))
}

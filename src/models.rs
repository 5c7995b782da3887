// Record Model - row and record shapes shared by every stage
// RawRow (as read) → TransactionRecord (as persisted) → MonthlyCount / SummaryReport (derived)

use crate::aggregate::Aggregates;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// CSV SHAPE
// ============================================================================

/// Literal header names, in column order.
pub const EXPECTED_HEADERS: [&str; 3] = ["Id", "Date", "Transaction"];

/// One CSV data line, untouched.
///
/// Fields are opaque text; interpretation happens in the transformer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    pub id: String,
    pub date: String,
    pub amount: String,

    /// 1-indexed line in the source file (header = line 1)
    pub line: usize,
}

impl RawRow {
    pub fn new(id: &str, date: &str, amount: &str, line: usize) -> Self {
        RawRow {
            id: id.to_string(),
            date: date.to_string(),
            amount: amount.to_string(),
            line,
        }
    }
}

// ============================================================================
// PERSISTED RECORD
// ============================================================================

/// A transaction as it lives in the store.
///
/// `transaction_id` is the source-provided key and is unique across the
/// store. `id` is the surrogate key and is `None` until the store assigns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub transaction_id: i64,
    pub date: NaiveDate,
    pub amount: Decimal,
}

impl TransactionRecord {
    pub fn new(transaction_id: i64, date: NaiveDate, amount: Decimal) -> Self {
        TransactionRecord {
            id: None,
            transaction_id,
            date,
            amount,
        }
    }

    /// Negative amounts are debits
    pub fn is_debit(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// Positive amounts are credits
    pub fn is_credit(&self) -> bool {
        self.amount > Decimal::ZERO
    }
}

// ============================================================================
// DERIVED VALUES
// ============================================================================

/// Number of transactions dated in one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyCount {
    pub month: String,
    pub count: u64,
}

impl MonthlyCount {
    pub fn new(month: chrono::Month, count: u64) -> Self {
        MonthlyCount {
            month: month.name().to_string(),
            count,
        }
    }
}

/// The finished summary handed to a delivery sink.
///
/// Averages are `None` when there is nothing to average. Built by
/// [`SummaryReport::assemble`] (or deserialized); read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    recipient: String,
    total_balance: Decimal,
    average_debit: Option<Decimal>,
    average_credit: Option<Decimal>,
    monthly_counts: Vec<MonthlyCount>,
}

impl SummaryReport {
    /// Combine aggregation outputs with the caller-supplied recipient.
    pub fn assemble(recipient: impl Into<String>, aggregates: Aggregates) -> Self {
        SummaryReport {
            recipient: recipient.into(),
            total_balance: aggregates.total_balance,
            average_debit: aggregates.average_debit,
            average_credit: aggregates.average_credit,
            monthly_counts: aggregates.monthly_counts,
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn total_balance(&self) -> Decimal {
        self.total_balance
    }

    pub fn average_debit(&self) -> Option<Decimal> {
        self.average_debit
    }

    pub fn average_credit(&self) -> Option<Decimal> {
        self.average_credit
    }

    /// Non-empty months, January first
    pub fn monthly_counts(&self) -> &[MonthlyCount] {
        &self.monthly_counts
    }
}

// ============================================================================
// AUDIT
// ============================================================================

/// One ingestion run, as recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRun {
    pub run_id: String,
    pub source: String,
    /// SHA-256 of the source bytes, lowercase hex
    pub checksum: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

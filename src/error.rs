// Error taxonomy
//
// Source and store errors end a run. Row errors and duplicates never do;
// they are logged and counted in the ingest report.

use std::path::PathBuf;
use thiserror::Error;

/// The input file cannot be used at all. Nothing is persisted.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing header: expected `Id,Date,Transaction`")]
    MissingHeader,

    #[error("invalid header: expected `{expected}`, found `{found}`")]
    InvalidHeader { expected: String, found: String },

    #[error("line {line} has {found} columns, expected exactly 3")]
    ColumnCount { line: usize, found: usize },

    #[error("file is {size} bytes, which exceeds the limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One row could not be converted. The run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("invalid date format `{0}`: expected MM/DD")]
    InvalidDate(String),

    #[error("invalid transaction id `{0}`: expected a non-negative integer")]
    InvalidIdentifier(String),

    #[error("invalid amount `{0}`: expected a signed decimal")]
    InvalidAmount(String),
}

/// Connectivity or query failure in the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not connect to database after {attempts} attempts: {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// An aggregation query failed while building the summary.
#[derive(Debug, Error)]
#[error("error calculating {metric}: {source}")]
pub struct SummaryError {
    pub metric: &'static str,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid recipient address `{0}`")]
    InvalidRecipient(String),

    #[error("failed to write message: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Anything that stops a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid recipient address `{0}`")]
    InvalidRecipient(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Summary(#[from] SummaryError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: String, value: String },
}

// Transaction Summary - Core Library
// CSV ingestion, deduplicating storage, aggregation and delivery.
// Shared by the CLI, the API server, and tests.

pub mod models;
pub mod error;
pub mod parser;
pub mod transform;
pub mod store;
pub mod dedup;
pub mod aggregate;
pub mod report;
pub mod delivery;
pub mod pipeline;
pub mod config;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use models::{ImportRun, MonthlyCount, RawRow, SummaryReport, TransactionRecord, EXPECTED_HEADERS};
pub use error::{
    ConfigError, DeliveryError, PipelineError, RowError, SourceError, StoreError, SummaryError,
};
pub use parser::{check_file_size, parse_path, parse_reader};
pub use transform::{RowTransformer, YearPolicy, SUPPORTED_YEARS};
pub use store::{setup_database, InsertOutcome, RetryPolicy, SqliteStore, SummarySource, TransactionStore};
pub use dedup::{write_record, WriteOutcome};
pub use aggregate::{aggregate, Aggregates};
pub use report::build_summary;
pub use delivery::{is_valid_email, DeliverySink, LogSink, OutboxSink};
pub use pipeline::{IngestReport, Pipeline, RejectedRow, RunOutcome};
pub use config::Settings;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Transaction Summary CLI
// import / check / summary / run against the configured SQLite store

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use txn_summary::{
    check_file_size, is_valid_email, parse_path, IngestReport, Pipeline, RowTransformer,
    Settings, SqliteStore, SummaryReport,
};

#[derive(Parser)]
#[command(name = "txn-summary")]
#[command(about = "Import transaction CSV files and summarize them")]
#[command(version)]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database (overrides config and TXN_DATABASE_PATH)
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Year applied to MM/DD dates, 1-9999 (default: current year)
    #[arg(long, global = true, value_parser = clap::value_parser!(i32).range(1..=9999))]
    year: Option<i32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a CSV file into the store
    Import {
        file: PathBuf,

        /// Print the ingest report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a CSV file without touching the store
    Check { file: PathBuf },

    /// Summarize everything in the store
    Summary {
        /// Recipient address
        #[arg(long)]
        to: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Hand the report to the configured delivery sink
        #[arg(long)]
        deliver: bool,
    },

    /// Import, summarize and deliver in one go
    Run {
        file: PathBuf,

        /// Recipient address
        #[arg(long)]
        to: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(database) = &cli.database {
        settings.database.path = database.clone();
    }
    if cli.year.is_some() {
        settings.ingest.year = cli.year;
    }

    match &cli.command {
        Commands::Import { file, json } => run_import(&settings, file, *json),
        Commands::Check { file } => run_check(&settings, file),
        Commands::Summary { to, json, deliver } => run_summary(&settings, to, *json, *deliver),
        Commands::Run { file, to } => run_all(&settings, file, to),
    }
}

fn open_store(settings: &Settings) -> Result<SqliteStore> {
    let path = &settings.database.path;
    let store = SqliteStore::open(path, &settings.retry_policy())
        .with_context(|| format!("failed to open database {}", path.display()))?;
    info!(path = %path.display(), "database opened");
    Ok(store)
}

fn run_import(settings: &Settings, file: &Path, json: bool) -> Result<()> {
    let store = open_store(settings)?;
    let pipeline =
        Pipeline::new(&store, settings.year_policy()).with_size_limit(settings.size_limit_bytes());

    let report = pipeline
        .ingest_path(file)
        .with_context(|| format!("failed to import {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_ingest(&report);
        println!("Store now holds {} transactions", store.count()?);
    }

    Ok(())
}

fn run_check(settings: &Settings, file: &Path) -> Result<()> {
    let size = check_file_size(file, settings.size_limit_bytes())?;
    let rows = parse_path(file).with_context(|| format!("invalid CSV {}", file.display()))?;

    let transformer = RowTransformer::new(settings.year_policy());
    let mut rejected = 0;
    for row in &rows {
        if let Err(e) = transformer.transform(row) {
            println!("line {}: {}", row.line, e);
            rejected += 1;
        }
    }

    println!(
        "{}: {} bytes, {} rows, {} valid, {} rejected (year {})",
        file.display(),
        size,
        rows.len(),
        rows.len() - rejected,
        rejected,
        transformer.year()
    );

    Ok(())
}

fn run_summary(settings: &Settings, to: &str, json: bool, deliver: bool) -> Result<()> {
    if !is_valid_email(to) {
        bail!("invalid recipient address `{to}`");
    }

    let store = open_store(settings)?;
    let report = Pipeline::new(&store, settings.year_policy()).summarize(to)?;

    print_summary(&report, json)?;

    if deliver {
        settings
            .delivery_sink()
            .deliver(&report)
            .context("failed to deliver summary")?;
    }

    Ok(())
}

fn run_all(settings: &Settings, file: &Path, to: &str) -> Result<()> {
    let store = open_store(settings)?;
    let sink = settings.delivery_sink();
    let pipeline =
        Pipeline::new(&store, settings.year_policy()).with_size_limit(settings.size_limit_bytes());

    let outcome = pipeline
        .run(file, to, sink.as_ref())
        .with_context(|| format!("failed to process {}", file.display()))?;

    print_ingest(&outcome.ingest);
    println!();
    print_summary(&outcome.report, false)?;

    Ok(())
}

fn print_ingest(report: &IngestReport) {
    println!("Imported {} (run {})", report.source, report.run_id);
    println!("  rows:       {}", report.rows);
    println!("  inserted:   {}", report.inserted);
    println!("  duplicates: {}", report.duplicates);
    println!("  rejected:   {}", report.rejected.len());
    for rejected in &report.rejected {
        println!("    line {}: {}", rejected.line, rejected.error);
    }
}

fn print_summary(report: &SummaryReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

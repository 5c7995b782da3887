// Settings
// Built-in defaults → optional TOML file → environment variables

use crate::delivery::{DeliverySink, LogSink, OutboxSink, DEFAULT_SUBJECT};
use crate::error::ConfigError;
use crate::parser::limit_from_megabytes;
use crate::store::RetryPolicy;
use crate::transform::{YearPolicy, SUPPORTED_YEARS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub ingest: IngestSettings,
    pub delivery: DeliverySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,

    /// Connect attempts before giving up
    pub max_attempts: u32,

    /// Seconds to wait between connect attempts
    pub backoff_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: PathBuf::from("transactions.db"),
            max_attempts: 5,
            backoff_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Upload limit in megabytes (fractions allowed)
    pub file_size_limit_mb: f64,

    /// Pin the year applied to MM/DD dates. Unset = processing year.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        IngestSettings {
            file_size_limit_mb: 1.0,
            year: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Write messages here. Unset = log the report instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,

    pub subject: String,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        DeliverySettings {
            outbox_dir: None,
            sender: None,
            cc: None,
            subject: DEFAULT_SUBJECT.to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then `path` (if any), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        if let Some(year) = settings.ingest.year {
            check_year("ingest.year", year, &year.to_string())?;
        }
        Ok(settings)
    }

    /// Override fields from environment-style variables.
    ///
    /// Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = var("TXN_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(value) = var("TXN_DB_MAX_ATTEMPTS") {
            self.database.max_attempts = parse_var("TXN_DB_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = var("TXN_DB_BACKOFF_SECS") {
            self.database.backoff_secs = parse_var("TXN_DB_BACKOFF_SECS", &value)?;
        }
        if let Some(value) = var("FILE_SIZE_LIMIT") {
            let limit: f64 = parse_var("FILE_SIZE_LIMIT", &value)?;
            if !limit.is_finite() || limit <= 0.0 {
                return Err(invalid("FILE_SIZE_LIMIT", &value));
            }
            self.ingest.file_size_limit_mb = limit;
        }
        if let Some(value) = var("TXN_YEAR") {
            let year = parse_var("TXN_YEAR", &value)?;
            check_year("TXN_YEAR", year, &value)?;
            self.ingest.year = Some(year);
        }
        if let Some(dir) = var("TXN_OUTBOX_DIR") {
            self.delivery.outbox_dir = Some(PathBuf::from(dir));
        }
        if let Some(sender) = var("SMTP_SENDER") {
            self.delivery.sender = Some(sender);
        }
        if let Some(cc) = var("SMTP_CC") {
            self.delivery.cc = Some(cc);
        }
        if let Some(subject) = var("SMTP_SUBJECT") {
            self.delivery.subject = subject;
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.database.max_attempts,
            backoff: Duration::from_secs(self.database.backoff_secs),
        }
    }

    pub fn year_policy(&self) -> YearPolicy {
        YearPolicy::from(self.ingest.year)
    }

    pub fn size_limit_bytes(&self) -> u64 {
        limit_from_megabytes(self.ingest.file_size_limit_mb)
    }

    /// Outbox sink when an outbox directory is configured, log sink otherwise.
    pub fn delivery_sink(&self) -> Arc<dyn DeliverySink> {
        match &self.delivery.outbox_dir {
            Some(dir) => {
                let mut sink = OutboxSink::new(dir).with_subject(&self.delivery.subject);
                if let Some(sender) = &self.delivery.sender {
                    sink = sink.with_sender(sender);
                }
                if let Some(cc) = &self.delivery.cc {
                    sink = sink.with_cc(cc);
                }
                Arc::new(sink)
            }
            None => Arc::new(LogSink),
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Years whose dates SQLite can still bucket by month.
fn check_year(key: &str, year: i32, value: &str) -> Result<(), ConfigError> {
    if SUPPORTED_YEARS.contains(&year) {
        Ok(())
    } else {
        Err(invalid(key, value))
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

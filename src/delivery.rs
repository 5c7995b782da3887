// 📬 Delivery sinks
//
// A sink receives the finished report. Transport lives behind the trait;
// the outbox sink writes ready-to-send MIME messages to a directory.

use crate::error::DeliveryError;
use crate::models::SummaryReport;
use chrono::Utc;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

const EMAIL_PATTERN: &str = r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$";

pub const DEFAULT_SUBJECT: &str = "Your transaction summary";

/// Lowercase `local@domain.tld` addresses only.
pub fn is_valid_email(email: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();

    RE.get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}

pub trait DeliverySink: Send + Sync {
    fn deliver(&self, report: &SummaryReport) -> Result<(), DeliveryError>;
}

// ============================================================================
// LOG SINK
// ============================================================================

/// Writes the rendered report to the log. Useful when no outbox is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DeliverySink for LogSink {
    fn deliver(&self, report: &SummaryReport) -> Result<(), DeliveryError> {
        info!(recipient = %report.recipient(), "summary report\n{}", report.render_text());
        Ok(())
    }
}

// ============================================================================
// OUTBOX SINK
// ============================================================================

#[derive(Debug, Clone)]
pub struct OutboxSink {
    dir: PathBuf,
    sender: Option<String>,
    cc: Option<String>,
    subject: String,
}

impl OutboxSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        OutboxSink {
            dir: dir.into(),
            sender: None,
            cc: None,
            subject: DEFAULT_SUBJECT.to_string(),
        }
    }

    /// Builder pattern: sender is copied on every message
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Builder pattern: add a Cc recipient
    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc = Some(cc.into());
        self
    }

    /// Builder pattern: override the subject line
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Render the full message: headers, blank line, HTML body.
    pub fn compose(&self, report: &SummaryReport) -> String {
        let mut to: Vec<&str> = Vec::new();
        if let Some(sender) = &self.sender {
            to.push(sender);
        }
        to.push(report.recipient());

        let mut message = String::new();
        if let Some(sender) = &self.sender {
            message.push_str(&format!("From: {sender}\r\n"));
        }
        message.push_str(&format!("To: {}\r\n", to.join(",")));
        if let Some(cc) = &self.cc {
            message.push_str(&format!("Cc: {cc}\r\n"));
        }
        message.push_str(&format!("Subject: {}\r\n", self.subject));
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/html; charset=\"UTF-8\"\r\n\r\n");
        message.push_str(&report.render_html());
        message
    }

    /// Write `<stamp>-<uuid>.eml` plus a JSON copy of the report.
    ///
    /// Returns the path of the `.eml` file.
    pub fn write_message(&self, report: &SummaryReport) -> Result<PathBuf, DeliveryError> {
        if !is_valid_email(report.recipient()) {
            return Err(DeliveryError::InvalidRecipient(report.recipient().to_string()));
        }

        fs::create_dir_all(&self.dir)?;

        let stem = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            uuid::Uuid::new_v4()
        );
        let message_path = self.dir.join(format!("{stem}.eml"));
        let json_path = self.dir.join(format!("{stem}.json"));

        fs::write(&message_path, self.compose(report))?;
        fs::write(&json_path, serde_json::to_string_pretty(report)?)?;

        Ok(message_path)
    }
}

impl DeliverySink for OutboxSink {
    fn deliver(&self, report: &SummaryReport) -> Result<(), DeliveryError> {
        let path = self.write_message(report)?;
        info!(recipient = %report.recipient(), path = %path.display(), "summary queued for delivery");
        Ok(())
    }
}

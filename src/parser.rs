// 🏗️ CSV Validator/Parser
// Header check → per-row column count check → Vec<RawRow>
//
// Structural problems abort the whole file before anything is persisted.

use crate::error::SourceError;
use crate::models::{RawRow, EXPECTED_HEADERS};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

pub const MEGABYTE: u64 = 1024 * 1024;

// ============================================================================
// SIZE GATE
// ============================================================================

/// Convert a (possibly fractional) megabyte limit into bytes.
pub fn limit_from_megabytes(megabytes: f64) -> u64 {
    (megabytes * MEGABYTE as f64) as u64
}

/// Reject a payload larger than `limit` bytes.
pub fn check_len(size: u64, limit: u64) -> Result<(), SourceError> {
    if size > limit {
        return Err(SourceError::TooLarge { size, limit });
    }
    Ok(())
}

/// Stat the file and reject it when it exceeds `limit` bytes.
///
/// Returns the file size on success.
pub fn check_file_size(path: &Path, limit: u64) -> Result<u64, SourceError> {
    let metadata = std::fs::metadata(path).map_err(|source| SourceError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    check_len(metadata.len(), limit)?;
    Ok(metadata.len())
}

// ============================================================================
// PARSING
// ============================================================================

/// Open `path` and parse it. Each call re-opens the file.
pub fn parse_path(path: &Path) -> Result<Vec<RawRow>, SourceError> {
    let file = File::open(path).map_err(|source| SourceError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    parse_reader(file)
}

/// Parse a CSV byte stream into raw rows.
///
/// # Errors
/// * `MissingHeader` / `InvalidHeader` - header absent or not `Id,Date,Transaction`
/// * `ColumnCount` - a data line without exactly three fields (header = line 1)
/// * `Csv` / `Io` - unreadable input (I/O, invalid UTF-8)
pub fn parse_reader<R: Read>(mut source: R) -> Result<Vec<RawRow>, SourceError> {
    let mut data = Vec::new();
    source.read_to_end(&mut data)?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(data.as_slice());

    validate_header(reader.headers()?)?;

    let mut rows = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        let record = result?;
        let line = start_line(&data, &record).unwrap_or(idx + 2);

        if record.len() != EXPECTED_HEADERS.len() {
            return Err(SourceError::ColumnCount {
                line,
                found: record.len(),
            });
        }

        rows.push(RawRow::new(&record[0], &record[1], &record[2], line));
    }

    debug!(rows = rows.len(), "parsed CSV rows");
    Ok(rows)
}

/// Physical line (1-indexed) where `record` starts.
///
/// csv stamps a record's position before skipping the empty lines that
/// precede it, so step over those terminators to land on the first field.
fn start_line(data: &[u8], record: &StringRecord) -> Option<usize> {
    let position = record.position()?;
    let offset = usize::try_from(position.byte()).ok()?;
    let skipped = data
        .get(offset..)?
        .iter()
        .take_while(|b| matches!(b, b'\r' | b'\n'))
        .filter(|b| **b == b'\n')
        .count();
    let line = usize::try_from(position.line()).ok()?;
    Some(line + skipped)
}

fn validate_header(headers: &StringRecord) -> Result<(), SourceError> {
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(SourceError::MissingHeader);
    }

    if headers.len() != EXPECTED_HEADERS.len() {
        return Err(SourceError::InvalidHeader {
            expected: EXPECTED_HEADERS.join(","),
            found: headers.iter().collect::<Vec<_>>().join(","),
        });
    }

    for (expected, found) in EXPECTED_HEADERS.iter().zip(headers.iter()) {
        if found.trim() != *expected {
            return Err(SourceError::InvalidHeader {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
    }

    Ok(())
}

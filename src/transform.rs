// Row Transformer - RawRow → TransactionRecord
//
// The source has no year column. By default the year is the processing
// year (wall clock at ingest), so a 12/31 row ingested in January lands in
// the wrong year. `YearPolicy::Fixed` lets the caller pin it instead.

use crate::error::RowError;
use crate::models::{RawRow, TransactionRecord};
use chrono::{Datelike, Local, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Years the store can date. SQLite date functions only understand 0000-9999.
pub const SUPPORTED_YEARS: RangeInclusive<i32> = 1..=9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum YearPolicy {
    /// Current local year at the moment the transformer is built
    #[default]
    ProcessingYear,
    Fixed(i32),
}

impl YearPolicy {
    pub fn resolve(&self) -> i32 {
        match self {
            YearPolicy::ProcessingYear => Local::now().year(),
            YearPolicy::Fixed(year) => *year,
        }
    }
}

impl From<Option<i32>> for YearPolicy {
    fn from(year: Option<i32>) -> Self {
        year.map_or(YearPolicy::ProcessingYear, YearPolicy::Fixed)
    }
}

/// Converts raw rows into records.
///
/// The year is resolved once at construction so every row of a run
/// shares it, even if the run straddles midnight on December 31.
#[derive(Debug, Clone)]
pub struct RowTransformer {
    year: i32,
}

impl RowTransformer {
    pub fn new(policy: YearPolicy) -> Self {
        RowTransformer {
            year: policy.resolve(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn transform(&self, row: &RawRow) -> Result<TransactionRecord, RowError> {
        let date = parse_date(&row.date, self.year)?;
        let transaction_id = parse_identifier(&row.id)?;
        let amount = parse_amount(&row.amount)?;

        Ok(TransactionRecord::new(transaction_id, date, amount))
    }
}

/// `MM/DD` in the given year. Single-digit month/day are accepted.
///
/// Years outside [`SUPPORTED_YEARS`] reject every date.
pub fn parse_date(text: &str, year: i32) -> Result<NaiveDate, RowError> {
    let invalid = || RowError::InvalidDate(text.to_string());

    if !SUPPORTED_YEARS.contains(&year) {
        return Err(invalid());
    }

    let parts: Vec<&str> = text.split('/').collect();
    if parts.len() != 2 {
        return Err(invalid());
    }

    let month: u32 = parts[0].trim().parse().map_err(|_| invalid())?;
    let day: u32 = parts[1].trim().parse().map_err(|_| invalid())?;

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

/// Non-negative integer that fits the store's INTEGER column.
pub fn parse_identifier(text: &str) -> Result<i64, RowError> {
    text.trim()
        .parse::<u64>()
        .ok()
        .and_then(|id| i64::try_from(id).ok())
        .ok_or_else(|| RowError::InvalidIdentifier(text.to_string()))
}

/// Signed decimal such as `+60.5`, `-10.3` or `42`, kept exact.
pub fn parse_amount(text: &str) -> Result<Decimal, RowError> {
    let invalid = || RowError::InvalidAmount(text.to_string());

    let trimmed = text.trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if unsigned.is_empty() || (unsigned.len() < trimmed.len() && unsigned.starts_with(['+', '-'])) {
        return Err(invalid());
    }

    Decimal::from_str(unsigned).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    fn transformer() -> RowTransformer {
        RowTransformer::new(YearPolicy::Fixed(2024))
    }

    #[test]
    fn test_transform_valid_row() {
        let row = RawRow::new("7", "07/15", "+60.5", 2);
        let record = transformer().transform(&row).unwrap();

        assert_eq!(record.id, None);
        assert_eq!(record.transaction_id, 7);
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 7, 15).unwrap());
        assert_eq!(record.amount, dec!(60.5));
    }

    #[test]
    fn test_single_digit_date() {
        let date = parse_date("3/2", 2024).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
    }

    #[test]
    fn test_date_wrong_shape() {
        for text in ["07-15", "07/15/2024", "0715", "", "/"] {
            assert_eq!(
                parse_date(text, 2024),
                Err(RowError::InvalidDate(text.to_string())),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn test_date_not_a_calendar_day() {
        assert!(parse_date("13/01", 2024).is_err());
        assert!(parse_date("02/30", 2024).is_err());
        assert!(parse_date("02/29", 2023).is_err());
        assert!(parse_date("02/29", 2024).is_ok());
    }

    #[test]
    fn test_identifier_rules() {
        assert_eq!(parse_identifier("0"), Ok(0));
        assert_eq!(parse_identifier(" 42 "), Ok(42));
        assert!(matches!(parse_identifier("-1"), Err(RowError::InvalidIdentifier(_))));
        assert!(matches!(parse_identifier("abc"), Err(RowError::InvalidIdentifier(_))));
        assert!(matches!(parse_identifier("1.5"), Err(RowError::InvalidIdentifier(_))));
        assert!(matches!(
            parse_identifier("18446744073709551615"),
            Err(RowError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_amount_rules() {
        assert_eq!(parse_amount("+60.5"), Ok(dec!(60.5)));
        assert_eq!(parse_amount("-10.3"), Ok(dec!(-10.3)));
        assert_eq!(parse_amount(" 42 "), Ok(dec!(42)));
        assert_eq!(parse_amount("-20.46").unwrap().to_string(), "-20.46");
        for text in ["ten", "inf", "NaN", "", "+", "+-5", "++5", "1.2.3"] {
            assert!(
                matches!(parse_amount(text), Err(RowError::InvalidAmount(_))),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn test_amounts_add_up_exactly() {
        let total: Decimal = ["+60.5", "-10.3", "-20.46", "+10"]
            .iter()
            .map(|a| parse_amount(a).unwrap())
            .sum();
        assert_eq!(total, dec!(39.74));
    }

    #[test]
    fn test_year_outside_store_range_rejects_rows() {
        assert!(parse_date("01/05", 9999).is_ok());
        assert!(matches!(parse_date("01/05", 10000), Err(RowError::InvalidDate(_))));
        assert!(matches!(parse_date("01/05", 0), Err(RowError::InvalidDate(_))));

        let row = RawRow::new("1", "1/05", "10", 2);
        let far_future = RowTransformer::new(YearPolicy::Fixed(10000));
        assert!(matches!(far_future.transform(&row), Err(RowError::InvalidDate(_))));
    }

    #[test]
    fn test_date_checked_before_amount() {
        let row = RawRow::new("1", "bad", "bad", 2);
        assert!(matches!(
            transformer().transform(&row),
            Err(RowError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_year_policy() {
        assert_eq!(YearPolicy::Fixed(1999).resolve(), 1999);
        assert_eq!(YearPolicy::from(None), YearPolicy::ProcessingYear);
        assert_eq!(YearPolicy::from(Some(2020)), YearPolicy::Fixed(2020));
        assert_eq!(
            RowTransformer::new(YearPolicy::ProcessingYear).year(),
            Local::now().year()
        );
    }
}

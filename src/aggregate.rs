// 📊 Aggregation Engine
//
// Runs the four summary queries against any `SummarySource`. Always covers
// the whole store, not just the latest run.

use crate::error::{StoreError, SummaryError};
use crate::models::MonthlyCount;
use crate::store::SummarySource;
use chrono::Month;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Calendar order, indexed by month number - 1
const MONTHS: [Month; 12] = [
    Month::January,
    Month::February,
    Month::March,
    Month::April,
    Month::May,
    Month::June,
    Month::July,
    Month::August,
    Month::September,
    Month::October,
    Month::November,
    Month::December,
];

/// Raw outputs of the aggregation queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    pub total_balance: Decimal,
    pub average_debit: Option<Decimal>,
    pub average_credit: Option<Decimal>,
    pub monthly_counts: Vec<MonthlyCount>,
}

fn failed(metric: &'static str) -> impl FnOnce(StoreError) -> SummaryError {
    move |source| SummaryError { metric, source }
}

/// Round to cents, halves away from zero.
pub fn to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Exact sum of every stored amount.
pub fn total_balance<S: SummarySource + ?Sized>(source: &S) -> Result<Decimal, SummaryError> {
    source.total_balance().map_err(failed("total balance"))
}

/// Mean of the negative amounts, rounded to cents.
pub fn average_debit<S: SummarySource + ?Sized>(
    source: &S,
) -> Result<Option<Decimal>, SummaryError> {
    Ok(source
        .average_debit()
        .map_err(failed("average debit amount"))?
        .map(to_cents))
}

/// Mean of the positive amounts, rounded to cents.
pub fn average_credit<S: SummarySource + ?Sized>(
    source: &S,
) -> Result<Option<Decimal>, SummaryError> {
    Ok(source
        .average_credit()
        .map_err(failed("average credit amount"))?
        .map(to_cents))
}

/// Non-empty months in calendar order (January first).
///
/// Month numbers outside 1-12 are dropped with a warning.
pub fn monthly_counts<S: SummarySource + ?Sized>(
    source: &S,
) -> Result<Vec<MonthlyCount>, SummaryError> {
    let counts = source
        .count_by_month()
        .map_err(failed("transactions by month"))?;

    for number in counts.keys().filter(|n| !(1..=12).contains(*n)) {
        warn!(month = number, "ignoring count for invalid month number");
    }

    Ok(MONTHS
        .iter()
        .zip(1u32..)
        .filter_map(|(month, number)| match counts.get(&number) {
            Some(&count) if count > 0 => Some(MonthlyCount::new(*month, count)),
            _ => None,
        })
        .collect())
}

/// Run every query. The first failing query aborts the whole summary.
pub fn aggregate<S: SummarySource + ?Sized>(source: &S) -> Result<Aggregates, SummaryError> {
    let total_balance = total_balance(source)?;
    info!("the total balance is: {}", total_balance);

    let average_debit = average_debit(source)?;
    info!(?average_debit, "average debit amount");

    let average_credit = average_credit(source)?;
    info!(?average_credit, "average credit amount");

    let monthly_counts = monthly_counts(source)?;
    info!(months = monthly_counts.len(), "transactions by month");

    Ok(Aggregates {
        total_balance,
        average_debit,
        average_credit,
        monthly_counts,
    })
}

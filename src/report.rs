// Summary Assembler + rendering
//
// Composition only. Any failure comes from the aggregation queries.

use crate::aggregate::{aggregate, to_cents};
use crate::error::SummaryError;
use crate::models::SummaryReport;
use crate::store::SummarySource;
use rust_decimal::Decimal;

impl SummaryReport {
    pub fn total_transactions(&self) -> u64 {
        self.monthly_counts().iter().map(|m| m.count).sum()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!("Transaction summary for {}\n\n", self.recipient()));
        out.push_str(&format!("Total balance: {}\n", format_amount(self.total_balance())));
        out.push_str(&format!("Average debit amount: {}\n", format_average(self.average_debit())));
        out.push_str(&format!("Average credit amount: {}\n", format_average(self.average_credit())));

        if !self.monthly_counts().is_empty() {
            out.push('\n');
        }
        for month in self.monthly_counts() {
            out.push_str(&format!("Number of transactions in {}: {}\n", month.month, month.count));
        }

        out
    }

    pub fn render_html(&self) -> String {
        let rows: String = self
            .monthly_counts()
            .iter()
            .map(|m| {
                format!(
                    "      <tr><td>Number of transactions in {}</td><td>{}</td></tr>\n",
                    escape_html(&m.month),
                    m.count
                )
            })
            .collect();

        format!(
            "<!DOCTYPE html>
<html>
  <body>
    <h2>Transaction summary</h2>
    <p>Prepared for {recipient}</p>
    <table>
      <tr><td>Total balance</td><td>{total}</td></tr>
      <tr><td>Average debit amount</td><td>{debit}</td></tr>
      <tr><td>Average credit amount</td><td>{credit}</td></tr>
{rows}    </table>
  </body>
</html>
",
            recipient = escape_html(self.recipient()),
            total = format_amount(self.total_balance()),
            debit = format_average(self.average_debit()),
            credit = format_average(self.average_credit()),
            rows = rows,
        )
    }
}

/// Query the store and assemble a report for `recipient`.
pub fn build_summary<S>(source: &S, recipient: &str) -> Result<SummaryReport, SummaryError>
where
    S: SummarySource + ?Sized,
{
    let aggregates = aggregate(source)?;
    Ok(SummaryReport::assemble(recipient, aggregates))
}

/// Two decimal places, padded when the amount has fewer.
fn format_amount(amount: Decimal) -> String {
    let mut cents = to_cents(amount);
    cents.rescale(2);
    cents.to_string()
}

fn format_average(value: Option<Decimal>) -> String {
    value.map_or_else(|| "n/a".to_string(), format_amount)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregates;
    use crate::models::{MonthlyCount, TransactionRecord};
    use crate::store::{SqliteStore, TransactionStore};
    use chrono::{Month, NaiveDate};
    use rust_decimal::dec;

    fn sample_for(recipient: &str) -> SummaryReport {
        SummaryReport::assemble(
            recipient,
            Aggregates {
                total_balance: dec!(39.74),
                average_debit: Some(dec!(-15.38)),
                average_credit: None,
                monthly_counts: vec![
                    MonthlyCount::new(Month::July, 2),
                    MonthlyCount::new(Month::August, 2),
                ],
            },
        )
    }

    fn sample() -> SummaryReport {
        sample_for("alice@example.com")
    }

    #[test]
    fn test_assemble_copies_every_field() {
        let report = sample();

        assert_eq!(report.recipient(), "alice@example.com");
        assert_eq!(report.total_balance(), dec!(39.74));
        assert_eq!(report.average_debit(), Some(dec!(-15.38)));
        assert_eq!(report.average_credit(), None);
        assert_eq!(report.monthly_counts().len(), 2);
        assert_eq!(report.total_transactions(), 4);
    }

    #[test]
    fn test_render_text() {
        let text = sample().render_text();

        assert!(text.contains("Total balance: 39.74"));
        assert!(text.contains("Average debit amount: -15.38"));
        assert!(text.contains("Average credit amount: n/a"));
        assert!(text.contains("Number of transactions in July: 2"));
        assert!(text.find("July").unwrap() < text.find("August").unwrap());
    }

    #[test]
    fn test_render_pads_and_rounds_to_cents() {
        let report = SummaryReport::assemble(
            "alice@example.com",
            Aggregates {
                total_balance: dec!(40),
                average_debit: Some(dec!(-2.005)),
                average_credit: Some(dec!(7.1)),
                monthly_counts: Vec::new(),
            },
        );
        let text = report.render_text();

        assert!(text.contains("Total balance: 40.00\n"));
        assert!(text.contains("Average debit amount: -2.01\n"));
        assert!(text.contains("Average credit amount: 7.10\n"));
        assert!(report.render_html().contains("<td>40.00</td>"));
    }

    #[test]
    fn test_render_html_escapes_recipient() {
        let report = sample_for("<script>");

        let html = report.render_html();
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("<td>Number of transactions in August</td><td>2</td>"));
    }

    #[test]
    fn test_report_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();

        assert_eq!(json["recipient"], "alice@example.com");
        assert_eq!(json["total_balance"], "39.74");
        assert_eq!(json["average_debit"], "-15.38");
        assert!(json["average_credit"].is_null());
        assert_eq!(json["monthly_counts"][0]["month"], "July");
        assert_eq!(json["monthly_counts"][0]["count"], 2);
    }

    #[test]
    fn test_build_summary_from_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (id, (month, day), amount) in [
            (1, (1, 5), dec!(100.0)),
            (2, (1, 20), dec!(-25.5)),
            (3, (3, 2), dec!(-4.5)),
        ] {
            let date = NaiveDate::from_ymd_opt(2024, month, day).unwrap();
            store.insert(&TransactionRecord::new(id, date, amount)).unwrap();
        }

        let report = build_summary(&store, "bob@example.com").unwrap();

        assert_eq!(report.total_balance(), dec!(70));
        assert_eq!(report.average_debit(), Some(dec!(-15)));
        assert_eq!(report.average_credit(), Some(dec!(100)));
        assert_eq!(
            report.monthly_counts(),
            [
                MonthlyCount::new(Month::January, 2),
                MonthlyCount::new(Month::March, 1),
            ]
        );
    }
}

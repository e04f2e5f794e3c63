use crate::engine::{CheckOutcome, Finding};
use crate::schema::{Amounts, BalanceRecord};
use crate::utils::{period_rank, TOLERANCE};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last year's closing pair differs from this year's opening pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityMismatch {
    pub account_code: String,
    pub account_name: String,
    pub dimension_name: Option<String>,
    pub company: String,
    pub prev_year: i32,
    pub curr_year: i32,
    pub prev_closing: Amounts,
    pub curr_opening: Amounts,
    /// `prev_closing.debit - curr_opening.debit`.
    pub debit_difference: f64,
    pub credit_difference: f64,
}

impl Finding for ContinuityMismatch {
    fn message(&self) -> String {
        let dimension = self
            .dimension_name
            .as_ref()
            .map(|d| format!(" dimension: {}", d))
            .unwrap_or_default();
        format!(
            "Account {} ({}){} {}: {} closing (debit {:.2} / credit {:.2}) != {} opening (debit {:.2} / credit {:.2}), difference (debit {:.2} / credit {:.2})",
            self.account_code,
            self.account_name,
            dimension,
            self.company,
            self.prev_year,
            self.prev_closing.debit,
            self.prev_closing.credit,
            self.curr_year,
            self.curr_opening.debit,
            self.curr_opening.credit,
            self.debit_difference,
            self.credit_difference
        )
    }
}

/// Allowed carry-forward drift per side: two minor units, deliberately wider
/// than the per-row [`TOLERANCE`]. Closing and opening cells are rounded
/// independently by the source system, so a 499.98 opening against a 500.00
/// closing passes while 499.97 fails. Compared on cent-rounded differences.
pub const CARRY_FORWARD_TOLERANCE: f64 = 2.0 * TOLERANCE;

fn cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Per-side carry-forward check between consecutive fiscal years.
#[derive(Debug, Clone, Default)]
pub struct YearContinuityChecker;

impl YearContinuityChecker {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, records: &[BalanceRecord]) -> CheckOutcome<ContinuityMismatch> {
        let mut outcome = CheckOutcome::default();

        // (company, code, dimension) -> year -> rows of that year
        let mut groups: BTreeMap<(&str, &str, Option<&str>), BTreeMap<i32, Vec<&BalanceRecord>>> =
            BTreeMap::new();

        for record in records {
            let code = record.effective_code();
            if code.is_empty() || record.is_grand_total() {
                continue;
            }
            let Some(year) = record.year() else {
                debug!(
                    "No year in period '{}' for account {}; excluded from continuity",
                    record.period, code
                );
                continue;
            };
            groups
                .entry((record.company.as_str(), code, record.dimension()))
                .or_default()
                .entry(year)
                .or_default()
                .push(record);
        }

        for ((company, code, dimension), years) in &groups {
            let ordered: Vec<(&i32, &Vec<&BalanceRecord>)> = years.iter().collect();

            for pair in ordered.windows(2) {
                let (prev_year, prev_rows) = pair[0];
                let (curr_year, curr_rows) = pair[1];
                if *curr_year != prev_year + 1 {
                    continue;
                }

                let Some(prev) = prev_rows.iter().max_by_key(|r| period_rank(&r.period)) else {
                    continue;
                };
                let Some(curr) = curr_rows.iter().min_by_key(|r| period_rank(&r.period)) else {
                    continue;
                };

                let debit_difference = prev.closing.debit - curr.opening.debit;
                let credit_difference = prev.closing.credit - curr.opening.credit;

                let allowed = cents(CARRY_FORWARD_TOLERANCE);
                if cents(debit_difference).abs() <= allowed
                    && cents(credit_difference).abs() <= allowed
                {
                    outcome.pass();
                    continue;
                }

                outcome.fail(ContinuityMismatch {
                    account_code: code.to_string(),
                    account_name: curr.account_name.clone(),
                    dimension_name: dimension.map(str::to_string),
                    company: company.to_string(),
                    prev_year: *prev_year,
                    curr_year: *curr_year,
                    prev_closing: prev.closing,
                    curr_opening: curr.opening,
                    debit_difference,
                    credit_difference,
                });
            }
        }

        outcome
    }
}

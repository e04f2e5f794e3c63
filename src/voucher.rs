//! Journal-entry totals against the balance table's year-to-date movement.
//!
//! Vouchers are summed per (company, account code, year) and joined onto the
//! account's own balance row for that year. Only accounts that actually receive
//! postings take part; rollup parents never appear in the voucher table.
//! Dimension rows of a posted account are not compared one by one, because
//! voucher lines carry no dimension; they are counted as skipped and only the
//! account's own total row is reconciled.

use crate::engine::{CheckOutcome, Finding};
use crate::schema::{Amounts, BalanceRecord, VoucherRecord};
use crate::utils::{period_rank, TOLERANCE};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoucherMismatch {
    pub account_code: String,
    pub account_name: String,
    pub dimension_name: Option<String>,
    pub company: String,
    pub year: i32,
    pub voucher: Amounts,
    pub balance: Amounts,
    /// `balance.debit - voucher.debit`.
    pub debit_difference: f64,
    pub credit_difference: f64,
}

impl Finding for VoucherMismatch {
    fn message(&self) -> String {
        format!(
            "Voucher mismatch: account {} ({}) {} {}: vouchers (debit {:.2} / credit {:.2}) != balance (debit {:.2} / credit {:.2}), difference (debit {:.2} / credit {:.2})",
            self.account_code,
            self.account_name,
            self.company,
            self.year,
            self.voucher.debit,
            self.voucher.credit,
            self.balance.debit,
            self.balance.credit,
            self.debit_difference,
            self.credit_difference
        )
    }
}

/// Year a voucher line is booked to, or `None` when its recorded fiscal year
/// and its date disagree (or neither is present).
pub fn posting_year(voucher: &VoucherRecord) -> Option<i32> {
    match (voucher.fiscal_year, voucher.calendar_year()) {
        (Some(fiscal), Some(calendar)) if fiscal == calendar => Some(fiscal),
        (Some(_), Some(_)) => None,
        (Some(fiscal), None) => Some(fiscal),
        (None, calendar) => calendar,
    }
}

/// Sums voucher lines per (company, account code, year).
pub fn aggregate_vouchers(vouchers: &[VoucherRecord]) -> (BTreeMap<(String, String, i32), Amounts>, usize) {
    let mut totals: BTreeMap<(String, String, i32), Amounts> = BTreeMap::new();
    let mut unmatched = 0;

    for line in vouchers {
        let code = line.account_code.trim();
        if code.is_empty() {
            continue;
        }
        let Some(year) = posting_year(line) else {
            unmatched += 1;
            continue;
        };
        *totals
            .entry((line.company.clone(), code.to_string(), year))
            .or_default() += line.amounts();
    }

    (totals, unmatched)
}

#[derive(Debug, Clone, Default)]
pub struct VoucherReconciler;

impl VoucherReconciler {
    pub fn new() -> Self {
        Self
    }

    pub fn reconcile(
        &self,
        balances: &[BalanceRecord],
        vouchers: &[VoucherRecord],
    ) -> CheckOutcome<VoucherMismatch> {
        let mut outcome = CheckOutcome::default();

        let (totals, unmatched) = aggregate_vouchers(vouchers);
        if unmatched > 0 {
            warn!(
                "{} voucher lines have a fiscal year that disagrees with their date; excluded",
                unmatched
            );
            outcome.warnings.push(format!(
                "{} voucher lines excluded: fiscal year and date year disagree",
                unmatched
            ));
        }

        let posted_codes: HashSet<&str> = totals.keys().map(|(_, code, _)| code.as_str()).collect();
        info!("Vouchers post to {} distinct accounts", posted_codes.len());

        // the account's own row for each (company, code, year), latest period wins
        let mut rows: BTreeMap<(&str, &str, i32), &BalanceRecord> = BTreeMap::new();
        let mut dimension_rows = 0;

        for record in balances {
            let code = record.effective_code();
            if !posted_codes.contains(code) {
                continue;
            }
            if record.is_dimension_row {
                dimension_rows += 1;
                continue;
            }
            let Some(year) = record.year() else {
                continue;
            };
            rows.entry((record.company.as_str(), code, year))
                .and_modify(|existing| {
                    if period_rank(&record.period) > period_rank(&existing.period) {
                        *existing = record;
                    }
                })
                .or_insert(record);
        }

        if dimension_rows > 0 {
            outcome.skipped += dimension_rows;
            outcome.warnings.push(format!(
                "{} dimension rows not reconciled; vouchers are compared with account totals only",
                dimension_rows
            ));
        }

        debug!("{} balance rows joined against voucher totals", rows.len());

        for ((company, code, year), record) in rows {
            let Some(voucher) = totals.get(&(company.to_string(), code.to_string(), year)) else {
                continue;
            };
            let balance = record.cumulative;

            let debit_difference = balance.debit - voucher.debit;
            let credit_difference = balance.credit - voucher.credit;

            if debit_difference.abs() <= TOLERANCE && credit_difference.abs() <= TOLERANCE {
                outcome.pass();
                continue;
            }

            outcome.fail(VoucherMismatch {
                account_code: code.to_string(),
                account_name: record.account_name.clone(),
                dimension_name: None,
                company: company.to_string(),
                year,
                voucher: *voucher,
                balance,
                debit_difference,
                credit_difference,
            });
        }

        outcome
    }
}

use crate::balance::{to_pair, RowNets};
use crate::chart_of_accounts::classify_record;
use crate::engine::{log_outcome, CheckOutcome, Finding};
use crate::error::{LedgerAuditError, Result};
use crate::identity::{IdentityValidator, IdentityViolation};
use crate::schema::{AccountClass, Amounts, BalanceRecord, BalanceTable};
use crate::utils::TOLERANCE;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One rewritten opening balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningAdjustment {
    pub row_index: usize,
    pub account_code: String,
    pub account_name: String,
    pub dimension_name: Option<String>,
    pub class: AccountClass,
    pub company: String,
    pub year: i32,
    pub old_opening: Amounts,
    pub new_opening: Amounts,
}

impl Finding for OpeningAdjustment {
    fn message(&self) -> String {
        let dimension = self
            .dimension_name
            .as_ref()
            .map(|d| format!(" dimension: {}", d))
            .unwrap_or_default();
        format!(
            "Adjusted {} ({}){} [{}] {} {}: opening debit {:.2} -> {:.2}, opening credit {:.2} -> {:.2}",
            self.account_code,
            self.account_name,
            dimension,
            self.class,
            self.company,
            self.year,
            self.old_opening.debit,
            self.new_opening.debit,
            self.old_opening.credit,
            self.new_opening.credit
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverReport {
    pub years: BTreeSet<i32>,
    pub rows_in_scope: usize,
    pub adjustments: Vec<OpeningAdjustment>,
    /// Unclassifiable rows left untouched.
    pub untouched_unknown: Vec<String>,
    /// Identity re-check over the same scope after adjusting.
    pub post_check: Option<CheckOutcome<IdentityViolation>>,
}

impl SolverReport {
    pub fn adjusted(&self) -> usize {
        self.adjustments.len()
    }

    pub fn post_check_passed(&self) -> bool {
        self.post_check.as_ref().is_some_and(|c| c.is_clean())
    }
}

/// Derives each row's opening balance as `closing_net - period_net` and writes it
/// back as a strict either/or pair on the row's normal side.
#[derive(Debug, Clone)]
pub struct OpeningBalanceSolver {
    years: BTreeSet<i32>,
}

impl OpeningBalanceSolver {
    pub fn new(years: BTreeSet<i32>) -> Self {
        Self { years }
    }

    pub fn years(&self) -> &BTreeSet<i32> {
        &self.years
    }

    fn in_scope(&self, record: &BalanceRecord) -> Option<i32> {
        record.year().filter(|y| self.years.contains(y))
    }

    /// The opening pair implied by the row's closing balance and period movement.
    /// Unknown classifications return the stored pair unchanged.
    pub fn derive_opening(record: &BalanceRecord) -> Amounts {
        let class = classify_record(record);
        if !class.is_known() {
            warn!(
                "Refusing to derive opening balance for unclassifiable account '{}' ({}) in {} {}",
                record.effective_code(),
                record.account_name,
                record.company,
                record.period
            );
            return record.opening;
        }

        let nets = RowNets::for_record_as(record, class);
        to_pair(nets.derived_opening(), nets.side)
    }

    /// Rewrites opening balances in place. Callers must re-validate afterwards;
    /// see [`reconcile_opening_balances`] for the guarded variant.
    pub fn solve(&self, table: &mut BalanceTable) -> SolverReport {
        info!("Deriving opening balances for years {:?}", self.years);

        let mut report = SolverReport {
            years: self.years.clone(),
            rows_in_scope: 0,
            adjustments: Vec::new(),
            untouched_unknown: Vec::new(),
            post_check: None,
        };

        for (idx, record) in table.records.iter_mut().enumerate() {
            let Some(year) = self.in_scope(record) else {
                continue;
            };
            report.rows_in_scope += 1;

            if record.is_grand_total() {
                continue;
            }

            let class = classify_record(record);
            if !class.is_known() {
                let note = format!(
                    "Left unclassifiable account '{}' ({}) {} {} unchanged",
                    record.effective_code(),
                    record.account_name,
                    record.company,
                    record.period
                );
                warn!("{}", note);
                report.untouched_unknown.push(note);
                continue;
            }

            let derived = Self::derive_opening(record);
            let current = record.opening;

            let needs_adjustment = (derived.debit - current.debit).abs() > TOLERANCE
                || (derived.credit - current.credit).abs() > TOLERANCE;

            if !needs_adjustment {
                continue;
            }

            record.opening = derived;

            let adjustment = OpeningAdjustment {
                row_index: idx,
                account_code: record.effective_code().to_string(),
                account_name: record.account_name.clone(),
                dimension_name: record.dimension().map(str::to_string),
                class,
                company: record.company.clone(),
                year,
                old_opening: current,
                new_opening: derived,
            };
            info!("{}", adjustment.message());
            report.adjustments.push(adjustment);
        }

        info!(
            "Adjusted {} of {} rows in scope",
            report.adjustments.len(),
            report.rows_in_scope
        );

        report
    }

    /// Re-runs the identity check over the solver's year scope.
    pub fn verify(&self, table: &BalanceTable) -> CheckOutcome<IdentityViolation> {
        IdentityValidator::with_years(self.years.clone()).validate(&table.records)
    }
}

/// Solves a private copy of the table, re-validates it, and only on a clean
/// post-check replaces `table` with the corrected copy.
///
/// On failure `table` is left exactly as it was and
/// [`LedgerAuditError::SolverPostCheckFailure`] is returned.
pub fn reconcile_opening_balances(
    table: &mut BalanceTable,
    years: &BTreeSet<i32>,
) -> Result<SolverReport> {
    let solver = OpeningBalanceSolver::new(years.clone());

    let mut working = table.clone();
    let mut report = solver.solve(&mut working);

    let post_check = solver.verify(&working);
    log_outcome("Opening balance post-check", &post_check, 10);

    if !post_check.is_clean() {
        error!(
            "{} rows still unbalanced after {} adjustments; discarding corrections",
            post_check.failed,
            report.adjusted()
        );
        return Err(LedgerAuditError::SolverPostCheckFailure {
            adjusted: report.adjusted(),
            failed: post_check.failed,
        });
    }

    report.post_check = Some(post_check);
    *table = working;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        code: &str,
        name: &str,
        period: &str,
        opening: Amounts,
        cumulative: Amounts,
        closing: Amounts,
    ) -> BalanceRecord {
        BalanceRecord {
            company: "A".to_string(),
            period: period.to_string(),
            account_code: code.to_string(),
            account_code_path: String::new(),
            account_name: name.to_string(),
            account_name_path: String::new(),
            is_dimension_row: false,
            dimension_name: None,
            opening,
            cumulative,
            closing,
        }
    }

    fn years(list: &[i32]) -> BTreeSet<i32> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_derive_opening_asset() {
        let r = record(
            "1122",
            "应收账款",
            "2024",
            Amounts::default(),
            Amounts::new(800.0, 300.0),
            Amounts::new(1500.0, 0.0),
        );
        assert_eq!(OpeningBalanceSolver::derive_opening(&r), Amounts::new(1000.0, 0.0));
    }

    #[test]
    fn test_derive_opening_liability_negative_net() {
        // credit-normal account whose derived opening is a debit balance
        let r = record(
            "2202",
            "应付账款",
            "2024",
            Amounts::default(),
            Amounts::new(0.0, 500.0),
            Amounts::new(0.0, 200.0),
        );
        assert_eq!(OpeningBalanceSolver::derive_opening(&r), Amounts::new(300.0, 0.0));
    }

    #[test]
    fn test_unknown_row_untouched() {
        let mut table = BalanceTable::new(vec![record(
            "9999",
            "其他",
            "2024",
            Amounts::new(7.0, 3.0),
            Amounts::new(1.0, 0.0),
            Amounts::new(50.0, 0.0),
        )]);
        let report = OpeningBalanceSolver::new(years(&[2024])).solve(&mut table);
        assert_eq!(report.adjusted(), 0);
        assert_eq!(report.untouched_unknown.len(), 1);
        assert_eq!(table.records[0].opening, Amounts::new(7.0, 3.0));
    }

    #[test]
    fn test_unrecognized_code_classified_by_path() {
        let mut r = record(
            "9999",
            "其他",
            "2024",
            Amounts::default(),
            Amounts::new(800.0, 300.0),
            Amounts::new(1500.0, 0.0),
        );
        r.account_code_path = "/1002/9999/".to_string();
        let mut table = BalanceTable::new(vec![r]);

        let report = OpeningBalanceSolver::new(years(&[2024])).solve(&mut table);
        assert_eq!(report.adjusted(), 1);
        assert!(report.untouched_unknown.is_empty());
        assert_eq!(table.records[0].opening, Amounts::new(1000.0, 0.0));
    }

    #[test]
    fn test_grand_total_and_out_of_scope_rows_skipped() {
        let mut table = BalanceTable::new(vec![
            record(
                "",
                "合计",
                "2024",
                Amounts::default(),
                Amounts::new(10.0, 0.0),
                Amounts::new(99.0, 0.0),
            ),
            record(
                "1002",
                "银行存款",
                "2023",
                Amounts::default(),
                Amounts::new(10.0, 0.0),
                Amounts::new(99.0, 0.0),
            ),
        ]);
        let report = OpeningBalanceSolver::new(years(&[2024])).solve(&mut table);
        assert_eq!(report.rows_in_scope, 1);
        assert_eq!(report.adjusted(), 0);
        assert_eq!(table.records[1].opening, Amounts::default());
    }

    #[test]
    fn test_solve_then_verify_passes() {
        let mut table = BalanceTable::new(vec![
            record(
                "1002",
                "银行存款",
                "2024",
                Amounts::new(5.0, 5.0),
                Amounts::new(300.0, 100.0),
                Amounts::new(700.0, 0.0),
            ),
            record(
                "4001",
                "主营业务收入",
                "2025",
                Amounts::new(20.0, 0.0),
                Amounts::new(0.0, 900.0),
                Amounts::new(0.0, 900.0),
            ),
        ]);

        let report = reconcile_opening_balances(&mut table, &years(&[2024, 2025])).unwrap();
        assert_eq!(report.adjusted(), 2);
        assert!(report.post_check_passed());
        assert_eq!(table.records[0].opening, Amounts::new(500.0, 0.0));
        assert_eq!(table.records[1].opening, Amounts::new(0.0, 0.0));
        assert_eq!(report.adjustments[0].old_opening, Amounts::new(5.0, 5.0));
    }

    #[test]
    fn test_failed_post_check_leaves_table_unchanged() {
        // the grand-total row is never rewritten, so it keeps failing the re-check
        let rows = vec![
            record(
                "1002",
                "合计",
                "2024",
                Amounts::new(0.0, 0.0),
                Amounts::new(10.0, 0.0),
                Amounts::new(50.0, 0.0),
            ),
            record(
                "1122",
                "应收账款",
                "2024",
                Amounts::new(1.0, 0.0),
                Amounts::new(10.0, 0.0),
                Amounts::new(50.0, 0.0),
            ),
        ];
        let mut table = BalanceTable::new(rows.clone());

        let result = reconcile_opening_balances(&mut table, &years(&[2024]));
        match result {
            Err(LedgerAuditError::SolverPostCheckFailure { adjusted, failed }) => {
                assert_eq!(adjusted, 1);
                assert_eq!(failed, 1);
            }
            other => panic!("expected post-check failure, got {:?}", other),
        }
        assert_eq!(table.records, rows);
    }
}

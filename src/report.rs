use crate::chart_of_accounts::normal_side;
use crate::continuity::ContinuityMismatch;
use crate::engine::{AuditSummary, CheckOutcome, Finding};
use crate::error::Result;
use crate::hierarchy::HierarchyMismatch;
use crate::identity::IdentityViolation;
use crate::schema::{AccountClass, NormalSide};
use crate::solver::SolverReport;
use crate::voucher::VoucherMismatch;
use chrono::Local;
use csv::Writer;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;

const RULE: &str = "============================================================";

fn write_section<F: Finding>(out: &mut String, title: &str, outcome: &CheckOutcome<F>, limit: usize) {
    let _ = writeln!(out, "{}:", title);
    let _ = writeln!(
        out,
        "  passed: {}, failed: {}, skipped: {}",
        outcome.passed, outcome.failed, outcome.skipped
    );

    if !outcome.findings.is_empty() {
        let _ = writeln!(out, "  errors:");
        for finding in outcome.findings.iter().take(limit) {
            let _ = writeln!(out, "    - {}", finding.message());
        }
        if outcome.findings.len() > limit {
            let _ = writeln!(out, "    - ... and {} more", outcome.findings.len() - limit);
        }
    }

    if !outcome.warnings.is_empty() {
        let _ = writeln!(out, "  warnings:");
        for warning in outcome.warnings.iter().take(limit) {
            let _ = writeln!(out, "    - {}", warning);
        }
        if outcome.warnings.len() > limit {
            let _ = writeln!(out, "    - ... and {} more", outcome.warnings.len() - limit);
        }
    }

    out.push('\n');
}

/// Plain-text summary: totals, then per check its counters and the first
/// `limit` messages.
pub fn render_text_report(summary: &AuditSummary, limit: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "Ledger validation report");
    let _ = writeln!(out, "{}\n", RULE);
    let _ = writeln!(out, "Generated at: {}", summary.generated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Total passed: {}", summary.total_passed());
    let _ = writeln!(out, "Total failed: {}", summary.total_failed());
    let _ = writeln!(out, "Total skipped: {}\n", summary.total_skipped());

    write_section(&mut out, "Accounting identity", &summary.identity, limit);
    write_section(&mut out, "Year continuity", &summary.continuity, limit);
    write_section(&mut out, "Hierarchy rollup", &summary.hierarchy, limit);
    write_section(&mut out, "Voucher reconciliation", &summary.voucher, limit);

    out
}

/// One line of the wide error table. Columns a check does not produce stay blank.
#[derive(Debug, Default, Serialize)]
struct ErrorRow {
    check: &'static str,
    kind: &'static str,
    account_code: String,
    account_name: Option<String>,
    dimension: Option<String>,
    classification: Option<AccountClass>,
    company: String,
    period: Option<String>,
    year: Option<i32>,
    message: String,
    difference: Option<f64>,
    opening_net: Option<f64>,
    period_net: Option<f64>,
    closing_net: Option<f64>,
    expected_closing: Option<f64>,
    voucher_debit: Option<f64>,
    voucher_credit: Option<f64>,
    balance_debit: Option<f64>,
    balance_credit: Option<f64>,
    debit_difference: Option<f64>,
    credit_difference: Option<f64>,
    prev_year: Option<i32>,
    curr_year: Option<i32>,
    prev_closing_debit: Option<f64>,
    prev_closing_credit: Option<f64>,
    curr_opening_debit: Option<f64>,
    curr_opening_credit: Option<f64>,
    parent_code: Option<String>,
    field: Option<String>,
    parent_value: Option<f64>,
    child_sum: Option<f64>,
}

impl From<&IdentityViolation> for ErrorRow {
    fn from(v: &IdentityViolation) -> Self {
        Self {
            check: "accounting_identity",
            kind: "identity_violation",
            account_code: v.account_code.clone(),
            account_name: Some(v.account_name.clone()),
            dimension: v.dimension_name.clone(),
            classification: Some(v.class),
            company: v.company.clone(),
            period: Some(v.period.clone()),
            message: v.message(),
            difference: Some(v.difference),
            opening_net: Some(v.opening_net),
            period_net: Some(v.period_net),
            closing_net: Some(v.closing_net),
            expected_closing: Some(v.expected_closing),
            ..Default::default()
        }
    }
}

impl From<&ContinuityMismatch> for ErrorRow {
    fn from(m: &ContinuityMismatch) -> Self {
        Self {
            check: "year_continuity",
            kind: "continuity_mismatch",
            account_code: m.account_code.clone(),
            account_name: Some(m.account_name.clone()),
            dimension: m.dimension_name.clone(),
            company: m.company.clone(),
            year: Some(m.curr_year),
            message: m.message(),
            debit_difference: Some(m.debit_difference),
            credit_difference: Some(m.credit_difference),
            prev_year: Some(m.prev_year),
            curr_year: Some(m.curr_year),
            prev_closing_debit: Some(m.prev_closing.debit),
            prev_closing_credit: Some(m.prev_closing.credit),
            curr_opening_debit: Some(m.curr_opening.debit),
            curr_opening_credit: Some(m.curr_opening.credit),
            ..Default::default()
        }
    }
}

impl From<&HierarchyMismatch> for ErrorRow {
    fn from(m: &HierarchyMismatch) -> Self {
        Self {
            check: "hierarchy_rollup",
            kind: "hierarchy_mismatch",
            account_code: m.parent_code.clone(),
            account_name: Some(m.parent_name.clone()),
            classification: Some(m.class),
            company: m.company.clone(),
            period: Some(m.period.clone()),
            message: m.message(),
            difference: Some(m.difference),
            parent_code: Some(m.parent_code.clone()),
            field: Some(m.field.clone()),
            parent_value: Some(m.parent_value),
            child_sum: Some(m.child_sum),
            ..Default::default()
        }
    }
}

impl From<&VoucherMismatch> for ErrorRow {
    fn from(m: &VoucherMismatch) -> Self {
        Self {
            check: "voucher_reconciliation",
            kind: "voucher_mismatch",
            account_code: m.account_code.clone(),
            account_name: Some(m.account_name.clone()),
            dimension: m.dimension_name.clone(),
            company: m.company.clone(),
            year: Some(m.year),
            message: m.message(),
            voucher_debit: Some(m.voucher.debit),
            voucher_credit: Some(m.voucher.credit),
            balance_debit: Some(m.balance.debit),
            balance_credit: Some(m.balance.credit),
            debit_difference: Some(m.debit_difference),
            credit_difference: Some(m.credit_difference),
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
struct AllPassedRow {
    result: &'static str,
}

/// Writes every finding of every check as one CSV row. Returns the number of
/// findings written; an empty summary yields a single "all passed" row.
pub fn write_error_table<W: Write>(summary: &AuditSummary, writer: W) -> Result<usize> {
    let mut rows: Vec<ErrorRow> = Vec::new();
    rows.extend(summary.identity.findings.iter().map(ErrorRow::from));
    rows.extend(summary.continuity.findings.iter().map(ErrorRow::from));
    rows.extend(summary.hierarchy.findings.iter().map(ErrorRow::from));
    rows.extend(summary.voucher.findings.iter().map(ErrorRow::from));

    let mut csv = Writer::from_writer(writer);
    if rows.is_empty() {
        csv.serialize(AllPassedRow {
            result: "All checks passed; no errors found",
        })?;
    } else {
        for row in &rows {
            csv.serialize(row)?;
        }
    }
    csv.flush()?;

    Ok(rows.len())
}

/// Where the adjusted table came from and where its backup went.
#[derive(Debug, Clone)]
pub struct AdjustmentContext {
    pub source: PathBuf,
    pub backup: Option<PathBuf>,
}

fn side_word(side: NormalSide) -> &'static str {
    match side {
        NormalSide::Debit => "debit",
        NormalSide::Credit => "credit",
    }
}

pub fn render_adjustment_log(report: &SolverReport, context: &AdjustmentContext) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "Opening balance adjustment log");
    let _ = writeln!(out, "{}\n", RULE);
    let _ = writeln!(out, "Adjusted at: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Source file: {}", context.source.display());
    if let Some(backup) = &context.backup {
        let _ = writeln!(out, "Backup file: {}", backup.display());
    }

    let years: Vec<String> = report.years.iter().map(|y| y.to_string()).collect();
    let _ = writeln!(out, "\nMethod:");
    let _ = writeln!(out, "- opening = closing - period movement, on the account's normal side");
    let _ = writeln!(out, "- years: {}", years.join(", "));
    let _ = writeln!(out, "- scope: every row of those years, dimension rows included");

    let _ = writeln!(out, "\nRules per classification:");
    for class in [
        AccountClass::Asset,
        AccountClass::Liability,
        AccountClass::Equity,
        AccountClass::Income,
        AccountClass::Expense,
    ] {
        let side = normal_side(class);
        let _ = writeln!(
            out,
            "- {}: positive net to {} ({}), negative net to {} ({})",
            class,
            side_word(side),
            side.label(),
            side_word(side.opposite()),
            side.opposite().label()
        );
    }
    let _ = writeln!(out, "- unknown: left unchanged");

    let _ = writeln!(
        out,
        "\nRows in scope: {}, adjusted: {}, unclassifiable: {}",
        report.rows_in_scope,
        report.adjusted(),
        report.untouched_unknown.len()
    );
    if let Some(check) = &report.post_check {
        let _ = writeln!(
            out,
            "Post-check: passed {}, failed {}, skipped {}",
            check.passed, check.failed, check.skipped
        );
    }

    if !report.adjustments.is_empty() {
        let _ = writeln!(out, "\nAdjustments:");
        for adjustment in &report.adjustments {
            let _ = writeln!(out, "  - {}", adjustment.message());
        }
    }

    if !report.untouched_unknown.is_empty() {
        let _ = writeln!(out, "\nUnchanged:");
        for note in &report.untouched_unknown {
            let _ = writeln!(out, "  - {}", note);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Amounts;
    use std::collections::BTreeSet;

    fn summary_with_findings() -> AuditSummary {
        let mut identity = CheckOutcome::default();
        identity.pass();
        for i in 0..3 {
            identity.fail(IdentityViolation {
                account_code: format!("100{}", i),
                account_name: "银行存款".to_string(),
                dimension_name: None,
                class: AccountClass::Asset,
                company: "A".to_string(),
                period: "2024".to_string(),
                opening_net: 100.0,
                period_net: 0.0,
                closing_net: 90.0,
                expected_closing: 100.0,
                difference: -10.0,
            });
        }

        let mut voucher = CheckOutcome::default();
        voucher.fail(VoucherMismatch {
            account_code: "6602".to_string(),
            account_name: "管理费用".to_string(),
            dimension_name: None,
            company: "B".to_string(),
            year: 2024,
            voucher: Amounts::new(12000.0, 0.0),
            balance: Amounts::new(11500.0, 0.0),
            debit_difference: -500.0,
            credit_difference: 0.0,
        });

        AuditSummary {
            generated_at: Local::now().naive_local(),
            identity,
            continuity: CheckOutcome::default(),
            hierarchy: CheckOutcome::default(),
            voucher,
        }
    }

    #[test]
    fn test_text_report_truncates() {
        let text = render_text_report(&summary_with_findings(), 2);
        assert!(text.contains("Total passed: 1"));
        assert!(text.contains("Total failed: 4"));
        assert!(text.contains("1000"));
        assert!(text.contains("1001"));
        assert!(!text.contains("Account 1002"));
        assert!(text.contains("... and 1 more"));
        assert!(text.contains("6602"));
    }

    #[test]
    fn test_error_table_is_wide_and_sparse() {
        let mut buf = Vec::new();
        let written = write_error_table(&summary_with_findings(), &mut buf).unwrap();
        assert_eq!(written, 4);

        let mut reader = csv::Reader::from_reader(buf.as_slice());
        let headers = reader.headers().unwrap().clone();
        assert!(headers.iter().any(|h| h == "child_sum"));
        assert!(headers.iter().any(|h| h == "voucher_debit"));

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);

        let voucher_col = headers.iter().position(|h| h == "voucher_debit").unwrap();
        assert_eq!(rows[0].get(voucher_col), Some(""));
        assert_eq!(rows[3].get(voucher_col), Some("12000.0"));
    }

    #[test]
    fn test_error_table_when_clean() {
        let summary = AuditSummary {
            generated_at: Local::now().naive_local(),
            identity: CheckOutcome::default(),
            continuity: CheckOutcome::default(),
            hierarchy: CheckOutcome::default(),
            voucher: CheckOutcome::default(),
        };
        let mut buf = Vec::new();
        assert_eq!(write_error_table(&summary, &mut buf).unwrap(), 0);
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("result\n"));
        assert!(text.contains("All checks passed"));
    }

    #[test]
    fn test_adjustment_log_lists_rules() {
        let report = SolverReport {
            years: BTreeSet::from([2024, 2025]),
            rows_in_scope: 3,
            adjustments: Vec::new(),
            untouched_unknown: vec!["Left unclassifiable account '9999'".to_string()],
            post_check: None,
        };
        let context = AdjustmentContext {
            source: PathBuf::from("balance.csv"),
            backup: Some(PathBuf::from("balance_backup.csv")),
        };
        let log = render_adjustment_log(&report, &context);
        assert!(log.contains("years: 2024, 2025"));
        assert!(log.contains("liability: positive net to credit (贷)"));
        assert!(log.contains("9999"));
        assert!(log.contains("balance_backup.csv"));
    }
}

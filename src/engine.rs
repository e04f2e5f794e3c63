use crate::continuity::{ContinuityMismatch, YearContinuityChecker};
use crate::hierarchy::{HierarchyMismatch, HierarchyReconciler};
use crate::identity::{IdentityValidator, IdentityViolation};
use crate::schema::{BalanceTable, VoucherTable};
use crate::voucher::{VoucherMismatch, VoucherReconciler};
use chrono::{Local, NaiveDateTime};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Pass/fail/skip counters plus the collected findings of one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome<F> {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub findings: Vec<F>,
    /// Rows that were neither passed nor failed, with the reason.
    pub warnings: Vec<String>,
}

impl<F> Default for CheckOutcome<F> {
    fn default() -> Self {
        Self {
            passed: 0,
            failed: 0,
            skipped: 0,
            findings: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl<F> CheckOutcome<F> {
    pub fn pass(&mut self) {
        self.passed += 1;
    }

    pub fn fail(&mut self, finding: F) {
        self.failed += 1;
        self.findings.push(finding);
    }

    pub fn skip(&mut self, reason: String) {
        self.skipped += 1;
        self.warnings.push(reason);
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Anything a check can report as a single human-readable line.
pub trait Finding {
    fn message(&self) -> String;
}

pub(crate) fn log_outcome<F: Finding>(check: &str, outcome: &CheckOutcome<F>, limit: usize) {
    info!(
        "{} finished: {} passed, {} failed, {} skipped",
        check, outcome.passed, outcome.failed, outcome.skipped
    );
    for finding in outcome.findings.iter().take(limit) {
        warn!("  - {}", finding.message());
    }
    if outcome.findings.len() > limit {
        warn!("  - ... and {} more", outcome.findings.len() - limit);
    }
}

/// Results of every read-only check over one pair of tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSummary {
    pub generated_at: NaiveDateTime,
    pub identity: CheckOutcome<IdentityViolation>,
    pub continuity: CheckOutcome<ContinuityMismatch>,
    pub hierarchy: CheckOutcome<HierarchyMismatch>,
    pub voucher: CheckOutcome<VoucherMismatch>,
}

impl AuditSummary {
    pub fn total_passed(&self) -> usize {
        self.identity.passed + self.continuity.passed + self.hierarchy.passed + self.voucher.passed
    }

    pub fn total_failed(&self) -> usize {
        self.identity.failed + self.continuity.failed + self.hierarchy.failed + self.voucher.failed
    }

    pub fn total_skipped(&self) -> usize {
        self.identity.skipped
            + self.continuity.skipped
            + self.hierarchy.skipped
            + self.voucher.skipped
    }

    pub fn is_clean(&self) -> bool {
        self.total_failed() == 0
    }
}

/// Runs the identity, continuity, hierarchy and voucher checks in sequence.
pub struct AuditEngine {
    log_limit: usize,
}

impl Default for AuditEngine {
    fn default() -> Self {
        Self::new(10)
    }
}

impl AuditEngine {
    pub fn new(log_limit: usize) -> Self {
        Self { log_limit }
    }

    pub fn run(&self, balances: &BalanceTable, vouchers: &VoucherTable) -> AuditSummary {
        info!(
            "Running all checks over {} balance rows and {} voucher lines",
            balances.len(),
            vouchers.len()
        );

        let identity = IdentityValidator::new().validate(&balances.records);
        log_outcome("Accounting identity", &identity, self.log_limit);

        let continuity = YearContinuityChecker::new().check(&balances.records);
        log_outcome("Year continuity", &continuity, self.log_limit);

        let hierarchy = HierarchyReconciler::new().reconcile(&balances.records);
        log_outcome("Hierarchy rollup", &hierarchy, self.log_limit);

        let voucher = VoucherReconciler::new().reconcile(&balances.records, &vouchers.records);
        log_outcome("Voucher reconciliation", &voucher, self.log_limit);

        let summary = AuditSummary {
            generated_at: Local::now().naive_local(),
            identity,
            continuity,
            hierarchy,
            voucher,
        };

        info!(
            "All checks finished: {} passed, {} failed, {} skipped",
            summary.total_passed(),
            summary.total_failed(),
            summary.total_skipped()
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Amounts, BalanceRecord, VoucherRecord};
    use chrono::NaiveDate;

    fn row(code: &str, opening: Amounts, cumulative: Amounts, closing: Amounts) -> BalanceRecord {
        BalanceRecord {
            company: "A".to_string(),
            period: "2024".to_string(),
            account_code: code.to_string(),
            account_code_path: format!("/{}/", code.replace('.', "/")),
            account_name: code.to_string(),
            account_name_path: String::new(),
            is_dimension_row: false,
            dimension_name: None,
            opening,
            cumulative,
            closing,
        }
    }

    #[test]
    fn test_outcome_counters() {
        let mut outcome: CheckOutcome<String> = CheckOutcome::default();
        outcome.pass();
        outcome.fail("bad".to_string());
        outcome.skip("unknown".to_string());
        assert_eq!((outcome.passed, outcome.failed, outcome.skipped), (1, 1, 1));
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(!outcome.is_clean());
    }

    #[test]
    fn test_engine_runs_all_checks() {
        let balances = BalanceTable::new(vec![
            row(
                "1002",
                Amounts::new(100.0, 0.0),
                Amounts::new(50.0, 30.0),
                Amounts::new(120.0, 0.0),
            ),
            row(
                "1002.01",
                Amounts::new(100.0, 0.0),
                Amounts::new(50.0, 30.0),
                Amounts::new(120.0, 0.0),
            ),
        ]);
        let vouchers = VoucherTable::new(vec![VoucherRecord {
            company: "A".to_string(),
            account_code: "1002.01".to_string(),
            account_full_name: "银行存款_工行".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1),
            voucher_word: "记".to_string(),
            voucher_number: "1".to_string(),
            line_number: "1".to_string(),
            summary: "收款".to_string(),
            debit_amount: 50.0,
            credit_amount: 30.0,
            original_amount: 0.0,
            currency: "CNY".to_string(),
            fiscal_year: Some(2024),
            voucher_id: String::new(),
        }]);

        let summary = AuditEngine::default().run(&balances, &vouchers);
        assert!(summary.is_clean(), "{:?}", summary);
        assert_eq!(summary.identity.passed, 2);
        assert_eq!(summary.hierarchy.passed, 3);
        assert_eq!(summary.voucher.passed, 1);
        assert_eq!(summary.total_failed(), 0);
    }
}

use crate::balance::RowNets;
use crate::chart_of_accounts::classify_record_logged;
use crate::engine::{CheckOutcome, Finding};
use crate::schema::{AccountClass, BalanceRecord};
use crate::utils::TOLERANCE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A row where `opening + period != closing` on its normal side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityViolation {
    pub account_code: String,
    pub account_name: String,
    pub dimension_name: Option<String>,
    pub class: AccountClass,
    pub company: String,
    pub period: String,
    pub opening_net: f64,
    pub period_net: f64,
    pub closing_net: f64,
    pub expected_closing: f64,
    /// `closing_net - expected_closing`.
    pub difference: f64,
}

impl Finding for IdentityViolation {
    fn message(&self) -> String {
        let dimension = self
            .dimension_name
            .as_ref()
            .map(|d| format!(" dimension: {}", d))
            .unwrap_or_default();
        format!(
            "Account {} ({}){} [{}] {} {}: opening {:.2} + period {:.2} = {:.2}, but closing is {:.2}, difference {:.2}",
            self.account_code,
            self.account_name,
            dimension,
            self.class,
            self.company,
            self.period,
            self.opening_net,
            self.period_net,
            self.expected_closing,
            self.closing_net,
            self.difference
        )
    }
}

/// Result of checking a single row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowCheck {
    Balanced(RowNets),
    Violation(IdentityViolation),
    /// Classification unknown; carries the debit-side projection for the log.
    Unclassified(RowNets),
}

/// Read-only check of `opening_net + period_net == closing_net` within [`TOLERANCE`].
#[derive(Debug, Clone, Default)]
pub struct IdentityValidator {
    years: Option<BTreeSet<i32>>,
}

impl IdentityValidator {
    pub fn new() -> Self {
        Self { years: None }
    }

    /// Restricts the check to rows whose period falls in one of `years`.
    pub fn with_years(years: BTreeSet<i32>) -> Self {
        Self { years: Some(years) }
    }

    pub fn in_scope(&self, record: &BalanceRecord) -> bool {
        match &self.years {
            None => true,
            Some(years) => record.year().is_some_and(|y| years.contains(&y)),
        }
    }

    pub fn check_row(record: &BalanceRecord) -> RowCheck {
        let class = classify_record_logged(record);
        let nets = RowNets::for_record_as(record, class);

        if !class.is_known() {
            return RowCheck::Unclassified(nets);
        }

        if nets.difference().abs() <= TOLERANCE {
            return RowCheck::Balanced(nets);
        }

        RowCheck::Violation(IdentityViolation {
            account_code: record.effective_code().to_string(),
            account_name: record.account_name.clone(),
            dimension_name: record.dimension().map(str::to_string),
            class,
            company: record.company.clone(),
            period: record.period.clone(),
            opening_net: nets.opening,
            period_net: nets.period,
            closing_net: nets.closing,
            expected_closing: nets.expected_closing(),
            difference: nets.difference(),
        })
    }

    pub fn validate(&self, records: &[BalanceRecord]) -> CheckOutcome<IdentityViolation> {
        let mut outcome = CheckOutcome::default();

        for record in records.iter().filter(|r| self.in_scope(r)) {
            match Self::check_row(record) {
                RowCheck::Balanced(_) => outcome.pass(),
                RowCheck::Violation(v) => outcome.fail(v),
                RowCheck::Unclassified(nets) => outcome.skip(format!(
                    "Skipped unclassifiable account '{}' ({}) {} {}: debit-side projection opening {:.2} + period {:.2} vs closing {:.2}",
                    record.effective_code(),
                    record.account_name,
                    record.company,
                    record.period,
                    nets.opening,
                    nets.period,
                    nets.closing
                )),
            }
        }

        outcome
    }
}

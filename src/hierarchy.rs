//! Parent/child rollup checks within one company and period.
//!
//! Parents are inferred from dot-delimited code prefixes: the longest proper
//! prefix that is itself a row in the same slice is the immediate parent. This
//! can attribute a row to its grandparent when the intermediate level is absent
//! from the extract.

use crate::balance::net;
use crate::chart_of_accounts::{classify_record, normal_side};
use crate::engine::{CheckOutcome, Finding};
use crate::schema::{AccountClass, Amounts, BalanceRecord};
use crate::utils::{code_prefixes, TOLERANCE};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyMismatch {
    pub parent_code: String,
    pub parent_name: String,
    pub class: AccountClass,
    pub company: String,
    pub period: String,
    /// Which stage or raw column disagreed, e.g. `"closing net"` or `"opening debit"`.
    pub field: String,
    pub parent_value: f64,
    pub child_sum: f64,
    /// `parent_value - child_sum`.
    pub difference: f64,
    pub child_count: usize,
}

impl Finding for HierarchyMismatch {
    fn message(&self) -> String {
        format!(
            "Rollup mismatch: account {} ({}) [{}] {} {} {}: parent {:.2} != sum of {} children {:.2}, difference {:.2}",
            self.parent_code,
            self.parent_name,
            self.class,
            self.company,
            self.period,
            self.field,
            self.parent_value,
            self.child_count,
            self.child_sum,
            self.difference
        )
    }
}

/// Children's raw columns summed per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChildTotals {
    pub opening: Amounts,
    pub cumulative: Amounts,
    pub closing: Amounts,
}

impl ChildTotals {
    pub fn of(children: &[&BalanceRecord]) -> Self {
        Self {
            opening: children.iter().map(|c| c.opening).sum(),
            cumulative: children.iter().map(|c| c.cumulative).sum(),
            closing: children.iter().map(|c| c.closing).sum(),
        }
    }
}

/// Maps each parent code to its immediate children within one slice.
/// Rows without a code, and duplicates of a code, never act as parents twice.
pub fn build_parent_map<'a>(slice: &[&'a BalanceRecord]) -> BTreeMap<String, Vec<&'a BalanceRecord>> {
    let present: HashMap<&str, ()> = slice
        .iter()
        .map(|r| r.effective_code())
        .filter(|c| !c.is_empty())
        .map(|c| (c, ()))
        .collect();

    let mut tree: BTreeMap<String, Vec<&'a BalanceRecord>> = BTreeMap::new();

    for row in slice {
        let code = row.effective_code();
        if code.is_empty() {
            continue;
        }

        let parent = code_prefixes(code)
            .into_iter()
            .filter(|p| present.contains_key(p.as_str()))
            .max_by_key(|p| p.len());

        if let Some(parent) = parent {
            tree.entry(parent).or_default().push(*row);
        }
    }

    tree
}

/// Checks that every parent account equals the rollup of its children.
#[derive(Debug, Clone, Default)]
pub struct HierarchyReconciler;

impl HierarchyReconciler {
    pub fn new() -> Self {
        Self
    }

    pub fn reconcile(&self, records: &[BalanceRecord]) -> CheckOutcome<HierarchyMismatch> {
        let mut outcome = CheckOutcome::default();

        let mut slices: BTreeMap<(&str, &str), Vec<&BalanceRecord>> = BTreeMap::new();
        for record in records.iter().filter(|r| !r.is_dimension_row) {
            slices
                .entry((record.company.as_str(), record.period.as_str()))
                .or_default()
                .push(record);
        }

        for ((company, period), slice) in &slices {
            let tree = build_parent_map(slice);
            debug!(
                "{} {}: {} rows, {} parents with children",
                company,
                period,
                slice.len(),
                tree.len()
            );

            for (parent_code, children) in &tree {
                let Some(parent) = slice.iter().find(|r| r.effective_code() == parent_code) else {
                    continue;
                };
                self.check_parent(parent, children, &mut outcome);
            }
        }

        outcome
    }

    pub fn check_parent(
        &self,
        parent: &BalanceRecord,
        children: &[&BalanceRecord],
        outcome: &mut CheckOutcome<HierarchyMismatch>,
    ) {
        let class = classify_record(parent);
        let totals = ChildTotals::of(children);

        let checks: Vec<(&str, f64, f64)> = if class.is_known() {
            // children may carry offsetting debits and credits; only nets are comparable
            let side = normal_side(class);
            vec![
                ("opening net", net(parent.opening, side), net(totals.opening, side)),
                ("period net", net(parent.cumulative, side), net(totals.cumulative, side)),
                ("closing net", net(parent.closing, side), net(totals.closing, side)),
            ]
        } else {
            warn!(
                "Parent '{}' in {} {} is unclassifiable; comparing raw columns",
                parent.effective_code(),
                parent.company,
                parent.period
            );
            vec![
                ("opening debit", parent.opening.debit, totals.opening.debit),
                ("opening credit", parent.opening.credit, totals.opening.credit),
                ("period debit", parent.cumulative.debit, totals.cumulative.debit),
                ("period credit", parent.cumulative.credit, totals.cumulative.credit),
                ("closing debit", parent.closing.debit, totals.closing.debit),
                ("closing credit", parent.closing.credit, totals.closing.credit),
            ]
        };

        for (field, parent_value, child_sum) in checks {
            if (parent_value - child_sum).abs() > TOLERANCE {
                outcome.fail(HierarchyMismatch {
                    parent_code: parent.effective_code().to_string(),
                    parent_name: parent.account_name.clone(),
                    class,
                    company: parent.company.clone(),
                    period: parent.period.clone(),
                    field: field.to_string(),
                    parent_value,
                    child_sum,
                    difference: parent_value - child_sum,
                    child_count: children.len(),
                });
            } else {
                outcome.pass();
            }
        }
    }
}

//! Read-only lookups over a loaded pair of tables.
//!
//! A [`LedgerSnapshot`] is built once and never mutated; every lookup borrows
//! it immutably. Classification
//! and signed nets come from [`crate::chart_of_accounts`] and [`crate::balance`].

use crate::balance::net;
use crate::chart_of_accounts::{classify_code, normal_side};
use crate::config::AuditConfig;
use crate::error::Result;
use crate::ingestion::{load_balance_table, load_voucher_table};
use crate::schema::{AccountClass, Amounts, BalanceRecord, NormalSide, VoucherRecord};
use crate::search::{match_keyword, similarity, MatchTier, FUZZY_THRESHOLD, SYNONYM_GROUPS};
use crate::utils::{normalize_path_scope, parse_date_strict, path_depth, TOLERANCE};
use chrono::{Local, NaiveDate, NaiveDateTime};
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

fn default_limit_100() -> usize {
    100
}

fn default_limit_50() -> usize {
    50
}

fn default_limit_20() -> usize {
    20
}

fn default_true() -> bool {
    true
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.trim().to_lowercase())
}

/// `Some(filter)` only when the filter is present and non-blank.
fn active(filter: &Option<String>) -> Option<&str> {
    filter.as_deref().map(str::trim).filter(|f| !f.is_empty())
}

fn matches_opt(value: &str, filter: &Option<String>) -> bool {
    active(filter).is_none_or(|f| contains_ci(value, f))
}

/// The row belongs to `code` or one of its descendants.
fn under_code(record: &BalanceRecord, code: &str) -> bool {
    let code = code.trim();
    let effective = record.effective_code();
    record.account_code_path.contains(&normalize_path_scope(code))
        || effective == code
        || effective.starts_with(&format!("{}.", code))
}

fn voucher_year(voucher: &VoucherRecord) -> Option<i32> {
    voucher.calendar_year().or(voucher.fiscal_year)
}

fn parse_bound(raw: &Option<String>) -> Result<Option<NaiveDate>> {
    active(raw).map(parse_date_strict).transpose()
}

fn within_dates(date: Option<NaiveDate>, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    if start.is_none() && end.is_none() {
        return true;
    }
    let Some(date) = date else {
        return false;
    };
    start.is_none_or(|s| date >= s) && end.is_none_or(|e| date <= e)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct BalanceQuery {
    #[serde(default)]
    #[schemars(description = "Company name (substring match)")]
    pub company: Option<String>,

    #[serde(default)]
    #[schemars(description = "Fiscal period label (substring match)")]
    pub period: Option<String>,

    #[serde(default, alias = "subject_code")]
    #[schemars(description = "Account code (substring match)")]
    pub account_code: Option<String>,

    #[serde(default, alias = "subject_path")]
    #[schemars(description = "Code path scope, e.g. '1002' or '/1002/' for the account and all its children")]
    pub code_path: Option<String>,

    #[serde(default)]
    #[schemars(description = "Dimension name (counterparty, department, project); implies dimension rows")]
    pub dimension_name: Option<String>,

    #[serde(default, alias = "subject_name_path")]
    #[schemars(description = "Account name path (substring match), e.g. '/银行存款/'")]
    pub name_path: Option<String>,

    #[serde(default)]
    #[schemars(description = "Fiscal year")]
    pub year: Option<i32>,

    #[serde(default = "default_limit_100")]
    #[schemars(description = "Maximum rows returned (default 100)")]
    pub limit: usize,

    #[serde(default)]
    #[schemars(description = "Include dimension breakdown rows (default false)")]
    pub include_dimensions: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceQueryResult {
    pub total_matches: usize,
    pub truncated: bool,
    pub rows: Vec<BalanceRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct VoucherQuery {
    #[serde(default)]
    #[schemars(description = "Company name (substring match)")]
    pub company: Option<String>,

    #[serde(default, alias = "subject_code")]
    #[schemars(description = "Account code (substring match)")]
    pub account_code: Option<String>,

    #[serde(default, alias = "voucher_no")]
    #[schemars(description = "Voucher number (substring match)")]
    pub voucher_number: Option<String>,

    #[serde(default)]
    #[schemars(description = "First date, inclusive (YYYY-MM-DD)")]
    pub date_start: Option<String>,

    #[serde(default)]
    #[schemars(description = "Last date, inclusive (YYYY-MM-DD)")]
    pub date_end: Option<String>,

    #[serde(default)]
    #[schemars(description = "Minimum line amount on either side")]
    pub amount_min: Option<f64>,

    #[serde(default)]
    #[schemars(description = "Maximum line amount on either side")]
    pub amount_max: Option<f64>,

    #[serde(default = "default_limit_100")]
    #[schemars(description = "Maximum lines returned (default 100)")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoucherQueryResult {
    pub total_matches: usize,
    pub truncated: bool,
    pub lines: Vec<VoucherRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct HierarchyQuery {
    #[serde(alias = "subject_code")]
    #[schemars(description = "Parent account code, e.g. '1002' for bank deposits and all sub-accounts")]
    pub account_code: String,

    #[serde(default)]
    #[schemars(description = "Company name (substring match)")]
    pub company: Option<String>,

    #[serde(default)]
    #[schemars(description = "Fiscal year")]
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HierarchyNode {
    pub depth: usize,
    pub record: BalanceRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct HierarchyView {
    pub account_code: String,
    pub class: AccountClass,
    pub nodes: Vec<HierarchyNode>,
    pub closing_total: Amounts,
    pub period_total: Amounts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    Balance,
    Voucher,
    #[default]
    Both,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SummaryQuery {
    #[serde(default)]
    #[schemars(description = "Company name (substring match)")]
    pub company: Option<String>,

    #[serde(default)]
    #[schemars(description = "Fiscal year")]
    pub year: Option<i32>,

    #[serde(default, alias = "summary_type")]
    #[schemars(description = "Which table to summarize: balance, voucher or both (default)")]
    pub kind: SummaryKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceSummary {
    pub records: usize,
    pub companies: usize,
    pub period_range: Option<(String, String)>,
    pub year_range: Option<(i32, i32)>,
    pub per_company: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoucherSummary {
    pub lines: usize,
    pub companies: usize,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub distinct_vouchers: usize,
    pub total: Amounts,
    pub per_company: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialSummary {
    pub balance: Option<BalanceSummary>,
    pub voucher: Option<VoucherSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ConsistencyQuery {
    #[serde(alias = "subject_code")]
    #[schemars(description = "Account code")]
    pub account_code: String,

    #[serde(default)]
    #[schemars(description = "Company name (substring match)")]
    pub company: Option<String>,

    #[serde(default)]
    #[schemars(description = "Fiscal year")]
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceSide {
    pub rows: usize,
    pub period: Amounts,
    pub closing: Amounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoucherSide {
    pub lines: usize,
    pub total: Amounts,
    /// Debit minus credit, or the reverse for credit-normal accounts.
    pub net: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub account_code: String,
    pub class: AccountClass,
    pub passed: bool,
    pub balance: Option<BalanceSide>,
    pub voucher: Option<VoucherSide>,
    pub differences: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TransactionSearch {
    #[schemars(description = "Keyword searched in the voucher summary (摘要); synonyms and near matches are tried when nothing matches exactly")]
    pub keyword: String,

    #[serde(default)]
    #[schemars(description = "Company name (substring match)")]
    pub company: Option<String>,

    #[serde(default)]
    #[schemars(description = "First date, inclusive (YYYY-MM-DD)")]
    pub date_start: Option<String>,

    #[serde(default)]
    #[schemars(description = "Last date, inclusive (YYYY-MM-DD)")]
    pub date_end: Option<String>,

    #[serde(default = "default_limit_50")]
    #[schemars(description = "Maximum lines returned (default 50)")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionSearchResult {
    pub keyword: String,
    pub tier: Option<MatchTier>,
    pub total_matches: usize,
    pub truncated: bool,
    pub lines: Vec<VoucherRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AccountSearch {
    #[serde(alias = "subject_name")]
    #[schemars(description = "Account name, e.g. 其他应付款, 银行存款, 应收账款")]
    pub name: String,

    #[serde(default)]
    #[schemars(description = "Company name (substring match)")]
    pub company: Option<String>,

    #[serde(default = "default_true", alias = "fuzzy_match")]
    #[schemars(description = "Try relaxed matching when nothing else matches (default true)")]
    pub fuzzy: bool,

    #[serde(default = "default_limit_20")]
    #[schemars(description = "Maximum accounts returned (default 20)")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountMatch {
    pub account_code: String,
    pub account_name: String,
    pub match_kind: String,
    pub code_path: String,
    pub closing_total: Amounts,
    /// Up to three companies carrying the account.
    pub companies: Vec<String>,
    pub other_companies: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSearchResult {
    pub name: String,
    pub matches: Vec<AccountMatch>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DimensionSort {
    /// Largest absolute closing balance first.
    #[default]
    #[serde(alias = "ending_balance")]
    ClosingBalance,
    #[serde(alias = "total_debit")]
    PeriodDebit,
    #[serde(alias = "total_credit")]
    PeriodCredit,
    DimensionName,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DimensionQuery {
    #[serde(alias = "subject_code")]
    #[schemars(description = "Account code, e.g. 2202 (payables) or 1122 (receivables)")]
    pub account_code: String,

    #[serde(default)]
    #[schemars(description = "Company name (substring match)")]
    pub company: Option<String>,

    #[serde(default)]
    #[schemars(description = "Fiscal year")]
    pub year: Option<i32>,

    #[serde(default, alias = "dimension_type")]
    #[schemars(description = "Dimension name filter, e.g. a supplier or department (substring match)")]
    pub dimension_filter: Option<String>,

    #[serde(default)]
    #[schemars(description = "closing_balance (default), period_debit, period_credit or dimension_name")]
    pub sort_by: DimensionSort,

    #[serde(default = "default_limit_100")]
    #[schemars(description = "Maximum dimensions returned (default 100)")]
    pub limit: usize,

    #[serde(default, alias = "show_zero_balance")]
    #[schemars(description = "Include dimensions whose closing balance is zero (default false)")]
    pub show_zero: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DimensionSummary {
    pub dimension_name: String,
    pub period: Amounts,
    pub closing: Amounts,
    /// Closing balance net on the account's normal side.
    pub closing_net: f64,
    /// Side the closing balance sits on.
    pub balance_side: NormalSide,
    pub record_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DimensionDetails {
    pub account_code: String,
    pub class: AccountClass,
    pub total_dimensions: usize,
    pub truncated: bool,
    pub dimensions: Vec<DimensionSummary>,
}

/// Immutable view of both tables for request handlers.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    balances: Vec<BalanceRecord>,
    vouchers: Vec<VoucherRecord>,
    loaded_at: NaiveDateTime,
}

impl LedgerSnapshot {
    pub fn new(balances: Vec<BalanceRecord>, vouchers: Vec<VoucherRecord>) -> Self {
        Self {
            balances,
            vouchers,
            loaded_at: Local::now().naive_local(),
        }
    }

    pub fn load(config: &AuditConfig) -> Result<Self> {
        let balances = load_balance_table(config.balance_path())?;
        let vouchers = load_voucher_table(config.voucher_path())?;
        info!(
            "Snapshot ready: {} balance rows, {} voucher lines",
            balances.len(),
            vouchers.len()
        );
        Ok(Self::new(balances.records, vouchers.records))
    }

    pub fn balance_records(&self) -> &[BalanceRecord] {
        &self.balances
    }

    pub fn voucher_records(&self) -> &[VoucherRecord] {
        &self.vouchers
    }

    pub fn loaded_at(&self) -> NaiveDateTime {
        self.loaded_at
    }

    pub fn balances(&self, query: &BalanceQuery) -> BalanceQueryResult {
        let scope = active(&query.code_path).map(normalize_path_scope);
        let dimension_filter = active(&query.dimension_name);
        let with_dimensions = query.include_dimensions || dimension_filter.is_some();

        let matched: Vec<&BalanceRecord> = self
            .balances
            .iter()
            .filter(|r| with_dimensions || !r.is_dimension_row)
            .filter(|r| matches_opt(&r.company, &query.company))
            .filter(|r| matches_opt(&r.period, &query.period))
            .filter(|r| matches_opt(r.effective_code(), &query.account_code))
            .filter(|r| matches_opt(&r.account_name_path, &query.name_path))
            .filter(|r| {
                dimension_filter
                    .is_none_or(|f| r.dimension().is_some_and(|d| contains_ci(d, f)))
            })
            .filter(|r| {
                scope
                    .as_deref()
                    .is_none_or(|s| r.account_code_path.to_lowercase().contains(&s.to_lowercase()))
            })
            .filter(|r| query.year.is_none_or(|y| r.year() == Some(y)))
            .collect();

        BalanceQueryResult {
            total_matches: matched.len(),
            truncated: matched.len() > query.limit,
            rows: matched.into_iter().take(query.limit).cloned().collect(),
        }
    }

    pub fn vouchers(&self, query: &VoucherQuery) -> Result<VoucherQueryResult> {
        let start = parse_bound(&query.date_start)?;
        let end = parse_bound(&query.date_end)?;

        let matched: Vec<&VoucherRecord> = self
            .vouchers
            .iter()
            .filter(|v| matches_opt(&v.company, &query.company))
            .filter(|v| matches_opt(&v.account_code, &query.account_code))
            .filter(|v| matches_opt(&v.voucher_number, &query.voucher_number))
            .filter(|v| within_dates(v.date, start, end))
            .filter(|v| {
                let amount = v.debit_amount.max(v.credit_amount);
                query.amount_min.is_none_or(|m| amount >= m)
                    && query.amount_max.is_none_or(|m| amount <= m)
            })
            .collect();

        Ok(VoucherQueryResult {
            total_matches: matched.len(),
            truncated: matched.len() > query.limit,
            lines: matched.into_iter().take(query.limit).cloned().collect(),
        })
    }

    pub fn hierarchy(&self, query: &HierarchyQuery) -> HierarchyView {
        let code = query.account_code.trim();

        let mut rows: Vec<&BalanceRecord> = self
            .balances
            .iter()
            .filter(|r| under_code(r, code))
            .filter(|r| matches_opt(&r.company, &query.company))
            .filter(|r| query.year.is_none_or(|y| r.year() == Some(y)))
            .collect();
        rows.sort_by(|a, b| a.account_code_path.cmp(&b.account_code_path));

        HierarchyView {
            account_code: code.to_string(),
            class: classify_code(code),
            closing_total: rows.iter().map(|r| r.closing).sum(),
            period_total: rows.iter().map(|r| r.cumulative).sum(),
            nodes: rows
                .into_iter()
                .map(|r| HierarchyNode {
                    depth: path_depth(&r.account_code_path),
                    record: r.clone(),
                })
                .collect(),
        }
    }

    pub fn summary(&self, query: &SummaryQuery) -> FinancialSummary {
        let balance = matches!(query.kind, SummaryKind::Balance | SummaryKind::Both).then(|| {
            let rows: Vec<&BalanceRecord> = self
                .balances
                .iter()
                .filter(|r| matches_opt(&r.company, &query.company))
                .filter(|r| query.year.is_none_or(|y| r.year() == Some(y)))
                .collect();

            let mut per_company: BTreeMap<String, usize> = BTreeMap::new();
            for r in &rows {
                *per_company.entry(r.company.clone()).or_default() += 1;
            }

            let periods: BTreeSet<&str> = rows.iter().map(|r| r.period.as_str()).collect();
            let years: BTreeSet<i32> = rows.iter().filter_map(|r| r.year()).collect();

            BalanceSummary {
                records: rows.len(),
                companies: per_company.len(),
                period_range: periods
                    .first()
                    .zip(periods.last())
                    .map(|(a, b)| (a.to_string(), b.to_string())),
                year_range: years.first().copied().zip(years.last().copied()),
                per_company,
            }
        });

        let voucher = matches!(query.kind, SummaryKind::Voucher | SummaryKind::Both).then(|| {
            let lines: Vec<&VoucherRecord> = self
                .vouchers
                .iter()
                .filter(|v| matches_opt(&v.company, &query.company))
                .filter(|v| query.year.is_none_or(|y| voucher_year(v) == Some(y)))
                .collect();

            let mut per_company: BTreeMap<String, usize> = BTreeMap::new();
            for v in &lines {
                *per_company.entry(v.company.clone()).or_default() += 1;
            }

            let dates: BTreeSet<NaiveDate> = lines.iter().filter_map(|v| v.date).collect();
            let distinct: HashSet<String> = lines.iter().map(|v| v.voucher_key()).collect();

            VoucherSummary {
                lines: lines.len(),
                companies: per_company.len(),
                date_range: dates.first().copied().zip(dates.last().copied()),
                distinct_vouchers: distinct.len(),
                total: lines.iter().map(|v| v.amounts()).sum(),
                per_company,
            }
        });

        FinancialSummary { balance, voucher }
    }

    /// Compares one account's year-to-date movement in the balance table with
    /// the sum of its voucher lines.
    pub fn consistency(&self, query: &ConsistencyQuery) -> ConsistencyReport {
        let code = query.account_code.trim();
        let class = classify_code(code);

        let mut report = ConsistencyReport {
            account_code: code.to_string(),
            class,
            passed: false,
            balance: None,
            voucher: None,
            differences: Vec::new(),
            warnings: Vec::new(),
        };

        let rows: Vec<&BalanceRecord> = self
            .balances
            .iter()
            .filter(|r| !r.is_dimension_row && r.effective_code() == code)
            .filter(|r| matches_opt(&r.company, &query.company))
            .filter(|r| query.year.is_none_or(|y| r.year() == Some(y)))
            .collect();

        let lines: Vec<&VoucherRecord> = self
            .vouchers
            .iter()
            .filter(|v| v.account_code.trim() == code)
            .filter(|v| matches_opt(&v.company, &query.company))
            .filter(|v| query.year.is_none_or(|y| voucher_year(v) == Some(y)))
            .collect();

        match (rows.is_empty(), lines.is_empty()) {
            (true, true) => {
                report
                    .warnings
                    .push(format!("Account {} has no balance rows and no voucher lines", code));
                return report;
            }
            (true, false) => {
                report.warnings.push(format!("Account {} has no balance rows", code));
                return report;
            }
            (false, true) => {
                report.warnings.push(format!("Account {} has no voucher lines", code));
                return report;
            }
            (false, false) => {}
        }

        let balance = BalanceSide {
            rows: rows.len(),
            period: rows.iter().map(|r| r.cumulative).sum(),
            closing: rows.iter().map(|r| r.closing).sum(),
        };
        let total: Amounts = lines.iter().map(|v| v.amounts()).sum();
        let voucher = VoucherSide {
            lines: lines.len(),
            total,
            net: net(total, normal_side(class)),
        };

        if (balance.period.debit - voucher.total.debit).abs() > TOLERANCE {
            report.differences.push(format!(
                "Debit mismatch: balance table {:.2} vs vouchers {:.2}",
                balance.period.debit, voucher.total.debit
            ));
        }
        if (balance.period.credit - voucher.total.credit).abs() > TOLERANCE {
            report.differences.push(format!(
                "Credit mismatch: balance table {:.2} vs vouchers {:.2}",
                balance.period.credit, voucher.total.credit
            ));
        }

        report.passed = report.differences.is_empty();
        report.balance = Some(balance);
        report.voucher = Some(voucher);
        report
    }

    pub fn search_transactions(&self, query: &TransactionSearch) -> Result<TransactionSearchResult> {
        let start = parse_bound(&query.date_start)?;
        let end = parse_bound(&query.date_end)?;

        let summaries: Vec<&str> = self.vouchers.iter().map(|v| v.summary.as_str()).collect();
        let (tier, hits) = match match_keyword(&query.keyword, &summaries) {
            Some((tier, hits)) => (Some(tier), hits),
            None => (None, Vec::new()),
        };

        let matched: Vec<&VoucherRecord> = hits
            .into_iter()
            .map(|i| &self.vouchers[i])
            .filter(|v| matches_opt(&v.company, &query.company))
            .filter(|v| within_dates(v.date, start, end))
            .collect();

        Ok(TransactionSearchResult {
            keyword: query.keyword.clone(),
            tier,
            total_matches: matched.len(),
            truncated: matched.len() > query.limit,
            lines: matched.into_iter().take(query.limit).cloned().collect(),
        })
    }

    pub fn find_accounts(&self, query: &AccountSearch) -> AccountSearchResult {
        let name = query.name.trim();
        let candidates: Vec<&BalanceRecord> = self
            .balances
            .iter()
            .filter(|r| !r.is_dimension_row && !r.effective_code().is_empty())
            .filter(|r| matches_opt(&r.company, &query.company))
            .collect();

        let mut strategies: Vec<(String, Vec<&BalanceRecord>)> = Vec::new();
        if !name.is_empty() {
            let by_name: Vec<&BalanceRecord> = candidates
                .iter()
                .copied()
                .filter(|r| contains_ci(&r.account_name, name))
                .collect();
            strategies.push(("name".to_string(), by_name));

            let by_path: Vec<&BalanceRecord> = candidates
                .iter()
                .copied()
                .filter(|r| contains_ci(&r.account_name_path, name))
                .collect();
            strategies.push(("full_name".to_string(), by_path));

            for group in SYNONYM_GROUPS {
                if !group.iter().any(|syn| name == *syn || name.contains(syn)) {
                    continue;
                }
                for syn in group.iter() {
                    let hits: Vec<&BalanceRecord> = candidates
                        .iter()
                        .copied()
                        .filter(|r| contains_ci(&r.account_name, syn))
                        .collect();
                    strategies.push((format!("synonym({})", syn), hits));
                }
            }
        }
        strategies.retain(|(_, hits)| !hits.is_empty());

        if query.fuzzy && strategies.is_empty() && !name.is_empty() {
            let relaxed = name
                .replace("其他", "")
                .replace("应付", "")
                .replace("应收", "")
                .replace('款', "");
            let relaxed = relaxed.trim();
            let hits: Vec<&BalanceRecord> = candidates
                .iter()
                .copied()
                .filter(|r| {
                    (!relaxed.is_empty() && contains_ci(&r.account_name, relaxed))
                        || similarity(name, &r.account_name) >= FUZZY_THRESHOLD
                })
                .collect();
            if !hits.is_empty() {
                strategies.push(("fuzzy".to_string(), hits));
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut matches = Vec::new();
        let mut truncated = false;

        'outer: for (kind, hits) in &strategies {
            for record in hits {
                let code = record.effective_code();
                if !seen.insert(code) {
                    continue;
                }
                if matches.len() >= query.limit {
                    truncated = true;
                    break 'outer;
                }

                let same: Vec<&&BalanceRecord> =
                    hits.iter().filter(|r| r.effective_code() == code).collect();
                let companies: BTreeSet<&str> = same.iter().map(|r| r.company.as_str()).collect();

                matches.push(AccountMatch {
                    account_code: code.to_string(),
                    account_name: record.account_name.clone(),
                    match_kind: kind.clone(),
                    code_path: record.account_code_path.clone(),
                    closing_total: same.iter().map(|r| r.closing).sum(),
                    companies: companies.iter().take(3).map(|c| c.to_string()).collect(),
                    other_companies: companies.len().saturating_sub(3),
                });
            }
        }

        AccountSearchResult {
            name: name.to_string(),
            matches,
            truncated,
        }
    }

    pub fn dimension_details(&self, query: &DimensionQuery) -> DimensionDetails {
        let code = query.account_code.trim();
        let class = classify_code(code);
        let side = normal_side(class);

        let mut groups: BTreeMap<&str, Vec<&BalanceRecord>> = BTreeMap::new();
        for record in self
            .balances
            .iter()
            .filter(|r| under_code(r, code))
            .filter(|r| matches_opt(&r.company, &query.company))
            .filter(|r| query.year.is_none_or(|y| r.year() == Some(y)))
        {
            let Some(dimension) = record.dimension() else {
                continue;
            };
            if active(&query.dimension_filter).is_some_and(|f| !contains_ci(dimension, f)) {
                continue;
            }
            groups.entry(dimension).or_default().push(record);
        }

        let mut dimensions: Vec<DimensionSummary> = groups
            .into_iter()
            .map(|(name, rows)| {
                let closing: Amounts = rows.iter().map(|r| r.closing).sum();
                let closing_net = net(closing, side);
                DimensionSummary {
                    dimension_name: name.to_string(),
                    period: rows.iter().map(|r| r.cumulative).sum(),
                    closing,
                    closing_net,
                    balance_side: if closing_net >= 0.0 { side } else { side.opposite() },
                    record_count: rows.len(),
                }
            })
            .filter(|d| query.show_zero || d.closing_net.abs() >= TOLERANCE)
            .collect();

        match query.sort_by {
            DimensionSort::ClosingBalance => {
                dimensions.sort_by(|a, b| b.closing_net.abs().total_cmp(&a.closing_net.abs()))
            }
            DimensionSort::PeriodDebit => {
                dimensions.sort_by(|a, b| b.period.debit.total_cmp(&a.period.debit))
            }
            DimensionSort::PeriodCredit => {
                dimensions.sort_by(|a, b| b.period.credit.total_cmp(&a.period.credit))
            }
            DimensionSort::DimensionName => {
                dimensions.sort_by(|a, b| a.dimension_name.cmp(&b.dimension_name))
            }
        }

        let total = dimensions.len();
        dimensions.truncate(query.limit);

        DimensionDetails {
            account_code: code.to_string(),
            class,
            total_dimensions: total,
            truncated: total > query.limit,
            dimensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(
        company: &str,
        period: &str,
        code: &str,
        name: &str,
        dimension: Option<&str>,
        cumulative: Amounts,
        closing: Amounts,
    ) -> BalanceRecord {
        let path = {
            let parts: Vec<&str> = code.split('.').collect();
            let nodes: Vec<String> = (1..=parts.len()).map(|i| parts[..i].join(".")).collect();
            format!("/{}/", nodes.join("/"))
        };
        BalanceRecord {
            company: company.to_string(),
            period: period.to_string(),
            account_code: code.to_string(),
            account_code_path: path,
            account_name: name.to_string(),
            account_name_path: format!("/{}/", name),
            is_dimension_row: dimension.is_some(),
            dimension_name: dimension.map(str::to_string),
            opening: Amounts::default(),
            cumulative,
            closing,
        }
    }

    fn voucher(company: &str, code: &str, date: &str, summary: &str, debit: f64, credit: f64) -> VoucherRecord {
        VoucherRecord {
            company: company.to_string(),
            account_code: code.to_string(),
            account_full_name: code.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
            voucher_word: "记".to_string(),
            voucher_number: summary.len().to_string(),
            line_number: "1".to_string(),
            summary: summary.to_string(),
            debit_amount: debit,
            credit_amount: credit,
            original_amount: 0.0,
            currency: "CNY".to_string(),
            fiscal_year: None,
            voucher_id: format!("{}-{}-{}", company, date, summary),
        }
    }

    fn snapshot() -> LedgerSnapshot {
        LedgerSnapshot::new(
            vec![
                balance("甲公司", "2024", "1002", "银行存款", None, Amounts::new(900.0, 400.0), Amounts::new(1500.0, 0.0)),
                balance("甲公司", "2024", "1002.01", "工商银行", None, Amounts::new(900.0, 400.0), Amounts::new(1500.0, 0.0)),
                balance("甲公司", "2024", "2202", "应付账款", None, Amounts::new(100.0, 600.0), Amounts::new(0.0, 500.0)),
                balance("甲公司", "2024", "2202", "应付账款", Some("供应商A"), Amounts::new(100.0, 400.0), Amounts::new(0.0, 300.0)),
                balance("甲公司", "2024", "2202", "应付账款", Some("供应商B"), Amounts::new(0.0, 200.0), Amounts::new(0.0, 200.0)),
                balance("甲公司", "2024", "2202", "应付账款", Some("供应商C"), Amounts::default(), Amounts::default()),
                balance("乙公司", "2025", "6602", "管理费用", None, Amounts::new(300.0, 0.0), Amounts::new(300.0, 0.0)),
            ],
            vec![
                voucher("甲公司", "1002.01", "2024-02-01", "收到货款", 900.0, 0.0),
                voucher("甲公司", "1002.01", "2024-03-01", "支付行政费", 0.0, 400.0),
                voucher("乙公司", "6602", "2025-01-15", "报销管理费用", 300.0, 0.0),
            ],
        )
    }

    #[test]
    fn test_balances_exclude_dimensions_by_default() {
        let snap = snapshot();
        let query = BalanceQuery {
            account_code: Some("2202".to_string()),
            limit: 100,
            ..Default::default()
        };
        assert_eq!(snap.balances(&query).total_matches, 1);

        let query = BalanceQuery {
            include_dimensions: true,
            ..query
        };
        assert_eq!(snap.balances(&query).total_matches, 4);

        let query = BalanceQuery {
            dimension_name: Some("供应商a".to_string()),
            limit: 100,
            ..Default::default()
        };
        let result = snap.balances(&query);
        assert_eq!(result.total_matches, 1);
        assert_eq!(result.rows[0].dimension(), Some("供应商A"));
    }

    #[test]
    fn test_balances_path_scope_and_limit() {
        let snap = snapshot();
        let query = BalanceQuery {
            code_path: Some("1002".to_string()),
            limit: 1,
            ..Default::default()
        };
        let result = snap.balances(&query);
        assert_eq!(result.total_matches, 2);
        assert!(result.truncated);
        assert_eq!(result.rows.len(), 1);
    }

    #[test]
    fn test_vouchers_date_and_amount_filters() {
        let snap = snapshot();
        let query = VoucherQuery {
            date_start: Some("2024-02-15".to_string()),
            date_end: Some("2024-12-31".to_string()),
            limit: 100,
            ..Default::default()
        };
        let result = snap.vouchers(&query).unwrap();
        assert_eq!(result.total_matches, 1);
        assert_eq!(result.lines[0].summary, "支付行政费");

        let query = VoucherQuery {
            amount_min: Some(500.0),
            limit: 100,
            ..Default::default()
        };
        assert_eq!(snap.vouchers(&query).unwrap().total_matches, 1);

        let bad = VoucherQuery {
            date_start: Some("01/02/2024".to_string()),
            ..Default::default()
        };
        assert!(snap.vouchers(&bad).is_err());
    }

    #[test]
    fn test_hierarchy_view() {
        let view = snapshot().hierarchy(&HierarchyQuery {
            account_code: "1002".to_string(),
            ..Default::default()
        });
        assert_eq!(view.class, AccountClass::Asset);
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.nodes[0].depth, 0);
        assert_eq!(view.nodes[1].depth, 1);
        assert!((view.closing_total.debit - 3000.0).abs() < 0.01);
    }

    #[test]
    fn test_summary() {
        let summary = snapshot().summary(&SummaryQuery {
            company: Some("甲".to_string()),
            ..Default::default()
        });
        let balance = summary.balance.unwrap();
        assert_eq!(balance.records, 6);
        assert_eq!(balance.companies, 1);
        assert_eq!(balance.year_range, Some((2024, 2024)));

        let voucher = summary.voucher.unwrap();
        assert_eq!(voucher.lines, 2);
        assert_eq!(voucher.distinct_vouchers, 2);
        assert!((voucher.total.debit - 900.0).abs() < 0.01);
    }

    #[test]
    fn test_consistency() {
        let snap = snapshot();
        let report = snap.consistency(&ConsistencyQuery {
            account_code: "1002.01".to_string(),
            company: None,
            year: Some(2024),
        });
        assert!(report.passed, "{:?}", report.differences);
        assert!((report.voucher.unwrap().net - 500.0).abs() < 0.01);

        let report = snap.consistency(&ConsistencyQuery {
            account_code: "1002".to_string(),
            ..Default::default()
        });
        assert!(!report.passed);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_search_transactions() {
        let snap = snapshot();
        let result = snap
            .search_transactions(&TransactionSearch {
                keyword: "管理费".to_string(),
                limit: 50,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result.tier, Some(MatchTier::Exact));
        assert_eq!(result.total_matches, 1);

        let result = snap
            .search_transactions(&TransactionSearch {
                keyword: "行政费用".to_string(),
                limit: 50,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result.tier, Some(MatchTier::Synonym));
        assert_eq!(result.total_matches, 2);
    }

    #[test]
    fn test_find_accounts_dedups_by_code() {
        let result = snapshot().find_accounts(&AccountSearch {
            name: "银行".to_string(),
            company: None,
            fuzzy: true,
            limit: 20,
        });
        let codes: Vec<&str> = result.matches.iter().map(|m| m.account_code.as_str()).collect();
        assert_eq!(codes, vec!["1002", "1002.01"]);
        assert_eq!(result.matches[0].match_kind, "name");
        assert_eq!(result.matches[0].companies, vec!["甲公司".to_string()]);
    }

    #[test]
    fn test_dimension_details() {
        let snap = snapshot();
        let details = snap.dimension_details(&DimensionQuery {
            account_code: "2202".to_string(),
            limit: 100,
            ..Default::default()
        });
        assert_eq!(details.class, AccountClass::Liability);
        assert_eq!(details.total_dimensions, 2);
        assert_eq!(details.dimensions[0].dimension_name, "供应商A");
        assert!((details.dimensions[0].closing_net - 300.0).abs() < 0.01);
        assert_eq!(details.dimensions[0].balance_side, NormalSide::Credit);

        let details = snap.dimension_details(&DimensionQuery {
            account_code: "2202".to_string(),
            show_zero: true,
            sort_by: DimensionSort::DimensionName,
            limit: 100,
            ..Default::default()
        });
        let names: Vec<&str> = details.dimensions.iter().map(|d| d.dimension_name.as_str()).collect();
        assert_eq!(names, vec!["供应商A", "供应商B", "供应商C"]);
    }

    #[test]
    fn test_query_arguments_accept_legacy_names() {
        let query: DimensionQuery = serde_json::from_str(
            r#"{"subject_code": "2202", "dimension_type": "供应商", "sort_by": "ending_balance", "show_zero_balance": true}"#,
        )
        .unwrap();
        assert_eq!(query.account_code, "2202");
        assert_eq!(query.sort_by, DimensionSort::ClosingBalance);
        assert!(query.show_zero);
        assert_eq!(query.limit, 100);
    }
}

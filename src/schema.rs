use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ingestion::SourceLayout;
use crate::utils::{extract_year, last_path_segment};

/// Account classification under the Chinese GAAP first-digit convention.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccountClass {
    #[schemars(description = "Codes starting with 1: cash, receivables, inventory, fixed assets (debit balance)")]
    Asset,

    #[schemars(description = "Codes starting with 2: payables, loans, taxes payable (credit balance)")]
    Liability,

    #[schemars(description = "Codes starting with 3: paid-in capital, reserves, retained earnings (credit balance)")]
    Equity,

    #[schemars(description = "Codes starting with 4: revenue and other income (credit balance)")]
    Income,

    #[schemars(description = "Codes starting with 5 or 6: cost and expense accounts (debit balance)")]
    Expense,

    #[schemars(description = "No recognizable leading digit in either the code or its path")]
    Unknown,
}

impl AccountClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountClass::Asset => "asset",
            AccountClass::Liability => "liability",
            AccountClass::Equity => "equity",
            AccountClass::Income => "income",
            AccountClass::Expense => "expense",
            AccountClass::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != AccountClass::Unknown
    }
}

impl fmt::Display for AccountClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The side on which an account customarily carries a positive balance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NormalSide {
    Debit,
    Credit,
}

impl NormalSide {
    pub fn opposite(self) -> Self {
        match self {
            NormalSide::Debit => NormalSide::Credit,
            NormalSide::Credit => NormalSide::Debit,
        }
    }

    /// Chinese ledger label for the side ("借" / "贷").
    pub fn label(self) -> &'static str {
        match self {
            NormalSide::Debit => "借",
            NormalSide::Credit => "贷",
        }
    }
}

/// A debit/credit magnitude pair. Both sides are stored separately, never netted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Amounts {
    pub debit: f64,
    pub credit: f64,
}

impl Amounts {
    pub fn new(debit: f64, credit: f64) -> Self {
        Self { debit, credit }
    }

    pub fn is_zero(&self) -> bool {
        self.debit.abs() < f64::EPSILON && self.credit.abs() < f64::EPSILON
    }
}

impl std::ops::Add for Amounts {
    type Output = Amounts;

    fn add(self, rhs: Amounts) -> Amounts {
        Amounts {
            debit: self.debit + rhs.debit,
            credit: self.credit + rhs.credit,
        }
    }
}

impl std::ops::AddAssign for Amounts {
    fn add_assign(&mut self, rhs: Amounts) {
        self.debit += rhs.debit;
        self.credit += rhs.credit;
    }
}

impl std::iter::Sum for Amounts {
    fn sum<I: Iterator<Item = Amounts>>(iter: I) -> Self {
        iter.fold(Amounts::default(), |acc, a| acc + a)
    }
}

/// One row of the subject-balance table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceRecord {
    pub company: String,
    pub period: String,
    pub account_code: String,
    pub account_code_path: String,
    pub account_name: String,
    pub account_name_path: String,
    pub is_dimension_row: bool,
    pub dimension_name: Option<String>,
    pub opening: Amounts,
    pub cumulative: Amounts,
    pub closing: Amounts,
}

impl BalanceRecord {
    /// Fiscal year taken from the first 4-digit run of the period label.
    pub fn year(&self) -> Option<i32> {
        extract_year(&self.period)
    }

    /// The account code, or the last segment of the code path for pure-dimension rows.
    pub fn effective_code(&self) -> &str {
        let code = self.account_code.trim();
        if !code.is_empty() {
            return code;
        }
        last_path_segment(&self.account_code_path).unwrap_or("")
    }

    /// Dimension name, only when this row is a sub-ledger breakdown.
    pub fn dimension(&self) -> Option<&str> {
        if self.is_dimension_row {
            self.dimension_name.as_deref().filter(|d| !d.trim().is_empty())
        } else {
            None
        }
    }

    pub fn is_grand_total(&self) -> bool {
        let name = self.account_name.trim();
        name == GRAND_TOTAL_NAME || name.eq_ignore_ascii_case("total")
    }
}

/// Account name the source system uses for its grand-total row.
pub const GRAND_TOTAL_NAME: &str = "合计";

/// One line of the journal-entry detail table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoucherRecord {
    pub company: String,
    pub account_code: String,
    pub account_full_name: String,
    pub date: Option<NaiveDate>,
    pub voucher_word: String,
    pub voucher_number: String,
    pub line_number: String,
    pub summary: String,
    pub debit_amount: f64,
    pub credit_amount: f64,
    pub original_amount: f64,
    pub currency: String,
    pub fiscal_year: Option<i32>,
    pub voucher_id: String,
}

impl VoucherRecord {
    /// Composite entry key: the explicit identifier when present, else series + number.
    pub fn voucher_key(&self) -> String {
        if !self.voucher_id.trim().is_empty() {
            return self.voucher_id.trim().to_string();
        }
        format!("{}-{}", self.voucher_word.trim(), self.voucher_number.trim())
    }

    pub fn amounts(&self) -> Amounts {
        Amounts::new(self.debit_amount, self.credit_amount)
    }

    pub fn calendar_year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.date.map(|d| d.year())
    }
}

/// The in-memory balance table plus, when loaded from disk, the raw source layout
/// needed to write corrections back without losing columns.
#[derive(Debug, Clone, Default)]
pub struct BalanceTable {
    pub records: Vec<BalanceRecord>,
    pub layout: Option<SourceLayout>,
}

impl BalanceTable {
    pub fn new(records: Vec<BalanceRecord>) -> Self {
        Self {
            records,
            layout: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VoucherTable {
    pub records: Vec<VoucherRecord>,
}

impl VoucherTable {
    pub fn new(records: Vec<VoucherRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

//! Account classification by code.
//!
//! Chinese GAAP numbers the chart of accounts so that the first digit of the
//! top-level code names the element:
//!
//! | Leading digit | Class |
//! |---|---|
//! | 1 | asset |
//! | 2 | liability |
//! | 3 | equity |
//! | 4 | income |
//! | 5, 6 | expense (cost and profit-and-loss) |
//!
//! The account code is authoritative. Only when it is blank (pure dimension rows)
//! is the first segment of the slash-delimited code path consulted.

use crate::schema::{AccountClass, BalanceRecord, NormalSide};
use log::warn;

/// Classifies a single code segment by its first character.
fn classify_segment(segment: &str) -> Option<AccountClass> {
    match segment.trim().chars().next()? {
        '1' => Some(AccountClass::Asset),
        '2' => Some(AccountClass::Liability),
        '3' => Some(AccountClass::Equity),
        '4' => Some(AccountClass::Income),
        '5' | '6' => Some(AccountClass::Expense),
        _ => None,
    }
}

fn is_blank(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") || trimmed.eq_ignore_ascii_case("none")
}

/// Classifies a dot-delimited account code (`"1221.02"` looks at `"1221"`).
pub fn classify_code(code: &str) -> AccountClass {
    if is_blank(code) {
        return AccountClass::Unknown;
    }
    let head = code.trim().split('.').next().unwrap_or("");
    classify_segment(head).unwrap_or(AccountClass::Unknown)
}

/// Classifies a slash-delimited code path (`"/1221/1221.02/"` looks at `"1221"`).
pub fn classify_path(path: &str) -> AccountClass {
    if is_blank(path) {
        return AccountClass::Unknown;
    }
    path.split('/')
        .map(str::trim)
        .find(|s| !s.is_empty())
        .and_then(classify_segment)
        .unwrap_or(AccountClass::Unknown)
}

/// Code first; the path is consulted when the code is blank or has no
/// recognizable leading digit.
pub fn classify(code: &str, path: &str) -> AccountClass {
    match classify_code(code) {
        AccountClass::Unknown => classify_path(path),
        class => class,
    }
}

pub fn classify_record(record: &BalanceRecord) -> AccountClass {
    classify(&record.account_code, &record.account_code_path)
}

/// Same as [`classify_record`] but logs rows that cannot be classified.
pub fn classify_record_logged(record: &BalanceRecord) -> AccountClass {
    let class = classify_record(record);
    if class == AccountClass::Unknown {
        warn!(
            "Unknown account class for code '{}' (path '{}') in {} {}",
            record.account_code, record.account_code_path, record.company, record.period
        );
    }
    class
}

/// Normal balance side. Unknown accounts project onto the debit side.
pub fn normal_side(class: AccountClass) -> NormalSide {
    match class {
        AccountClass::Asset | AccountClass::Expense | AccountClass::Unknown => NormalSide::Debit,
        AccountClass::Liability | AccountClass::Equity | AccountClass::Income => NormalSide::Credit,
    }
}

use crate::error::{LedgerAuditError, Result};
use chrono::{NaiveDate, NaiveDateTime};

/// Absolute tolerance for every monetary comparison (one currency minor unit).
pub const TOLERANCE: f64 = 0.01;

pub fn within_tolerance(a: f64, b: f64) -> bool {
    (a - b).abs() <= TOLERANCE
}

/// First run of exactly four consecutive ASCII digits, as a year.
pub fn extract_year(label: &str) -> Option<i32> {
    let bytes = label.as_bytes();
    let mut start = None;

    for (i, b) in bytes.iter().enumerate() {
        match (b.is_ascii_digit(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if i - s >= 4 {
                    return label[s..s + 4].parse().ok();
                }
                start = None;
            }
            _ => {}
        }
    }

    match start {
        Some(s) if bytes.len() - s >= 4 => label[s..s + 4].parse().ok(),
        _ => None,
    }
}

/// Coerces a monetary cell to a number. Blank, non-numeric and NaN cells become 0.
pub fn parse_amount(raw: &str) -> f64 {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '，' && !c.is_whitespace())
        .collect();

    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Parses a fiscal-year label such as `"2024"`, `"2,024"` or `"2024.0"`.
pub fn parse_fiscal_year(raw: &str) -> Option<i32> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(year) = cleaned.parse::<i32>() {
        return Some(year);
    }

    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && v.fract() == 0.0)
        .map(|v| v as i32)
}

pub fn parse_bool_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "true" | "1" | "1.0" | "yes" | "y" | "是"
    )
}

/// Parses a voucher date. Accepts `-` or `/` separators and an optional time part.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.date());
        }
    }

    None
}

/// Strict variant of [`parse_date`] for user-supplied query bounds.
pub fn parse_date_strict(raw: &str) -> Result<NaiveDate> {
    parse_date(raw).ok_or_else(|| {
        LedgerAuditError::DateError(format!("Invalid date '{}'. Expected YYYY-MM-DD", raw))
    })
}

/// Position of a period within its year: the first digit run after the year,
/// so `2024年第12期` sorts after `2024年第6期`. Plain year labels rank 0.
pub fn period_rank(period: &str) -> u32 {
    let Some(pos) = period.find(|c: char| c.is_ascii_digit()) else {
        return 0;
    };
    let after_year = period[pos..]
        .char_indices()
        .nth(4)
        .map(|(i, _)| &period[pos + i..])
        .unwrap_or("");

    let digits: String = after_year
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

/// Non-empty segments of a slash-delimited code path.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').map(str::trim).filter(|s| !s.is_empty())
}

pub fn last_path_segment(path: &str) -> Option<&str> {
    path_segments(path).last()
}

/// Normalizes a code or path fragment to `/fragment/` form for scoped matching.
pub fn normalize_path_scope(fragment: &str) -> String {
    let trimmed = fragment.trim().trim_matches('/');
    format!("/{}/", trimmed)
}

/// Depth of a node in its code path (`/1002/` is 0, `/1002/1002.01/` is 1).
pub fn path_depth(path: &str) -> usize {
    path_segments(path).count().saturating_sub(1)
}

/// Every proper dot-delimited prefix of a code, shortest first.
pub fn code_prefixes(code: &str) -> Vec<String> {
    let parts: Vec<&str> = code.split('.').collect();
    (1..parts.len()).map(|i| parts[..i].join(".")).collect()
}

/// Thousands-separated, two-decimal rendering. Magnitudes under a cent print as zero.
pub fn format_amount(amount: f64) -> String {
    if !amount.is_finite() || amount.abs() < TOLERANCE {
        return "0.00".to_string();
    }

    let negative = amount < 0.0;
    let fixed = format!("{:.2}", amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}{}.{}", if negative { "-" } else { "" }, grouped, frac_part)
}

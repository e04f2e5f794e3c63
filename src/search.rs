//! Keyword matching for free-text ledger fields (摘要, account names).
//!
//! Matching runs in three tiers and stops at the first tier that hits anything:
//! a case-insensitive substring match, then the synonym groups below, then a
//! similarity ratio of at least [`FUZZY_THRESHOLD`].

use serde::Serialize;

/// Minimum similarity ratio accepted by the fuzzy tier.
pub const FUZZY_THRESHOLD: f64 = 0.6;

/// Groups of interchangeable bookkeeping terms. The first entry names the group.
pub const SYNONYM_GROUPS: &[&[&str]] = &[
    &["固定资产", "固资", "设备", "机器", "厂房", "建筑物"],
    &["其他费用", "其他", "杂费", "其它费用", "其它"],
    &["管理费用", "管理费", "行政费用", "行政费"],
    &["销售费用", "销售费", "营销费用", "营销费"],
    &["财务费用", "财务费", "利息费用", "利息"],
    &["银行存款", "银行", "存款", "现金"],
    &["应收账款", "应收", "客户欠款"],
    &["应付账款", "应付", "供应商欠款"],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Synonym,
    Fuzzy,
}

/// Every synonym related to `keyword`: members of any group that contains the
/// keyword, or any of whose members occur inside the keyword.
pub fn expand_synonyms(keyword: &str) -> Vec<&'static str> {
    let keyword = keyword.trim().to_lowercase();
    let mut terms: Vec<&'static str> = Vec::new();

    for group in SYNONYM_GROUPS {
        let related = group
            .iter()
            .any(|syn| keyword == syn.to_lowercase() || keyword.contains(&syn.to_lowercase()));
        if related {
            for syn in group.iter() {
                if !terms.contains(syn) {
                    terms.push(syn);
                }
            }
        }
    }

    terms
}

fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];

    for i in 0..a.len() {
        let mut curr = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                curr[j + 1] = prev[j] + 1;
                if curr[j + 1] > best.2 {
                    best = (i + 1 - curr[j + 1], j + 1 - curr[j + 1], curr[j + 1]);
                }
            }
        }
        prev = curr;
    }

    best
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + len..], &b[j + len..])
}

/// `2 * M / T`, where `M` counts characters in recursively found common blocks
/// and `T` is the combined length. 1.0 for identical strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

/// Indices of `texts` that match `keyword`, and which tier produced them.
/// Returns `None` when nothing matches or the keyword is blank.
pub fn match_keyword<S: AsRef<str>>(keyword: &str, texts: &[S]) -> Option<(MatchTier, Vec<usize>)> {
    let keyword = keyword.trim().to_lowercase();
    if keyword.is_empty() {
        return None;
    }

    let lowered: Vec<String> = texts.iter().map(|t| t.as_ref().to_lowercase()).collect();

    let exact: Vec<usize> = lowered
        .iter()
        .enumerate()
        .filter(|(_, t)| t.contains(&keyword))
        .map(|(i, _)| i)
        .collect();
    if !exact.is_empty() {
        return Some((MatchTier::Exact, exact));
    }

    let synonyms: Vec<String> = expand_synonyms(&keyword)
        .into_iter()
        .map(str::to_lowercase)
        .collect();
    let by_synonym: Vec<usize> = lowered
        .iter()
        .enumerate()
        .filter(|(_, t)| synonyms.iter().any(|s| t.contains(s.as_str())))
        .map(|(i, _)| i)
        .collect();
    if !by_synonym.is_empty() {
        return Some((MatchTier::Synonym, by_synonym));
    }

    let fuzzy: Vec<usize> = lowered
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.is_empty() && similarity(&keyword, t) >= FUZZY_THRESHOLD)
        .map(|(i, _)| i)
        .collect();
    if !fuzzy.is_empty() {
        return Some((MatchTier::Fuzzy, fuzzy));
    }

    None
}
